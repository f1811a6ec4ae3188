//! End-to-end rendering scenarios: minimal config, single app with a route,
//! and byte-for-byte determinism.

use std::collections::BTreeMap;
use std::path::Path;

use serde_yaml::Value;
use tempfile::TempDir;

use k_core::{App, Config, Route, Section, Unit, Units};
use k_renderer::render;

fn read(dir: &Path, name: &str) -> String {
    std::fs::read_to_string(dir.join(name))
        .unwrap_or_else(|e| panic!("read {name}: {e}"))
}

fn minimal_config() -> Config {
    Config {
        user: "u".to_string(),
        host: "h".to_string(),
        ..Config::default()
    }
}

fn app_config() -> Config {
    let mut service = Unit::new();
    service.insert(
        "Service".to_string(),
        Section::from([(
            "ExecStart".to_string(),
            Value::String("/bin/foo".to_string()),
        )]),
    );
    let app = App {
        units: Units::from([("foo.service".to_string(), service)]),
        routes: vec![Route {
            patterns: vec!["example.com/".to_string()],
            target: "http://127.0.0.1:9000".to_string(),
            ..Route::default()
        }],
        env: BTreeMap::from([("FOO".to_string(), "1".to_string())]),
        ..App::default()
    };
    let mut c = minimal_config();
    c.apps.insert("foo".to_string(), app);
    c
}

#[test]
fn minimal_render_produces_internals_only() {
    let dir = TempDir::new().expect("tempdir");
    render(&minimal_config(), dir.path(), "/bin/x").expect("render");

    let k_target = read(dir.path(), "k.target");
    assert_eq!(
        k_target,
        "# generated by k\n[Unit]\nAfter=network-online.target\nRequires=k-http.target\n\n"
    );

    let notify = read(dir.path(), "k-notify@.service");
    assert!(notify.contains("ExecStart=-/bin/x notify --app %i"));

    let socket = read(dir.path(), "k-http.socket");
    assert!(socket.contains("ListenStream=80"));
    assert!(socket.contains("FileDescriptorName=http"));
    assert!(socket.contains("Service=k-http.service"));
    let tls_socket = read(dir.path(), "k-https.socket");
    assert!(tls_socket.contains("ListenStream=443"));
    assert!(tls_socket.contains("FileDescriptorName=https"));

    let service = read(dir.path(), "k-http.service");
    assert!(service.contains("ExecStart=/bin/x serve ${K_CONFIG_DIR}/k/k-http.json"));
    assert!(service.contains("Restart=always"));
    assert!(
        service.contains("DynamicUser=true"),
        "k-http.service must receive the service defaults"
    );

    let target = read(dir.path(), "k-http.target");
    assert!(target.contains("Requires=k-http.service k-http.socket k-https.socket"));
    assert!(target.contains("OnFailure=k-notify@%N.service"));

    let json: serde_json::Value =
        serde_json::from_str(&read(dir.path(), "k/k-http.json")).expect("routing table");
    assert_eq!(json["HTTP"], 80);
    assert_eq!(json["Routes"], serde_json::json!([]));

    assert_eq!(read(dir.path(), "k/k-http.env"), "");

    let link = std::fs::read_link(dir.path().join("multi-user.target.wants/k.target"))
        .expect("wants symlink");
    assert_eq!(link, Path::new("../k.target"));
}

#[test]
fn single_app_gets_merged_defaults_and_tagged_route() {
    let dir = TempDir::new().expect("tempdir");
    render(&app_config(), dir.path(), "/bin/x").expect("render");

    let service = read(dir.path(), "foo.service");
    assert!(service.contains("PartOf=foo.target k.target"));
    assert!(service.contains("ExecStart=/bin/foo"));
    assert!(service.contains("SyslogIdentifier=foo"));
    assert!(service.contains("LogExtraFields=K=foo"));
    assert!(service.contains("DynamicUser=true"));
    assert!(service.contains("StateDirectory=foo"));
    assert!(service.contains("CacheDirectory=foo"));
    assert!(service.contains("Environment=K_CONFIG_DIR=/opt/k/_"));
    assert!(service.contains("EnvironmentFile=/opt/k/_/k/foo.env"));
    assert!(service.contains("Restart=always"));

    let target = read(dir.path(), "foo.target");
    assert!(target.contains("Requires=foo.service"));
    assert!(target.contains("OnFailure=k-notify@%N.service"));

    let k_target = read(dir.path(), "k.target");
    assert!(k_target.contains("Requires=foo.target k-http.target"));

    assert_eq!(read(dir.path(), "k/foo.env"), "FOO=1\n");

    let json: serde_json::Value =
        serde_json::from_str(&read(dir.path(), "k/k-http.json")).expect("routing table");
    let routes = json["Routes"].as_array().expect("routes array");
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0]["Target"], "http://127.0.0.1:9000");
    assert_eq!(routes[0]["LogFields"]["K"], "foo");
    assert_eq!(routes[0]["LogFields"]["SYSLOG_IDENTIFIER"], "k-http");
}

#[test]
fn tunnel_pattern_appends_synthetic_route() {
    let dir = TempDir::new().expect("tempdir");
    let mut c = minimal_config();
    c.tunnel.pattern = "dev.example.com/".to_string();
    render(&c, dir.path(), "/bin/x").expect("render");

    let json: serde_json::Value =
        serde_json::from_str(&read(dir.path(), "k/k-http.json")).expect("routing table");
    let routes = json["Routes"].as_array().expect("routes array");
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0]["Target"], "http://localhost:9999");
    assert_eq!(routes[0]["Patterns"][0], "dev.example.com/");
}

#[test]
fn routes_are_sorted_by_target() {
    let dir = TempDir::new().expect("tempdir");
    let mut c = app_config();
    c.server.routes.push(Route {
        patterns: vec!["/".to_string()],
        target: "/srv/static".to_string(),
        ..Route::default()
    });
    render(&c, dir.path(), "/bin/x").expect("render");

    let json: serde_json::Value =
        serde_json::from_str(&read(dir.path(), "k/k-http.json")).expect("routing table");
    let targets: Vec<&str> = json["Routes"]
        .as_array()
        .expect("routes")
        .iter()
        .map(|r| r["Target"].as_str().expect("target"))
        .collect();
    let mut sorted = targets.clone();
    sorted.sort_unstable();
    assert_eq!(targets, sorted);
    // Root-level routes get the k-custom tag.
    let static_route = json["Routes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["Target"] == "/srv/static")
        .expect("static route");
    assert_eq!(static_route["LogFields"]["K"], "k-custom");
}

#[test]
fn render_is_deterministic() {
    let a = TempDir::new().expect("tempdir");
    let b = TempDir::new().expect("tempdir");
    let c = app_config();
    render(&c, a.path(), "/bin/x").expect("render a");
    render(&c, b.path(), "/bin/x").expect("render b");

    let mut paths = Vec::new();
    collect(a.path(), a.path(), &mut paths);
    assert!(!paths.is_empty());
    for rel in paths {
        let pa = a.path().join(&rel);
        let pb = b.path().join(&rel);
        match std::fs::symlink_metadata(&pa) {
            Ok(meta) if meta.file_type().is_symlink() => {
                assert_eq!(
                    std::fs::read_link(&pa).expect("link a"),
                    std::fs::read_link(&pb).expect("link b")
                );
            }
            _ => {
                assert_eq!(
                    std::fs::read(&pa).expect("read a"),
                    std::fs::read(&pb).expect("read b"),
                    "{} differs between runs",
                    rel
                );
            }
        }
    }
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<String>) {
    for entry in std::fs::read_dir(dir).expect("read_dir") {
        let path = entry.expect("entry").path();
        let meta = std::fs::symlink_metadata(&path).expect("meta");
        if meta.is_dir() {
            collect(root, &path, out);
        } else {
            out.push(
                path.strip_prefix(root)
                    .expect("relative")
                    .to_string_lossy()
                    .into_owned(),
            );
        }
    }
}
