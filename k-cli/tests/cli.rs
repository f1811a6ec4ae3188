//! Binary-level tests for the offline commands (render, ls, version).

#![cfg(unix)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A fake `$K_ROOT` with its `_` symlink pointing at a config directory
/// holding the given files.
fn fake_root(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let root = TempDir::new().expect("tempdir");
    let config = root.path().join("config");
    std::fs::create_dir_all(&config).expect("mkdir");
    for (name, content) in files {
        std::fs::write(config.join(name), content).expect("write");
    }
    std::os::unix::fs::symlink(&config, root.path().join("_")).expect("symlink");
    (root, config)
}

fn k() -> Command {
    Command::cargo_bin("k").expect("binary k")
}

#[test]
fn version_prints_the_package_version() {
    k().arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn render_writes_the_config_tree() {
    let (root, _) = fake_root(&[("k.yaml", "User: u\nHost: h\n")]);
    let out = root.path().join("out");

    k().env("K_ROOT", root.path())
        .arg("render")
        .arg(&out)
        .assert()
        .success();

    let target = std::fs::read_to_string(out.join("k.target")).expect("k.target");
    assert!(target.contains("Requires=k-http.target"));
    assert!(out.join("k-http.service").exists());
    assert!(out.join("k/k-http.json").exists());
    assert!(out.join("multi-user.target.wants/k.target").exists());
}

#[test]
fn render_merges_app_units() {
    let (root, _) = fake_root(&[
        ("k.yaml", "User: u\nHost: h\n"),
        (
            "foo.yaml",
            "Units:\n  foo.service:\n    Service:\n      ExecStart: /bin/foo\n",
        ),
    ]);
    let out = root.path().join("out");

    k().env("K_ROOT", root.path())
        .arg("render")
        .arg(&out)
        .assert()
        .success();

    let service = std::fs::read_to_string(out.join("foo.service")).expect("foo.service");
    assert!(service.contains("DynamicUser=true"));
    assert!(service.contains("PartOf=foo.target k.target"));
}

#[test]
fn ls_lists_apps_sorted() {
    let (root, _) = fake_root(&[
        ("k.yaml", "User: u\nHost: h\n"),
        ("zeta.yaml", ""),
        ("alpha.yaml", ""),
    ]);

    k().env("K_ROOT", root.path())
        .arg("ls")
        .assert()
        .success()
        .stdout(predicate::str::contains("Apps:\n  - alpha\n  - zeta"));
}

#[test]
fn recursive_dependencies_fail_loading() {
    let (root, _) = fake_root(&[
        ("k.yaml", "User: u\nHost: h\n"),
        ("a.yaml", "Dependencies: [b]\n"),
        ("b.yaml", "Dependencies: [a]\n"),
    ]);

    k().env("K_ROOT", root.path())
        .arg("ls")
        .assert()
        .failure()
        .stderr(predicate::str::contains("recursive dependency"));
}

#[test]
fn deploy_rejects_unknown_apps() {
    let (root, config) = fake_root(&[("k.yaml", "User: u\nHost: h\n")]);
    let _ = config;

    k().env("K_ROOT", root.path())
        .arg("deploy")
        .arg("nope")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a valid app"));
}

#[test]
fn generator_argv0_dispatch_copies_units() {
    let (root, config) = fake_root(&[("k.yaml", "User: u\nHost: h\n")]);
    // Render first so the config dir holds a unit tree.
    let _ = config;
    let rendered = root.path().join("rendered");
    k().env("K_ROOT", root.path())
        .arg("render")
        .arg(&rendered)
        .assert()
        .success();
    // Point `_` at the rendered tree, like /opt/k/_ on a server.
    std::fs::remove_file(root.path().join("_")).expect("unlink");
    std::os::unix::fs::symlink(&rendered, root.path().join("_")).expect("symlink");

    // Invoke through a `k-generator` symlink, argv[0] style.
    let bin = assert_cmd::cargo::cargo_bin("k");
    let generator = root.path().join("k-generator");
    std::os::unix::fs::symlink(&bin, &generator).expect("symlink");
    let out = root.path().join("run");

    Command::new(&generator)
        .env("K_ROOT", root.path())
        .arg(&out)
        .assert()
        .success();

    assert!(out.join("k.target").exists());
    assert!(out.join("k-http.service").exists());
    assert!(!out.join("k").exists());
    assert_eq!(
        std::fs::read_link(out.join("multi-user.target.wants/k.target")).expect("link"),
        Path::new("../k.target")
    );
}
