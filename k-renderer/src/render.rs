//! Unit merge and tree rendering.

use std::fmt::Write as _;
use std::path::Path;

use serde_yaml::Value;

use k_core::{Config, Route, Section, Unit, Units};

use crate::error::{io_err, RenderError};

const BANNER: &str = "# generated by k\n";

/// Render the full systemd tree for `config` into `dir`.
///
/// `exe` is the path of the binary on the machine that will run the units
/// (the installed server binary, not the local executable).
pub fn render(config: &Config, dir: &Path, exe: &str) -> Result<(), RenderError> {
    for (name, app) in &config.apps {
        render_units(dir, name, &app.units)?;
        render_env_file(dir, name, &app.env)?;
    }
    render_internals(config, dir, exe)
}

/// Merge two units: `b` overrides `a` at the leaf, except list-valued keys
/// in `a`, which are extended by `b` (scalars are wrapped as singletons).
pub fn merge(mut a: Unit, b: Unit) -> Unit {
    for (name, section) in b {
        let Some(existing) = a.get_mut(&name) else {
            a.insert(name, section);
            continue;
        };
        for (key, value) in section {
            if let Some(Value::Sequence(list)) = existing.get_mut(&key) {
                match value {
                    Value::Sequence(values) => list.extend(values),
                    scalar => list.push(scalar),
                }
            } else {
                existing.insert(key, value);
            }
        }
    }
    a
}

fn render_units(dir: &Path, app_name: &str, units: &Units) -> Result<(), RenderError> {
    let target = format!("{app_name}.target");
    let mut reqs = Vec::new();
    for (name, unit) in units {
        reqs.push(name.clone());
        let part_of = unit_of(
            "Unit",
            vec![("PartOf", string(format!("{target} k.target")))],
        );
        let mut merged = merge(part_of, unit.clone());
        if let Some(stem) = name.strip_suffix(".service") {
            merged = merge(service_defaults(stem, app_name), merged);
        }
        write_file(&dir.join(name), &unit_file(name, &merged)?, 0o644)?;
    }
    reqs.sort();
    let t = unit_of(
        "Unit",
        vec![
            ("Requires", string(reqs.join(" "))),
            ("OnFailure", string("k-notify@%N.service")),
        ],
    );
    write_file(&dir.join(&target), &unit_file(&target, &t)?, 0o644)
}

/// Defaults merged under every `.service` unit. List-valued keys stay
/// extensible by the user's unit.
fn service_defaults(stem: &str, app_name: &str) -> Unit {
    unit_of(
        "Service",
        vec![
            ("SyslogIdentifier", string(stem)),
            ("LogExtraFields", list(vec![format!("K={app_name}")])),
            ("DynamicUser", string("true")),
            ("StateDirectory", string(stem)),
            ("CacheDirectory", string(stem)),
            ("Environment", list(vec!["K_CONFIG_DIR=/opt/k/_".to_string()])),
            (
                "EnvironmentFile",
                list(vec![format!("/opt/k/_/k/{app_name}.env")]),
            ),
            ("Restart", string("always")),
        ],
    )
}

fn render_env_file(
    dir: &Path,
    app_name: &str,
    env: &std::collections::BTreeMap<String, String>,
) -> Result<(), RenderError> {
    let mut s = String::new();
    for (k, v) in env {
        let _ = writeln!(s, "{k}={v}");
    }
    write_file(&dir.join("k").join(format!("{app_name}.env")), &s, 0o600)
}

fn render_internals(config: &Config, dir: &Path, exe: &str) -> Result<(), RenderError> {
    let mut sc = config.server.clone();
    for route in &mut sc.routes {
        route.log_fields.insert("K".into(), "k-custom".into());
        route
            .log_fields
            .insert("SYSLOG_IDENTIFIER".into(), "k-custom".into());
    }
    let mut reqs = Vec::new();
    for (name, app) in &config.apps {
        reqs.push(format!("{name}.target"));
        for route in &app.routes {
            let mut route = route.clone();
            route.log_fields.insert("K".into(), name.clone());
            route
                .log_fields
                .insert("SYSLOG_IDENTIFIER".into(), "k-http".into());
            sc.routes.push(route);
        }
    }
    if !config.tunnel.pattern.is_empty() {
        sc.routes.push(Route {
            target: format!("http://{}", config.tunnel.address),
            patterns: vec![config.tunnel.pattern.clone()],
            log_fields: std::collections::BTreeMap::from([(
                "SYSLOG_IDENTIFIER".to_string(),
                "k-http".to_string(),
            )]),
            ..Route::default()
        });
    }

    let notify = unit_of(
        "Service",
        vec![("ExecStart", string(format!("-{exe} notify --app %i")))],
    );
    write_file(
        &dir.join("k-notify@.service"),
        &unit_file("k-notify@.service", &notify)?,
        0o644,
    )?;

    let http_server = Units::from([
        (
            "k-http.socket".to_string(),
            unit_of(
                "Socket",
                vec![
                    ("ListenStream", string(sc.http.to_string())),
                    ("FileDescriptorName", string("http")),
                    ("Service", string("k-http.service")),
                ],
            ),
        ),
        (
            "k-https.socket".to_string(),
            unit_of(
                "Socket",
                vec![
                    ("ListenStream", string(sc.https.to_string())),
                    ("FileDescriptorName", string("https")),
                    ("Service", string("k-http.service")),
                ],
            ),
        ),
        (
            "k-http.service".to_string(),
            unit_of(
                "Service",
                vec![
                    (
                        "ExecStart",
                        string(format!("{exe} serve ${{K_CONFIG_DIR}}/k/k-http.json")),
                    ),
                    ("Restart", string("always")),
                ],
            ),
        ),
    ]);
    render_units(dir, "k-http", &http_server)?;
    write_file(&dir.join("k").join("k-http.env"), "", 0o600)?;

    sc.routes.sort_by(|a, b| a.target.cmp(&b.target));
    let json = serde_json::to_string_pretty(&sc)?;
    write_file(&dir.join("k").join("k-http.json"), &json, 0o644)?;

    reqs.sort();
    reqs.push("k-http.target".to_string());
    let t = unit_of(
        "Unit",
        vec![
            ("After", string("network-online.target")),
            ("Requires", string(reqs.join(" "))),
        ],
    );
    write_file(&dir.join("k.target"), &unit_file("k.target", &t)?, 0o644)?;

    write_symlink(
        Path::new("..").join("k.target").as_path(),
        &dir.join("multi-user.target.wants").join("k.target"),
    )
}

/// Emit a unit as INI: banner, sections in sorted order, keys in sorted
/// order, repeat-key form for lists, `Key=` for null.
fn unit_file(unit_name: &str, unit: &Unit) -> Result<String, RenderError> {
    let mut s = String::from(BANNER);
    for (section, keys) in unit {
        let _ = writeln!(s, "[{section}]");
        for (key, value) in keys {
            match value {
                Value::Sequence(values) => {
                    for value in values {
                        if value.is_null() {
                            continue;
                        }
                        write_directive(&mut s, unit_name, section, key, value)?;
                    }
                }
                value => write_directive(&mut s, unit_name, section, key, value)?,
            }
        }
        s.push('\n');
    }
    Ok(s)
}

fn write_directive(
    s: &mut String,
    unit_name: &str,
    section: &str,
    key: &str,
    value: &Value,
) -> Result<(), RenderError> {
    match value {
        Value::Null => {
            let _ = writeln!(s, "{key}=");
        }
        Value::Bool(b) => {
            let _ = writeln!(s, "{key}={b}");
        }
        Value::Number(n) => {
            let _ = writeln!(s, "{key}={n}");
        }
        Value::String(v) => {
            let _ = writeln!(s, "{key}={v}");
        }
        _ => {
            return Err(RenderError::BadValue {
                unit: unit_name.to_string(),
                section: section.to_string(),
                key: key.to_string(),
            })
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Small constructors & filesystem helpers
// ---------------------------------------------------------------------------

fn string(v: impl Into<String>) -> Value {
    Value::String(v.into())
}

fn list(items: Vec<String>) -> Value {
    Value::Sequence(items.into_iter().map(Value::String).collect())
}

fn unit_of(section_name: &str, pairs: Vec<(&str, Value)>) -> Unit {
    let mut section = Section::new();
    for (k, v) in pairs {
        section.insert(k.to_string(), v);
    }
    Unit::from([(section_name.to_string(), section)])
}

fn write_file(path: &Path, content: &str, mode: u32) -> Result<(), RenderError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| io_err(path, e))?;
    set_mode(path, mode)
}

/// Create `link` pointing at `original`, replacing whatever is there.
fn write_symlink(original: &Path, link: &Path) -> Result<(), RenderError> {
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    match std::fs::symlink_metadata(link) {
        Ok(meta) if meta.is_dir() => {
            std::fs::remove_dir_all(link).map_err(|e| io_err(link, e))?
        }
        Ok(_) => std::fs::remove_file(link).map_err(|e| io_err(link, e))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(link, err)),
    }
    symlink(original, link)
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> Result<(), RenderError> {
    std::os::unix::fs::symlink(original, link).map_err(|e| io_err(link, e))
}
#[cfg(not(unix))]
fn symlink(_original: &Path, link: &Path) -> Result<(), RenderError> {
    Err(io_err(
        link,
        std::io::Error::other("symlinks require a unix host"),
    ))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), RenderError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), RenderError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn section_of(pairs: Vec<(&str, Value)>) -> Section {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let defaults = service_defaults("foo", "foo");
        let merged = merge(defaults.clone(), Unit::new());
        assert_eq!(merged, defaults);
    }

    #[test]
    fn merge_carries_sections_from_both_sides() {
        let a = unit_of("Unit", vec![("PartOf", string("x.target"))]);
        let b = unit_of("Service", vec![("ExecStart", string("/bin/x"))]);
        let merged = merge(a, b);
        assert!(merged.contains_key("Unit"));
        assert!(merged.contains_key("Service"));
    }

    #[test]
    fn merge_extends_list_with_scalar() {
        let a = unit_of("Service", vec![("Environment", list(vec!["A=1".into()]))]);
        let b = unit_of("Service", vec![("Environment", string("B=2"))]);
        let merged = merge(a, b);
        let env = &merged["Service"]["Environment"];
        assert_eq!(
            env,
            &Value::Sequence(vec![string("A=1"), string("B=2")]),
            "scalar must be appended to the default list"
        );
    }

    #[test]
    fn merge_extends_list_with_list() {
        let a = unit_of("Service", vec![("Environment", list(vec!["A=1".into()]))]);
        let b = unit_of(
            "Service",
            vec![("Environment", list(vec!["B=2".into(), "C=3".into()]))],
        );
        let merged = merge(a, b);
        if let Value::Sequence(values) = &merged["Service"]["Environment"] {
            assert_eq!(values.len(), 3);
        } else {
            panic!("expected a list");
        }
    }

    #[test]
    fn merge_scalar_overrides_scalar() {
        let a = unit_of("Service", vec![("Restart", string("always"))]);
        let b = unit_of("Service", vec![("Restart", string("no"))]);
        let merged = merge(a, b);
        assert_eq!(merged["Service"]["Restart"], string("no"));
    }

    #[test]
    fn unit_file_sorts_sections_and_keys() {
        let mut unit = Unit::new();
        unit.insert(
            "Unit".to_string(),
            section_of(vec![("B", string("2")), ("A", string("1"))]),
        );
        unit.insert(
            "Install".to_string(),
            section_of(vec![("WantedBy", string("multi-user.target"))]),
        );
        let s = unit_file("x.service", &unit).expect("render");
        let install = s.find("[Install]").expect("install section");
        let unit_pos = s.find("[Unit]").expect("unit section");
        assert!(install < unit_pos, "sections must be emitted sorted");
        let a = s.find("A=1").expect("A");
        let b = s.find("B=2").expect("B");
        assert!(a < b, "keys must be emitted sorted");
        assert!(s.starts_with("# generated by k\n"));
    }

    #[test]
    fn unit_file_renders_null_list_and_scalars() {
        let unit = unit_of(
            "Service",
            vec![
                ("Empty", Value::Null),
                ("Flag", Value::Bool(true)),
                ("Port", Value::Number(8080.into())),
                ("Lines", list(vec!["a".into(), "b".into()])),
            ],
        );
        let s = unit_file("x.service", &unit).expect("render");
        assert!(s.contains("Empty=\n"));
        assert!(s.contains("Flag=true\n"));
        assert!(s.contains("Port=8080\n"));
        assert!(s.contains("Lines=a\nLines=b\n"));
    }

    #[test]
    fn unit_file_rejects_nested_mappings() {
        let unit = unit_of(
            "Service",
            vec![(
                "Bad",
                Value::Mapping(serde_yaml::Mapping::new()),
            )],
        );
        let err = unit_file("x.service", &unit).unwrap_err();
        assert!(matches!(err, RenderError::BadValue { .. }));
    }
}
