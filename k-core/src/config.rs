//! Typed config tree and template-driven loading.
//!
//! A config directory holds `k.yaml` (the root document) and one
//! `<name>.yaml` per app. Every document is executed as a tera template
//! before parsing: the root with an empty context, app documents with the
//! root `Vars` as context. Callers register template functions (notably
//! `decrypt`) through the `register` hook of [`load`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

/// Free-form variables available to every app template.
pub type Vars = std::collections::BTreeMap<String, serde_yaml::Value>;
/// Unit filename → unit body.
pub type Units = std::collections::BTreeMap<String, Unit>;
/// Section name → section body.
pub type Unit = std::collections::BTreeMap<String, Section>;
/// Directive key → scalar, list of scalars, or null.
pub type Section = std::collections::BTreeMap<String, serde_yaml::Value>;

const K_FILE: &str = "k.yaml";

/// The root config record, parsed from `k.yaml`.
///
/// `dir` and `apps` are filled in by [`load`], not by the document itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Config {
    pub dir: PathBuf,
    pub vars: Vars,
    pub user: String,
    pub host: String,
    pub server: ServerConfig,
    pub tunnel: Tunnel,
    pub apps: std::collections::BTreeMap<String, App>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dir: PathBuf::new(),
            vars: Vars::new(),
            user: "root".to_string(),
            host: String::new(),
            server: ServerConfig::default(),
            tunnel: Tunnel::default(),
            apps: std::collections::BTreeMap::new(),
        }
    }
}

/// Loopback route exposed while `k tunnel` is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Tunnel {
    pub pattern: String,
    pub address: String,
}

impl Default for Tunnel {
    fn default() -> Self {
        Tunnel {
            pattern: String::new(),
            address: "localhost:9999".to_string(),
        }
    }
}

/// Router config — ports, ACME parameters, and the route table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "HTTP")]
    pub http: u16,
    #[serde(rename = "HTTPS")]
    pub https: u16,
    #[serde(rename = "LetsEncryptEmail")]
    pub lets_encrypt_email: String,
    #[serde(rename = "LetsEncryptCachePath")]
    pub lets_encrypt_cache_path: String,
    #[serde(rename = "Routes")]
    pub routes: Vec<Route>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http: 80,
            https: 443,
            lets_encrypt_email: String::new(),
            lets_encrypt_cache_path: "/var/cache/k-http/autocert-cache".to_string(),
            routes: Vec::new(),
        }
    }
}

/// One routing rule: host+path patterns mapped to a static directory
/// (absolute path target) or an upstream URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Route {
    pub patterns: Vec<String>,
    pub target: String,
    pub basic_auth: BasicAuth,
    pub log_format: String,
    pub log_fields: std::collections::BTreeMap<String, String>,
    /// HTTP status → redirect target; key 0 is the default for any status.
    pub err_paths: std::collections::BTreeMap<u16, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
    pub realm: String,
}

impl BasicAuth {
    pub fn is_empty(&self) -> bool {
        *self == BasicAuth::default()
    }
}

/// A named collection of units, routes, and deploy hooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct App {
    pub units: Units,
    pub routes: Vec<Route>,
    pub build: Option<String>,
    pub deploy: Option<String>,
    pub env: std::collections::BTreeMap<String, String>,
    pub dependencies: Vec<String>,
}

/// Load and validate the config tree under `dir`.
///
/// `register` is called once per document with the tera instance about to
/// execute it; use it to add template functions such as `decrypt`.
pub fn load(dir: &Path, register: impl Fn(&mut tera::Tera)) -> Result<Config, ConfigError> {
    let dir = std::fs::canonicalize(dir).map_err(|e| io_err(dir, e))?;
    let root_path = dir.join(K_FILE);
    let text = expand(&root_path, &register, &tera::Context::new())?;
    let mut c: Config = serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: root_path,
        source: e,
    })?;
    c.dir = dir.clone();
    c.apps = parse_apps(&dir, &register, &c.vars)?;
    Ok(c)
}

fn parse_apps(
    dir: &Path,
    register: &impl Fn(&mut tera::Tera),
    vars: &Vars,
) -> Result<std::collections::BTreeMap<String, App>, ConfigError> {
    let ctx = tera::Context::from_serialize(vars).map_err(|e| ConfigError::Template {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut apps = std::collections::BTreeMap::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if name == "k" {
            continue;
        }
        apps.insert(name.to_string(), parse_app(&path, register, &ctx)?);
    }
    for name in apps.keys() {
        let mut seen = std::collections::BTreeSet::from([name.clone()]);
        check_deps(name, &apps, &mut seen)?;
    }
    Ok(apps)
}

fn parse_app(
    path: &Path,
    register: &impl Fn(&mut tera::Tera),
    ctx: &tera::Context,
) -> Result<App, ConfigError> {
    let text = expand(path, register, ctx)?;
    // An empty document is a unitless app, not a parse error.
    let app: App = if text.trim().is_empty() {
        App::default()
    } else {
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?
    };
    if app.build.is_some() && app.deploy.is_some() {
        return Err(ConfigError::BuildDeployConflict(
            path.display().to_string(),
        ));
    }
    Ok(app)
}

/// Every app referenced by `name`'s dependency tree must exist and must not
/// be visited twice within one walk.
fn check_deps(
    name: &str,
    apps: &std::collections::BTreeMap<String, App>,
    seen: &mut std::collections::BTreeSet<String>,
) -> Result<(), ConfigError> {
    let Some(app) = apps.get(name) else {
        return Ok(());
    };
    for dep in &app.dependencies {
        if !apps.contains_key(dep) {
            return Err(ConfigError::UnknownDependency(dep.clone()));
        }
        if !seen.insert(dep.clone()) {
            return Err(ConfigError::RecursiveDependency(dep.clone()));
        }
        check_deps(dep, apps, seen)?;
    }
    Ok(())
}

fn expand(
    path: &Path,
    register: &impl Fn(&mut tera::Tera),
    ctx: &tera::Context,
) -> Result<String, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let mut tera = tera::Tera::default();
    register(&mut tera);
    let name = path.display().to_string();
    tera.add_raw_template(&name, &contents)
        .map_err(|e| ConfigError::Template {
            path: path.to_path_buf(),
            source: e,
        })?;
    tera.render(&name, ctx).map_err(|e| ConfigError::Template {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
