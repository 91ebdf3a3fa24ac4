//! Layered application configuration.
//!
//! Layers are merged in this order, later layers overriding earlier ones:
//! properties set on the [`App`](super::App), local `app.*` files under the
//! config directory (profile files after the plain ones), imported sources,
//! `GS_` environment variables and finally `-D key=value` command line
//! arguments.

use tracing::debug;

use crate::error::{ErrorContext, Result};
use crate::props::{self, Properties};
use crate::{ACTIVE_PROFILES_PROP, CONFIG_DIR_PROP, IMPORTS_PROP};

const ENV_PREFIX: &str = "GS_";

const LOCAL_EXTS: &[&str] = &[".properties", ".yaml", ".yml", ".toml", ".tml", ".json"];

/// Sources of the application's property snapshot.
///
/// # Examples
///
/// ```rust
/// use springlet::AppConfig;
///
/// let mut cfg = AppConfig::new()
///     .with_env([("GS_SERVER_ADDR", ":8081")])
///     .with_args(["-D", "debug"]);
/// cfg.property("server.addr", ":8080").unwrap();
/// cfg.property("spring.app.config.dir", "/no/such/dir").unwrap();
///
/// let p = cfg.refresh().unwrap();
/// assert_eq!(p.get("server.addr").as_deref(), Some(":8081"));
/// assert_eq!(p.get("debug").as_deref(), Some("true"));
/// ```
#[derive(Clone, Debug)]
pub struct AppConfig {
    app: Properties,
    env: Vec<(String, String)>,
    args: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AppConfig {
    /// Configuration reading the process environment and arguments.
    pub fn new() -> Self {
        Self {
            app: Properties::new(),
            env: std::env::vars().collect(),
            args: std::env::args().skip(1).collect(),
        }
    }

    /// Replaces the environment variables.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Replaces the command line arguments, program name excluded.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets an application-level property, the lowest layer.
    pub fn property(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        self.app.insert(key, value)
    }

    /// Merges all layers into a fresh snapshot.
    pub fn refresh(&self) -> Result<Properties> {
        let env = self.env_properties().context("refresh error in source env")?;
        let cmd = self.cmd_properties().context("refresh error in source cmd")?;

        // Locations and profiles may come from any layer but the files.
        let mut bootstrap = Properties::new();
        merge(&mut bootstrap, &self.app, "app")?;
        merge(&mut bootstrap, &env, "env")?;
        merge(&mut bootstrap, &cmd, "cmd")?;

        let local = local_properties(&bootstrap).context("refresh error in source local")?;
        let mut staged = Properties::new();
        merge(&mut staged, &self.app, "app")?;
        merge(&mut staged, &local, "local")?;
        merge(&mut staged, &env, "env")?;
        merge(&mut staged, &cmd, "cmd")?;
        let imports = import_properties(&staged).context("refresh error in source import")?;

        let mut out = Properties::new();
        merge(&mut out, &self.app, "app")?;
        merge(&mut out, &local, "local")?;
        merge(&mut out, &imports, "import")?;
        merge(&mut out, &env, "env")?;
        merge(&mut out, &cmd, "cmd")?;
        Ok(out)
    }

    fn env_properties(&self) -> Result<Properties> {
        let mut p = Properties::new();
        for (k, v) in &self.env {
            let Some(rest) = k.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            p.insert(&rest.replace('_', ".").to_lowercase(), v.as_str())?;
        }
        Ok(p)
    }

    fn cmd_properties(&self) -> Result<Properties> {
        let mut p = Properties::new();
        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            let pair = if arg == "-D" {
                match args.next() {
                    Some(next) => next.as_str(),
                    None => break,
                }
            } else if let Some(rest) = arg.strip_prefix("-D") {
                rest
            } else {
                continue;
            };
            let (k, v) = pair.split_once('=').unwrap_or((pair, "true"));
            p.insert(k.trim(), v)?;
        }
        Ok(p)
    }
}

fn merge(out: &mut Properties, layer: &Properties, name: &str) -> Result<()> {
    out.merge(layer)
        .with_context(|| format!("merge error in source {}", name))
}

/// Active profiles from `spring.profiles.active`.
pub(crate) fn profiles(p: &Properties) -> Vec<String> {
    p.get_or(ACTIVE_PROFILES_PROP, "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolved `spring.app.config.dir`.
pub(crate) fn config_dir(p: &Properties) -> Result<String> {
    p.resolve(&format!("${{{}:=./conf}}", CONFIG_DIR_PROP))
}

fn local_properties(bootstrap: &Properties) -> Result<Properties> {
    let dir = config_dir(bootstrap)?;
    let mut names = vec!["app".to_string()];
    names.extend(profiles(bootstrap).into_iter().map(|p| format!("app-{}", p)));

    let mut out = Properties::new();
    for name in names {
        for ext in LOCAL_EXTS {
            let path = format!("{}/{}{}", dir, name, ext);
            let Some(p) = props::provider::load_file(true, &path)? else {
                continue;
            };
            debug!(target: "springlet::config", file = %path, "config file loaded");
            out.merge(&p)?;
        }
    }
    Ok(out)
}

fn import_properties(staged: &Properties) -> Result<Properties> {
    let sources: Vec<String> = if staged.has(IMPORTS_PROP) {
        staged.bind(&format!("${{{}}}", IMPORTS_PROP))?
    } else {
        Vec::new()
    };
    let mut out = Properties::new();
    for source in sources.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some(p) = props::load(source)? {
            debug!(target: "springlet::config", source, "config imported");
            out.merge(&p)?;
        }
    }
    Ok(out)
}
