//! The logging collaborator.
//!
//! The application configures logging once its properties are known: a
//! `logging` sub-map in the properties wins, otherwise a single
//! `log-{profile}.*` or `log.*` file in the config directory is used.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use super::config::{config_dir, profiles};
use crate::error::{Error, ErrorContext, Result};
use crate::props::{read_file, Properties};

const LOG_EXTS: &[&str] = &[".properties", ".yaml", ".yml", ".json", ".toml"];

/// A logging system the application can configure and tear down.
pub trait LogBackend: Send + Sync {
    /// Applies a flat configuration map such as `{level: debug, format: json}`.
    fn refresh(&self, config: &BTreeMap<String, String>) -> Result<()>;

    /// Applies the configuration stored in a file.
    fn refresh_file(&self, path: &Path) -> Result<()>;

    /// Flushes and releases the backend at shutdown.
    fn destroy(&self) {}
}

/// [`LogBackend`] installing a global `tracing-subscriber` formatter.
///
/// Recognized keys: `level` (an `EnvFilter` directive, default `info`),
/// `format` (`plain` or `json`), `ansi` and `target` (booleans). Only the
/// first installation in a process takes effect.
#[derive(Debug, Default)]
pub struct TracingBackend;

fn flag(config: &BTreeMap<String, String>, key: &str, def: bool) -> Result<bool> {
    match config.get(key) {
        None => Ok(def),
        Some(v) => v
            .parse()
            .map_err(|_| Error::msg(format!("invalid logging.{} value {}", key, v))),
    }
}

impl LogBackend for TracingBackend {
    fn refresh(&self, config: &BTreeMap<String, String>) -> Result<()> {
        let level = config.get("level").map(String::as_str).unwrap_or("info");
        let filter = EnvFilter::try_new(level)
            .map_err(|e| Error::msg(format!("invalid logging.level {}: {}", level, e)))?;
        let ansi = flag(config, "ansi", true)?;
        let target = flag(config, "target", true)?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(ansi)
            .with_target(target);
        let installed = match config.get("format").map(String::as_str) {
            None | Some("plain") => builder.try_init(),
            Some("json") => builder.json().try_init(),
            Some(other) => return Err(Error::msg(format!("unknown logging.format {}", other))),
        };
        if installed.is_err() {
            debug!(target: "springlet::app", "a global logger is already installed");
        }
        Ok(())
    }

    fn refresh_file(&self, path: &Path) -> Result<()> {
        let config = read_file(path)?;
        self.refresh(&config)
    }
}

/// Candidate log configuration files, profile files first.
fn log_files(dir: &str, profiles: &[String]) -> Vec<PathBuf> {
    let mut names: Vec<String> = profiles.iter().map(|p| format!("log-{}", p)).collect();
    names.push("log".to_string());
    let mut found = Vec::new();
    for name in names {
        for ext in LOG_EXTS {
            let path = Path::new(dir).join(format!("{}{}", name, ext));
            if path.is_file() {
                found.push(path);
            }
        }
    }
    found
}

pub(crate) fn init_log(backend: &dyn LogBackend, props: &Properties) -> Result<()> {
    if props.has("logging") {
        let config = props.sub_map("logging")?;
        return backend.refresh(&config).context("refresh logging config error");
    }
    let dir = config_dir(props)?;
    let files = log_files(&dir, &profiles(props));
    match files.as_slice() {
        [] => {
            info!(target: "springlet::app", "no log configuration file found, using default logger");
            Ok(())
        }
        [file] => backend
            .refresh_file(file)
            .with_context(|| format!("refresh log file {} error", file.display())),
        _ => {
            let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
            Err(Error::msg(format!("multiple log files found: [{}]", names.join(", "))))
        }
    }
}
