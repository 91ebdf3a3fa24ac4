//! Configuration source providers.
//!
//! A source string has the form `[optional:]provider:path`; a bare path
//! uses the `file` provider. Missing optional sources load as `None`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::reader::read_file;
use super::Properties;
use crate::error::{Error, Result};

/// Loads a source; the flag tells whether the source is optional.
pub type Provider = Arc<dyn Fn(bool, &str) -> Result<Option<Properties>> + Send + Sync>;

static PROVIDERS: Lazy<RwLock<HashMap<String, Provider>>> = Lazy::new(|| {
    let mut m: HashMap<String, Provider> = HashMap::new();
    let file: Provider = Arc::new(load_file);
    m.insert("file".into(), file);
    RwLock::new(m)
});

/// Registers a provider under `name`.
pub fn register_provider<F>(name: &str, provider: F)
where
    F: Fn(bool, &str) -> Result<Option<Properties>> + Send + Sync + 'static,
{
    PROVIDERS.write().insert(name.to_string(), Arc::new(provider));
}

/// Loads a configuration source.
///
/// ```rust
/// use springlet::props::load;
///
/// assert!(load("optional:file:/no/such/app.yaml").unwrap().is_none());
/// let err = load("consul:app").unwrap_err();
/// assert_eq!(err.to_string(), "read config app error: unsupported provider type consul");
/// ```
pub fn load(source: &str) -> Result<Option<Properties>> {
    let (optional, rest) = match source.strip_prefix("optional:") {
        Some(rest) => (true, rest),
        None => (false, source),
    };
    let (provider, path) = rest.split_once(':').unwrap_or(("file", rest));
    if path.is_empty() {
        return Err(Error::msg(format!("invalid config source {}", source))
            .wrap(format!("read config {} error", source)));
    }
    let p = PROVIDERS.read().get(provider).cloned();
    match p {
        Some(p) => p(optional, path),
        None => Err(Error::msg(format!("unsupported provider type {}", provider))
            .wrap(format!("read config {} error", path))),
    }
}

/// The `file` provider.
pub fn load_file(optional: bool, source: &str) -> Result<Option<Properties>> {
    let data = match read_file(Path::new(source)) {
        Ok(data) => data,
        Err(e) if optional && e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut p = Properties::new();
    let file = p.add_file(source);
    for (k, v) in data {
        p.set(&k, v, file)?;
    }
    Ok(Some(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_file_records_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "server:\n  addr: \":8080\"").unwrap();
        let source = path.display().to_string();
        let p = load(&source).unwrap().unwrap();
        assert_eq!(p.get("server.addr").as_deref(), Some(":8080"));
        assert_eq!(p.source_of("server.addr"), Some(source.as_str()));
    }

    #[test]
    fn test_required_missing_file_is_not_found() {
        let err = load("file:/definitely/missing/app.json").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_custom_provider() {
        register_provider("memory", |_, path| {
            Ok(Some(Properties::from_pairs([("source", path.to_string())])?))
        });
        let p = load("memory:abc").unwrap().unwrap();
        assert_eq!(p.get("source").as_deref(), Some("abc"));
    }
}
