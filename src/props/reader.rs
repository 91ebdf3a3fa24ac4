//! File readers keyed by extension.
//!
//! A reader turns raw bytes into flat `key -> value` pairs. Built in:
//! `.properties`, `.yaml`/`.yml`, `.toml`/`.tml` and `.json`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::path::{child_index, child_key};
use crate::error::{Error, ErrorContext, Result};

/// Parses file content into flattened properties.
pub type Reader = Arc<dyn Fn(&[u8]) -> Result<BTreeMap<String, String>> + Send + Sync>;

static READERS: Lazy<RwLock<HashMap<String, Reader>>> = Lazy::new(|| {
    let mut m: HashMap<String, Reader> = HashMap::new();
    let props: Reader = Arc::new(read_properties);
    let yaml: Reader = Arc::new(read_yaml);
    let toml: Reader = Arc::new(read_toml);
    let json: Reader = Arc::new(read_json);
    m.insert(".properties".into(), props);
    m.insert(".yaml".into(), yaml.clone());
    m.insert(".yml".into(), yaml);
    m.insert(".toml".into(), toml.clone());
    m.insert(".tml".into(), toml);
    m.insert(".json".into(), json);
    RwLock::new(m)
});

/// Registers `reader` for each extension (with leading dot, e.g. `.ini`).
pub fn register_reader<F>(reader: F, exts: &[&str])
where
    F: Fn(&[u8]) -> Result<BTreeMap<String, String>> + Send + Sync + 'static,
{
    let reader: Reader = Arc::new(reader);
    let mut readers = READERS.write();
    for ext in exts {
        readers.insert(ext.to_string(), reader.clone());
    }
}

/// Reads and flattens a configuration file using the reader for its extension.
pub fn read_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let display = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let reader = READERS.read().get(&ext).cloned();
    let reader = reader.ok_or_else(|| {
        Error::msg(format!("unsupported file type {}", ext))
            .wrap(format!("read file {} error", display))
    })?;
    reader(&bytes).with_context(|| format!("read file {} error", display))
}

fn parse_error(format: &str, e: impl std::fmt::Display) -> Error {
    Error::Parse {
        path: format.to_string(),
        message: e.to_string(),
    }
}

/// Java-style `.properties`: `key=value` or `key: value`, `#`/`!` comments,
/// trailing `\` continues a line.
pub(crate) fn read_properties(b: &[u8]) -> Result<BTreeMap<String, String>> {
    let text = std::str::from_utf8(b).map_err(|e| parse_error("properties", e))?;
    let mut out = BTreeMap::new();
    let mut logical = String::new();
    for raw in text.lines() {
        let line = raw.trim_start();
        if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            logical.push_str(stripped);
            continue;
        }
        logical.push_str(line);
        let entry = std::mem::take(&mut logical);
        let split = entry.find(|c| c == '=' || c == ':');
        let (k, v) = match split {
            Some(i) => (&entry[..i], &entry[i + 1..]),
            None => (entry.as_str(), ""),
        };
        out.insert(k.trim().to_string(), v.trim().to_string());
    }
    if !logical.is_empty() {
        return Err(parse_error("properties", "unterminated line continuation"));
    }
    Ok(out)
}

pub(crate) fn read_yaml(b: &[u8]) -> Result<BTreeMap<String, String>> {
    let v: serde_yaml::Value = serde_yaml::from_slice(b).map_err(|e| parse_error("yaml", e))?;
    let mut out = BTreeMap::new();
    match v {
        serde_yaml::Value::Null => {}
        serde_yaml::Value::Mapping(_) => flatten_yaml(&v, "", &mut out)?,
        _ => return Err(parse_error("yaml", "top level must be a mapping")),
    }
    Ok(out)
}

fn flatten_yaml(v: &serde_yaml::Value, prefix: &str, out: &mut BTreeMap<String, String>) -> Result<()> {
    use serde_yaml::Value;
    match v {
        Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Sequence(seq) => {
            for (i, item) in seq.iter().enumerate() {
                flatten_yaml(item, &child_index(prefix, i), out)?;
            }
        }
        Value::Mapping(m) => {
            for (k, item) in m {
                let key = match k {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err(parse_error("yaml", "mapping keys must be scalars")),
                };
                flatten_yaml(item, &child_key(prefix, &key), out)?;
            }
        }
        Value::Tagged(t) => flatten_yaml(&t.value, prefix, out)?,
    }
    Ok(())
}

pub(crate) fn read_toml(b: &[u8]) -> Result<BTreeMap<String, String>> {
    let text = std::str::from_utf8(b).map_err(|e| parse_error("toml", e))?;
    let table: toml::Table = toml::from_str(text).map_err(|e| parse_error("toml", e))?;
    let mut out = BTreeMap::new();
    for (k, v) in &table {
        flatten_toml(v, k, &mut out);
    }
    Ok(out)
}

fn flatten_toml(v: &toml::Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    use toml::Value;
    match v {
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Integer(i) => {
            out.insert(prefix.to_string(), i.to_string());
        }
        Value::Float(f) => {
            out.insert(prefix.to_string(), f.to_string());
        }
        Value::Boolean(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Datetime(d) => {
            out.insert(prefix.to_string(), d.to_string());
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_toml(item, &child_index(prefix, i), out);
            }
        }
        Value::Table(t) => {
            for (k, item) in t {
                flatten_toml(item, &child_key(prefix, k), out);
            }
        }
    }
}

pub(crate) fn read_json(b: &[u8]) -> Result<BTreeMap<String, String>> {
    let v: serde_json::Value = serde_json::from_slice(b).map_err(|e| parse_error("json", e))?;
    let mut out = BTreeMap::new();
    match &v {
        serde_json::Value::Object(m) => {
            for (k, item) in m {
                flatten_json(item, k, &mut out);
            }
        }
        _ => return Err(parse_error("json", "top level must be an object")),
    }
    Ok(out)
}

fn flatten_json(v: &serde_json::Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    use serde_json::Value;
    match v {
        Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_json(item, &child_index(prefix, i), out);
            }
        }
        Value::Object(m) => {
            for (k, item) in m {
                flatten_json(item, &child_key(prefix, k), out);
            }
        }
    }
}
