//! Hierarchical property store.
//!
//! Properties are kept as a tree of maps, arrays and string leaves.
//! The tree is what lets the store reject structurally incompatible
//! definitions: once `a.b` holds a value, nobody may define `a.b.c` or
//! `a.b[0]`, and the other way around. Readers flatten nested documents
//! into `a.b[0].c` style keys before they are set.
//!
//! # Examples
//!
//! ```rust
//! use springlet::Properties;
//!
//! let mut p = Properties::new();
//! p.insert("http.server.addr", ":8080").unwrap();
//! p.insert("http.server.timeout", "5s").unwrap();
//!
//! assert!(p.has("http.server"));
//! assert_eq!(p.get("http.server.addr").as_deref(), Some(":8080"));
//! assert_eq!(p.sub_keys("http.server").unwrap(), vec!["addr", "timeout"]);
//!
//! // a scalar may not become a parent of other keys
//! let err = p.insert("http.server.addr.port", "1").unwrap_err();
//! assert_eq!(err.to_string(), "property conflict at path http.server.addr");
//! ```

pub(crate) mod bind;
pub(crate) mod path;
pub mod provider;
pub mod reader;
pub(crate) mod resolve;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::error::{Error, ErrorContext, Result};
use path::{child_index, child_key, join_path, split_path, PathElem};

pub use bind::{register_splitter, BindTag, Splitter};
pub use provider::{load, register_provider, Provider};
pub use reader::{read_file, register_reader, Reader};

/// A node of the property tree.
#[derive(Clone, Debug)]
pub(crate) enum Node {
    Leaf { value: String, file: usize },
    Map(BTreeMap<String, Node>),
    Array(BTreeMap<usize, Node>),
}

impl Node {
    fn empty_for(elem: &PathElem) -> Node {
        match elem {
            PathElem::Key(_) => Node::Map(BTreeMap::new()),
            PathElem::Index(_) => Node::Array(BTreeMap::new()),
        }
    }
}

/// Flattened, conflict-checked key/value configuration with per-key source
/// file provenance.
#[derive(Clone, Debug)]
pub struct Properties {
    root: Node,
    files: Vec<String>,
}

impl Default for Properties {
    fn default() -> Self {
        Self::new()
    }
}

impl Properties {
    /// Creates an empty property set.
    pub fn new() -> Self {
        Self {
            root: Node::Map(BTreeMap::new()),
            files: Vec::new(),
        }
    }

    /// Builds a property set from flat key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut p = Self::new();
        for (k, v) in pairs {
            p.insert(k.as_ref(), v)?;
        }
        Ok(p)
    }

    /// Registers a source file name and returns its id.
    pub fn add_file(&mut self, file: &str) -> usize {
        if let Some(i) = self.files.iter().position(|f| f == file) {
            return i;
        }
        self.files.push(file.to_string());
        self.files.len() - 1
    }

    /// Sets a property without source information.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        let file = self.add_file("");
        self.set(key, value, file)
    }

    /// Sets a property recorded as coming from file `file`.
    ///
    /// Replacing an existing value is allowed; turning a value into a
    /// parent (or a parent into a value, or a map into an array) is not.
    pub fn set(&mut self, key: &str, value: impl Into<String>, file: usize) -> Result<()> {
        let path = split_path(key)?;
        let conflict = || Error::PropertyConflict(key.to_string());
        let value = value.into();
        let last = path.len() - 1;

        let mut node = &mut self.root;
        for (i, elem) in path.iter().enumerate() {
            let slot = match (node, elem) {
                (Node::Map(m), PathElem::Key(k)) => {
                    if i == last {
                        return match m.get_mut(k) {
                            Some(Node::Leaf { value: v, file: f }) => {
                                *v = value;
                                *f = file;
                                Ok(())
                            }
                            Some(_) => Err(conflict()),
                            None => {
                                m.insert(k.clone(), Node::Leaf { value, file });
                                Ok(())
                            }
                        };
                    }
                    m.entry(k.clone())
                        .or_insert_with(|| Node::empty_for(&path[i + 1]))
                }
                (Node::Array(a), PathElem::Index(idx)) => {
                    if i == last {
                        return match a.get_mut(idx) {
                            Some(Node::Leaf { value: v, file: f }) => {
                                *v = value;
                                *f = file;
                                Ok(())
                            }
                            Some(_) => Err(conflict()),
                            None => {
                                a.insert(*idx, Node::Leaf { value, file });
                                Ok(())
                            }
                        };
                    }
                    a.entry(*idx)
                        .or_insert_with(|| Node::empty_for(&path[i + 1]))
                }
                // The node at path[..i] has the wrong shape.
                _ => return Err(Error::PropertyConflict(join_path(&path[..i]))),
            };
            node = slot;
        }
        Ok(())
    }

    pub(crate) fn node(&self, key: &str) -> Option<&Node> {
        if key.is_empty() {
            return Some(&self.root);
        }
        let path = split_path(key).ok()?;
        let mut node = &self.root;
        for elem in &path {
            node = match (node, elem) {
                (Node::Map(m), PathElem::Key(k)) => m.get(k)?,
                (Node::Array(a), PathElem::Index(i)) => a.get(i)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Returns true if `key` holds a value or is the parent of other keys.
    pub fn has(&self, key: &str) -> bool {
        !key.is_empty() && self.node(key).is_some()
    }

    /// Returns the raw (unresolved) value of a leaf key.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.node(key) {
            Some(Node::Leaf { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns the value of `key`, or `def` when it is absent or not a leaf.
    pub fn get_or(&self, key: &str, def: &str) -> String {
        self.get(key).unwrap_or_else(|| def.to_string())
    }

    /// Returns the source file that defined a leaf key.
    pub fn source_of(&self, key: &str) -> Option<&str> {
        match self.node(key) {
            Some(Node::Leaf { file, .. }) => self.files.get(*file).map(String::as_str),
            _ => None,
        }
    }

    /// All leaf keys in canonical form.
    pub fn keys(&self) -> Vec<String> {
        let mut out = Vec::new();
        walk_leaves(&self.root, "", &mut |k, _, _| out.push(k.to_string()));
        out
    }

    /// All leaf keys with their raw values.
    pub fn data(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        walk_leaves(&self.root, "", &mut |k, v, _| {
            out.insert(k.to_string(), v.to_string());
        });
        out
    }

    pub fn len(&self) -> usize {
        let mut n = 0;
        walk_leaves(&self.root, "", &mut |_, _, _| n += 1);
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted direct children of `key`. Array children are reported as
    /// their indexes. An absent key has no children.
    pub fn sub_keys(&self, key: &str) -> Result<Vec<String>> {
        match self.node(key) {
            None => Ok(Vec::new()),
            Some(Node::Leaf { .. }) => Err(Error::PropertyConflict(key.to_string())),
            Some(Node::Map(m)) => Ok(m.keys().cloned().collect()),
            Some(Node::Array(a)) => Ok(a.keys().map(|i| i.to_string()).collect()),
        }
    }

    /// Flat map of every leaf under `key`, keyed relative to it.
    pub fn sub_map(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        match self.node(key) {
            None => {}
            Some(Node::Leaf { .. }) => return Err(Error::PropertyConflict(key.to_string())),
            Some(node) => walk_leaves(node, "", &mut |k, v, _| {
                out.insert(k.to_string(), v.to_string());
            }),
        }
        Ok(out)
    }

    /// Replaces every `${key:=default}` placeholder in `s`.
    ///
    /// ```rust
    /// use springlet::Properties;
    ///
    /// let p = Properties::from_pairs([("b", "x")]).unwrap();
    /// assert_eq!(p.resolve("${a:=${b:=c}}").unwrap(), "x");
    /// assert_eq!(
    ///     p.resolve("${a}").unwrap_err().to_string(),
    ///     "resolve string \"${a}\" error: property \"a\" not exist"
    /// );
    /// ```
    pub fn resolve(&self, s: &str) -> Result<String> {
        resolve::resolve_string(self, s)
            .with_context(|| format!("resolve string \"{}\" error", s))
    }

    /// Deserializes the subtree named by `tag` into `T`.
    ///
    /// The tag has the form `${key[:=default]}[>>splitter]`; an empty tag
    /// binds the whole property set.
    pub fn bind<T: DeserializeOwned>(&self, tag: &str) -> Result<T> {
        let parsed = if tag.is_empty() {
            BindTag::root()
        } else {
            BindTag::parse(tag)?
        };
        bind::bind_value(self, &parsed)
    }

    /// Copies every property of `self` into `out`, keeping provenance.
    pub fn copy_to(&self, out: &mut Properties) -> Result<()> {
        let mut pending = Vec::new();
        walk_leaves(&self.root, "", &mut |k, v, file| {
            pending.push((k.to_string(), v.to_string(), file));
        });
        for (k, v, file) in pending {
            let name = self.files.get(file).map(String::as_str).unwrap_or("");
            let id = out.add_file(name);
            out.set(&k, v, id)?;
        }
        Ok(())
    }

    /// Merges `other` over `self`; later values win for plain overrides.
    pub fn merge(&mut self, other: &Properties) -> Result<()> {
        other.copy_to(self)
    }
}

fn walk_leaves<F>(node: &Node, prefix: &str, f: &mut F)
where
    F: FnMut(&str, &str, usize),
{
    match node {
        Node::Leaf { value, file } => f(prefix, value, *file),
        Node::Map(m) => {
            for (k, child) in m {
                walk_leaves(child, &child_key(prefix, k), f);
            }
        }
        Node::Array(a) => {
            for (i, child) in a {
                walk_leaves(child, &child_index(prefix, *i), f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_then_branch_conflicts() {
        let mut p = Properties::new();
        p.insert("a", "123").unwrap();
        let err = p.insert("a.b", "456").unwrap_err();
        assert_eq!(err.to_string(), "property conflict at path a");
    }

    #[test]
    fn test_array_then_map_conflicts() {
        let mut p = Properties::new();
        p.insert("http.server[0].addr", "0.0.0.0:8080").unwrap();
        let err = p.insert("http.server.addr", "b").unwrap_err();
        assert_eq!(err.to_string(), "property conflict at path http.server");
    }

    #[test]
    fn test_scalar_override_last_writer_wins() {
        let mut p = Properties::new();
        let f1 = p.add_file("a.yaml");
        let f2 = p.add_file("b.yaml");
        p.set("k", "1", f1).unwrap();
        p.set("k", "2", f2).unwrap();
        assert_eq!(p.get("k").as_deref(), Some("2"));
        assert_eq!(p.source_of("k"), Some("b.yaml"));
    }

    #[test]
    fn test_sub_keys_and_sub_map() {
        let p = Properties::from_pairs([
            ("m.b", "2"),
            ("m.a", "1"),
            ("s[1]", "y"),
            ("s[0]", "x"),
        ])
        .unwrap();
        assert_eq!(p.sub_keys("m").unwrap(), vec!["a", "b"]);
        assert_eq!(p.sub_keys("s").unwrap(), vec!["0", "1"]);
        assert!(p.sub_keys("missing").unwrap().is_empty());
        assert!(p.sub_keys("m.a").is_err());
        let m = p.sub_map("m").unwrap();
        assert_eq!(m.get("a").map(String::as_str), Some("1"));
        assert_eq!(p.keys(), vec!["m.a", "m.b", "s[0]", "s[1]"]);
    }

    #[test]
    fn test_has_covers_branches() {
        let p = Properties::from_pairs([("a.b[0].c", "v")]).unwrap();
        assert!(p.has("a"));
        assert!(p.has("a.b"));
        assert!(p.has("a.b[0]"));
        assert!(p.has("a.b[0].c"));
        assert!(!p.has("a.c"));
        assert!(!p.has(""));
        assert_eq!(p.get("a.b"), None);
        assert_eq!(p.get_or("a.b", "d"), "d");
    }

    #[test]
    fn test_merge_keeps_provenance() {
        let mut base = Properties::new();
        let id = base.add_file("app.yaml");
        base.set("a", "1", id).unwrap();
        let mut over = Properties::new();
        let id = over.add_file("env");
        over.set("a", "2", id).unwrap();
        over.set("b", "3", id).unwrap();
        base.merge(&over).unwrap();
        assert_eq!(base.get("a").as_deref(), Some("2"));
        assert_eq!(base.source_of("b"), Some("env"));
    }
}
