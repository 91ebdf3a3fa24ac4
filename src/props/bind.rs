//! Structural binding of property subtrees through `serde`.
//!
//! Leaves are strings; they are resolved for placeholders and coerced to
//! whatever scalar the target asks for. Arrays bind to sequences by index,
//! maps and structs bind by sub-key. A scalar bound to a sequence is split,
//! on commas by default or with a registered splitter named in the tag.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::de::{self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor};

use super::path::{child_index, child_key};
use super::resolve::{find_close, split_default};
use super::{Node, Properties};
use crate::error::{Error, Result};
use crate::key::short_type_name;

/// Splits one property value into several.
pub type Splitter = Arc<dyn Fn(&str) -> Result<Vec<String>> + Send + Sync>;

static SPLITTERS: Lazy<RwLock<HashMap<String, Splitter>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a splitter usable as `${key}>>name` in bind tags.
///
/// ```rust
/// use springlet::{register_splitter, Properties};
///
/// register_splitter("semicolon", |s| Ok(s.split(';').map(str::to_string).collect()));
///
/// let p = Properties::from_pairs([("hosts", "a;b;c")]).unwrap();
/// let hosts: Vec<String> = p.bind("${hosts}>>semicolon").unwrap();
/// assert_eq!(hosts, vec!["a", "b", "c"]);
/// ```
pub fn register_splitter<F>(name: &str, f: F)
where
    F: Fn(&str) -> Result<Vec<String>> + Send + Sync + 'static,
{
    SPLITTERS.write().insert(name.to_string(), Arc::new(f));
}

fn splitter(name: &str) -> Option<Splitter> {
    SPLITTERS.read().get(name).cloned()
}

/// Parsed `${key[:=default]}[>>splitter]` tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindTag {
    /// Property key; empty for the whole property set.
    pub key: String,
    pub default: Option<String>,
    pub splitter: Option<String>,
}

impl BindTag {
    /// Tag binding the whole property set.
    pub fn root() -> Self {
        Self {
            key: String::new(),
            default: None,
            splitter: None,
        }
    }

    /// Parses a bind tag.
    ///
    /// ```rust
    /// use springlet::BindTag;
    ///
    /// let tag = BindTag::parse("${db.hosts:=a,b}>>csv").unwrap();
    /// assert_eq!(tag.key, "db.hosts");
    /// assert_eq!(tag.default.as_deref(), Some("a,b"));
    /// assert_eq!(tag.splitter.as_deref(), Some("csv"));
    /// assert!(BindTag::parse("db.hosts").is_err());
    /// ```
    pub fn parse(tag: &str) -> Result<Self> {
        let invalid = || Error::msg(format!("parse tag '{}' error: invalid syntax", tag));
        let tag_trim = tag.trim();
        if !tag_trim.starts_with("${") {
            return Err(invalid());
        }
        let end = find_close(tag_trim, 0).map_err(|_| invalid())?;
        let rest = tag_trim[end + 1..].trim();
        let splitter = if rest.is_empty() {
            None
        } else if let Some(name) = rest.strip_prefix(">>") {
            Some(name.trim().to_string())
        } else {
            return Err(invalid());
        };
        let (key, default) = split_default(&tag_trim[2..end]);
        let key = key.trim();
        let key = if key == "ROOT" { "" } else { key };
        Ok(Self {
            key: key.to_string(),
            default: default.map(str::to_string),
            splitter,
        })
    }
}

impl fmt::Display for BindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}", self.key)?;
        if let Some(def) = &self.default {
            write!(f, ":={}", def)?;
        }
        f.write_str("}")?;
        if let Some(s) = &self.splitter {
            write!(f, ">>{}", s)?;
        }
        Ok(())
    }
}

/// Resolved text of a scalar tag: the property value or the default.
pub(crate) fn tag_text(p: &Properties, tag: &BindTag) -> Result<String> {
    match p.node(&tag.key) {
        Some(Node::Leaf { value, .. }) if !tag.key.is_empty() => p.resolve(value),
        Some(_) if !tag.key.is_empty() => Err(Error::msg(format!("property {} is not a value", tag.key))),
        _ => match &tag.default {
            Some(def) => p.resolve(def),
            None => Err(Error::PropertyNotExist(tag.key.clone())),
        },
    }
}

pub(crate) fn bind_value<T: DeserializeOwned>(p: &Properties, tag: &BindTag) -> Result<T> {
    let display = if tag.key.is_empty() {
        short_type_name(std::any::type_name::<T>())
    } else {
        tag.key.clone()
    };
    let node = if tag.key.is_empty() {
        Some(&p.root)
    } else {
        p.node(&tag.key)
    };
    let src = match node {
        Some(n) => Src::Node(n),
        None => match &tag.default {
            Some(def) => Src::Text(p.resolve(def)?),
            None => return Err(Error::PropertyNotExist(tag.key.clone())),
        },
    };
    let de = ValueDe {
        props: p,
        src,
        path: tag.key.clone(),
        splitter: tag.splitter.clone(),
    };
    T::deserialize(de).map_err(|e| match e {
        DeError::Prop(inner) => inner.wrap(format!("bind {} error", display)),
        DeError::Custom(message) => Error::Bind { path: display, message },
    })
}

#[derive(Debug)]
pub(crate) enum DeError {
    Custom(String),
    Prop(Error),
}

impl fmt::Display for DeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeError::Custom(s) => f.write_str(s),
            DeError::Prop(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DeError {}

impl de::Error for DeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        DeError::Custom(msg.to_string())
    }
}

enum Src<'a> {
    Node(&'a Node),
    Text(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Map,
    Array,
}

struct ValueDe<'a> {
    props: &'a Properties,
    src: Src<'a>,
    path: String,
    splitter: Option<String>,
}

impl<'a> ValueDe<'a> {
    fn kind(&self) -> Kind {
        match &self.src {
            Src::Node(Node::Map(_)) => Kind::Map,
            Src::Node(Node::Array(_)) => Kind::Array,
            _ => Kind::Text,
        }
    }

    fn text(&self) -> std::result::Result<String, DeError> {
        match &self.src {
            Src::Node(Node::Leaf { value, .. }) => self.props.resolve(value).map_err(DeError::Prop),
            Src::Text(t) => Ok(t.clone()),
            _ => Err(DeError::Custom(format!("property {} is not a value", self.path))),
        }
    }

    fn parse<T>(&self, what: &str) -> std::result::Result<T, DeError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let text = self.text()?;
        text.trim().parse::<T>().map_err(|e| {
            DeError::Custom(format!(
                "can't parse \"{}\" as {} at {}: {}",
                text, what, self.path, e
            ))
        })
    }

    fn children(&self) -> Vec<(String, String, Src<'a>)> {
        let node: &'a Node = match self.src {
            Src::Node(n) => n,
            Src::Text(_) => return Vec::new(),
        };
        match node {
            Node::Map(m) => m
                .iter()
                .map(|(k, n)| (k.clone(), child_key(&self.path, k), Src::Node(n)))
                .collect(),
            Node::Array(a) => a
                .iter()
                .map(|(i, n)| (i.to_string(), child_index(&self.path, *i), Src::Node(n)))
                .collect(),
            Node::Leaf { .. } => Vec::new(),
        }
    }

    fn split(&self) -> std::result::Result<Vec<String>, DeError> {
        let text = self.text()?;
        if let Some(name) = &self.splitter {
            let f = splitter(name)
                .ok_or_else(|| DeError::Custom(format!("splitter \"{}\" not found", name)))?;
            return f(&text).map_err(DeError::Prop);
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(text.split(',').map(|s| s.trim().to_string()).collect())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

macro_rules! deserialize_parsed {
    ($($method:ident => $visit:ident : $ty:ty),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
                visitor.$visit(self.parse::<$ty>(stringify!($ty))?)
            }
        )*
    };
}

impl<'de, 'a> de::Deserializer<'de> for ValueDe<'a> {
    type Error = DeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        match self.kind() {
            Kind::Map => self.deserialize_map(visitor),
            Kind::Array => self.deserialize_seq(visitor),
            Kind::Text => visitor.visit_string(self.text()?),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        let text = self.text()?;
        match parse_bool(&text) {
            Some(b) => visitor.visit_bool(b),
            None => Err(DeError::Custom(format!(
                "can't parse \"{}\" as bool at {}",
                text, self.path
            ))),
        }
    }

    deserialize_parsed! {
        deserialize_i8 => visit_i8: i8,
        deserialize_i16 => visit_i16: i16,
        deserialize_i32 => visit_i32: i32,
        deserialize_i64 => visit_i64: i64,
        deserialize_i128 => visit_i128: i128,
        deserialize_u8 => visit_u8: u8,
        deserialize_u16 => visit_u16: u16,
        deserialize_u32 => visit_u32: u32,
        deserialize_u64 => visit_u64: u64,
        deserialize_u128 => visit_u128: u128,
        deserialize_f32 => visit_f32: f32,
        deserialize_f64 => visit_f64: f64,
        deserialize_char => visit_char: char,
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        visitor.visit_string(self.text()?)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        visitor.visit_string(self.text()?)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        visitor.visit_byte_buf(self.text()?.into_bytes())
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        visitor.visit_byte_buf(self.text()?.into_bytes())
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        if let Src::Text(t) = &self.src {
            if t.is_empty() {
                return visitor.visit_none();
            }
        }
        visitor.visit_some(self)
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        match self.kind() {
            Kind::Array => {
                let items: Vec<(String, Src<'a>)> =
                    self.children().into_iter().map(|(_, path, src)| (path, src)).collect();
                visitor.visit_seq(SeqDe {
                    props: self.props,
                    items: items.into_iter(),
                })
            }
            Kind::Map => Err(DeError::Custom(format!(
                "property {} is a map, not a list",
                self.path
            ))),
            Kind::Text => {
                let items: Vec<(String, Src<'a>)> = self
                    .split()?
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| (child_index(&self.path, i), Src::Text(s)))
                    .collect();
                visitor.visit_seq(SeqDe {
                    props: self.props,
                    items: items.into_iter(),
                })
            }
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        match self.kind() {
            Kind::Map => visitor.visit_map(MapDe {
                props: self.props,
                items: self.children().into_iter(),
                pending: None,
            }),
            Kind::Array => Err(DeError::Custom(format!(
                "property {} is a list, not a map",
                self.path
            ))),
            Kind::Text => {
                if self.text()?.trim().is_empty() {
                    visitor.visit_map(MapDe {
                        props: self.props,
                        items: Vec::new().into_iter(),
                        pending: None,
                    })
                } else {
                    Err(DeError::Custom(format!(
                        "property {} is a value, not a map",
                        self.path
                    )))
                }
            }
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        if self.kind() != Kind::Text {
            return Err(DeError::Custom(format!(
                "property {} must be a value to bind an enum",
                self.path
            )));
        }
        let text = self.text()?;
        visitor.visit_enum(text.trim().to_string().into_deserializer())
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, DeError> {
        visitor.visit_unit()
    }
}

struct SeqDe<'a> {
    props: &'a Properties,
    items: std::vec::IntoIter<(String, Src<'a>)>,
}

impl<'de, 'a> SeqAccess<'de> for SeqDe<'a> {
    type Error = DeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> std::result::Result<Option<T::Value>, DeError> {
        match self.items.next() {
            Some((path, src)) => seed
                .deserialize(ValueDe {
                    props: self.props,
                    src,
                    path,
                    splitter: None,
                })
                .map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}

struct MapDe<'a> {
    props: &'a Properties,
    items: std::vec::IntoIter<(String, String, Src<'a>)>,
    pending: Option<(String, Src<'a>)>,
}

impl<'de, 'a> MapAccess<'de> for MapDe<'a> {
    type Error = DeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> std::result::Result<Option<K::Value>, DeError> {
        match self.items.next() {
            Some((key, path, src)) => {
                self.pending = Some((path.clone(), src));
                seed.deserialize(ValueDe {
                    props: self.props,
                    src: Src::Text(key),
                    path,
                    splitter: None,
                })
                .map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> std::result::Result<V::Value, DeError> {
        let (path, src) = self
            .pending
            .take()
            .ok_or_else(|| DeError::Custom("map value requested before key".to_string()))?;
        seed.deserialize(ValueDe {
            props: self.props,
            src,
            path,
            splitter: None,
        })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Server {
        addr: String,
        port: u16,
        #[serde(default)]
        tls: bool,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Http {
        servers: Vec<Server>,
        tags: Vec<String>,
        limits: BTreeMap<String, u32>,
    }

    fn props(pairs: &[(&str, &str)]) -> Properties {
        Properties::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn test_bind_nested_struct() {
        let p = props(&[
            ("http.servers[0].addr", "${host:=0.0.0.0}"),
            ("http.servers[0].port", "8080"),
            ("http.servers[1].addr", "127.0.0.1"),
            ("http.servers[1].port", "9090"),
            ("http.servers[1].tls", "true"),
            ("http.tags", "a, b,c"),
            ("http.limits.read", "10"),
            ("http.limits.write", "20"),
        ]);
        let http: Http = p.bind("${http}").unwrap();
        assert_eq!(http.servers.len(), 2);
        assert_eq!(http.servers[0], Server { addr: "0.0.0.0".into(), port: 8080, tls: false });
        assert!(http.servers[1].tls);
        assert_eq!(http.tags, vec!["a", "b", "c"]);
        assert_eq!(http.limits.get("write"), Some(&20));
    }

    #[test]
    fn test_bind_scalar_with_default() {
        let p = props(&[]);
        let port: u16 = p.bind("${port:=8080}").unwrap();
        assert_eq!(port, 8080);
        let err = p.bind::<u16>("${port}").unwrap_err();
        assert_eq!(err.to_string(), "property \"port\" not exist");
    }

    #[test]
    fn test_bind_coercion_error_names_path() {
        let p = props(&[("s.addr", "x"), ("s.port", "http")]);
        let err = p.bind::<Server>("${s}").unwrap_err().to_string();
        assert!(err.starts_with("bind s error"), "{}", err);
        assert!(err.contains("s.port"), "{}", err);
    }

    #[test]
    fn test_bind_missing_field() {
        let p = props(&[("s.addr", "x")]);
        let err = p.bind::<Server>("${s}").unwrap_err().to_string();
        assert!(err.contains("missing field `port`"), "{}", err);
    }

    #[test]
    fn test_bind_enum_and_option() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "lowercase")]
        enum Mode {
            Fast,
            Safe,
        }
        let p = props(&[("mode", "safe")]);
        assert_eq!(p.bind::<Mode>("${mode}").unwrap(), Mode::Safe);
        assert_eq!(p.bind::<Option<String>>("${name:=}").unwrap(), None);
    }

    #[test]
    fn test_bind_root_and_empty_default() {
        #[derive(Debug, Deserialize, Default)]
        struct Empty {
            #[serde(default)]
            items: Vec<String>,
        }
        let p = props(&[("items[0]", "x")]);
        let root: Empty = p.bind("").unwrap();
        assert_eq!(root.items, vec!["x"]);
        let none: Vec<String> = p.bind("${nothing:=}").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_parse_tag_rejects_garbage() {
        assert!(BindTag::parse("${a}>split").is_err());
        assert!(BindTag::parse("${a").is_err());
        assert_eq!(BindTag::parse("${ROOT}").unwrap().key, "");
        assert_eq!(BindTag::parse("${a:=b}>>c").unwrap().to_string(), "${a:=b}>>c");
    }
}
