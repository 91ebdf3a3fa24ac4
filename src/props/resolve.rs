//! `${key:=default}` placeholder substitution.

use super::{Node, Properties};
use crate::error::{Error, Result};

// Bounds recursion through values that reference themselves.
const MAX_DEPTH: usize = 64;

pub(crate) fn resolve_string(p: &Properties, s: &str) -> Result<String> {
    resolve_depth(p, s, 0)
}

fn resolve_depth(p: &Properties, s: &str, depth: usize) -> Result<String> {
    if depth > MAX_DEPTH {
        return Err(Error::msg("resolve depth exceeded, circular placeholder?"));
    }
    let Some(start) = s.find("${") else {
        return Ok(s.to_string());
    };
    let end = find_close(s, start)?;
    let (key, def) = split_default(&s[start + 2..end]);
    let key = key.trim();

    let value = match p.node(key) {
        Some(Node::Leaf { value, .. }) if !key.is_empty() => resolve_depth(p, value, depth + 1)?,
        _ => match def {
            Some(def) => resolve_depth(p, def, depth + 1)?,
            None => return Err(Error::PropertyNotExist(key.to_string())),
        },
    };
    let rest = resolve_depth(p, &s[end + 1..], depth)?;

    let mut out = String::with_capacity(start + value.len() + rest.len());
    out.push_str(&s[..start]);
    out.push_str(&value);
    out.push_str(&rest);
    Ok(out)
}

/// Index of the `}` closing the placeholder opened at `start`.
pub(crate) fn find_close(s: &str, start: usize) -> Result<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = start + 2;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            depth += 1;
            i += 2;
            continue;
        }
        if bytes[i] == b'}' {
            if depth == 0 {
                return Ok(i);
            }
            depth -= 1;
        }
        i += 1;
    }
    Err(Error::msg("invalid syntax"))
}

/// Splits `key:=default` at the first `:=` outside nested placeholders.
pub(crate) fn split_default(inner: &str) -> (&str, Option<&str>) {
    let bytes = inner.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 2;
                continue;
            }
            b'}' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b'=') => {
                return (&inner[..i], Some(&inner[i + 2..]));
            }
            _ => {}
        }
        i += 1;
    }
    (inner, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        Properties::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn test_nested_defaults() {
        assert_eq!(props(&[]).resolve("${A:=${B:=C}}").unwrap(), "C");
        assert_eq!(props(&[("B", "x")]).resolve("${A:=${B:=C}}").unwrap(), "x");
        assert_eq!(props(&[("A", "y"), ("B", "x")]).resolve("${A:=${B:=C}}").unwrap(), "y");
    }

    #[test]
    fn test_values_resolve_recursively() {
        let p = props(&[("host", "localhost"), ("url", "http://${host}:${port:=80}/")]);
        assert_eq!(p.resolve("${url}").unwrap(), "http://localhost:80/");
        assert_eq!(p.resolve("a-${host}-b").unwrap(), "a-localhost-b");
    }

    #[test]
    fn test_missing_and_malformed() {
        let p = props(&[]);
        assert_eq!(
            p.resolve("${server.address}").unwrap_err().to_string(),
            "resolve string \"${server.address}\" error: property \"server.address\" not exist"
        );
        assert!(p.resolve("${a").is_err());
        assert_eq!(p.resolve("${a:=}").unwrap(), "");
    }

    #[test]
    fn test_self_reference_is_bounded() {
        let p = props(&[("a", "${a}")]);
        assert!(p.resolve("${a}").is_err());
    }

    #[test]
    fn test_branch_key_uses_default() {
        let p = props(&[("a.b", "1")]);
        assert_eq!(p.resolve("${a:=d}").unwrap(), "d");
    }

    #[test]
    fn test_split_default() {
        assert_eq!(split_default("a:=b"), ("a", Some("b")));
        assert_eq!(split_default("a:=${b:=c}"), ("a", Some("${b:=c}")));
        assert_eq!(split_default("a"), ("a", None));
    }
}
