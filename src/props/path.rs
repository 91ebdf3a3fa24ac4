//! Property key paths: `a.b[0].c` and friends.

use crate::error::{Error, Result};

/// One step of a property path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PathElem {
    Key(String),
    Index(usize),
}

/// Splits a key such as `http.servers[1].addr` into its elements.
pub(crate) fn split_path(key: &str) -> Result<Vec<PathElem>> {
    let invalid = || Error::msg(format!("invalid key '{}'", key));
    let mut path = Vec::new();
    let mut cur = String::new();
    let mut after_index = false;
    let mut pending_dot = false;
    let mut chars = key.chars();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if cur.is_empty() {
                    if !after_index {
                        return Err(invalid());
                    }
                } else {
                    path.push(PathElem::Key(std::mem::take(&mut cur)));
                }
                after_index = false;
                pending_dot = true;
            }
            '[' => {
                if !cur.is_empty() {
                    path.push(PathElem::Key(std::mem::take(&mut cur)));
                } else if path.is_empty() || pending_dot {
                    return Err(invalid());
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => return Err(invalid()),
                    }
                }
                let index = digits.parse::<usize>().map_err(|_| invalid())?;
                path.push(PathElem::Index(index));
                after_index = true;
                pending_dot = false;
            }
            ']' => return Err(invalid()),
            c if c.is_whitespace() => return Err(invalid()),
            c => {
                if after_index {
                    return Err(invalid());
                }
                cur.push(c);
                pending_dot = false;
            }
        }
    }
    if !cur.is_empty() {
        path.push(PathElem::Key(cur));
    } else if path.is_empty() || pending_dot {
        return Err(invalid());
    }
    Ok(path)
}

/// Renders path elements back into canonical key form.
pub(crate) fn join_path(path: &[PathElem]) -> String {
    let mut s = String::new();
    for elem in path {
        match elem {
            PathElem::Key(k) => {
                if !s.is_empty() {
                    s.push('.');
                }
                s.push_str(k);
            }
            PathElem::Index(i) => {
                s.push('[');
                s.push_str(&i.to_string());
                s.push(']');
            }
        }
    }
    s
}

/// Appends a child key to a prefix, `""` + `a` giving `a`.
pub(crate) fn child_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Appends an index to a prefix.
pub(crate) fn child_index(prefix: &str, index: usize) -> String {
    format!("{}[{}]", prefix, index)
}
