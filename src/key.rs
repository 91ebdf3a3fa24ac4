//! Bean identity keys for the container.

use std::any::TypeId;
use std::fmt;

/// Runtime identity of a bean type or exported trait object type.
///
/// Equality, ordering and hashing use only the `TypeId`; the type name is
/// carried for diagnostics. Trait objects get their own key, for example
/// `TypeKey::of::<dyn Runner>()`.
///
/// # Examples
///
/// ```rust
/// use springlet::TypeKey;
///
/// trait Greeter {}
///
/// let a = TypeKey::of::<String>();
/// let b = TypeKey::of::<dyn Greeter>();
/// assert_ne!(a, b);
/// assert_eq!(a.short_name(), "String");
/// assert_eq!(b.short_name(), "dyn Greeter");
/// ```
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for `T`, which may be a trait object.
    #[inline(always)]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn type_name(&self) -> &'static str {
        self.name
    }

    /// Type name with module paths trimmed from every segment.
    pub fn short_name(&self) -> String {
        short_type_name(self.name)
    }
}

impl PartialEq for TypeKey {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    #[inline(always)]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for TypeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Selector identifying beans by type, by name, or by both.
///
/// An empty name matches any bean of the type; a missing type matches any
/// bean with the name.
///
/// # Examples
///
/// ```rust
/// use springlet::BeanId;
///
/// struct Server;
///
/// let by_type = BeanId::of::<Server>();
/// let both = BeanId::of::<Server>().with_name("web");
/// let by_name = BeanId::named("web");
///
/// assert!(by_type.to_string().starts_with("{Type:"));
/// assert!(both.to_string().ends_with(",Name:web}"));
/// assert_eq!(by_name.to_string(), "{Name:web}");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BeanId {
    pub ty: Option<TypeKey>,
    pub name: String,
}

impl BeanId {
    /// Selects beans of type `T` (or exporting `T`).
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            ty: Some(TypeKey::of::<T>()),
            name: String::new(),
        }
    }

    /// Selects beans named `name`, whatever their type.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            ty: None,
            name: name.into(),
        }
    }

    /// Narrows the selector to the given name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Display for BeanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        if let Some(ty) = &self.ty {
            write!(f, "Type:{}", ty.type_name())?;
        }
        if !self.name.is_empty() {
            if self.ty.is_some() {
                f.write_str(",")?;
            }
            write!(f, "Name:{}", self.name)?;
        }
        f.write_str("}")
    }
}

/// Strips module paths from every path segment of a type name.
///
/// `alloc::sync::Arc<dyn app::Server>` becomes `Arc<dyn Server>`.
pub(crate) fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut seg_start = 0;
    let mut chars = full.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            out.truncate(seg_start);
            continue;
        }
        out.push(c);
        if !(c.is_alphanumeric() || c == '_' || c == '{' || c == '}') {
            seg_start = out.len();
        }
    }
    out
}
