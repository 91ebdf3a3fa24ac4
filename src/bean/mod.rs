//! Bean definitions.
//!
//! A [`BeanDefinition`] normalizes every registration shape, whether an
//! existing instance, a constructor or a method on another bean, into one
//! type-erased record. The registry hands out a typed [`BeanHandle`] for
//! configuring a definition right after it is registered.

pub mod arg;
pub mod method;

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::Arc;

use crate::condition::{self, on_profiles, ConditionRef, IntoCondition};
use crate::container::Wiring;
use crate::error::{BoxError, Error, Result};
use crate::key::{short_type_name, BeanId, TypeKey};

pub use arg::{Arg, Bound, Component, Constructor, Converted, Injectable, Lazy, TryConstructor, register_converter};
pub use method::{BeanMethod, Configuration, ConfigurationBean, MethodArgs};

/// Type-erased bean value; always holds an `Arc<T>` of the concrete type.
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

pub(crate) type Ctor = Arc<dyn Fn(&mut Wiring<'_>) -> Result<AnyArc> + Send + Sync>;

/// Produces a boxed `Arc<X>` view of a bean value for one of its types.
pub(crate) type Cast = Arc<dyn Fn(&AnyArc) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;

pub(crate) type Hook = Arc<dyn Fn(&AnyArc) -> Result<()> + Send + Sync>;

/// Expands a configuration bean into its method beans, given the parent
/// bean's name and source location.
pub(crate) type MethodScan = Arc<dyn Fn(&str, &str) -> Vec<BeanDefinition> + Send + Sync>;

/// Lifecycle state of a bean definition.
///
/// Resolution moves a bean from `Default` through `Resolving` to either
/// `Resolved` or `Deleted`. Wiring then drives `Creating`, `Created` and
/// finally `Wired`. `Deleted` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BeanStatus {
    Deleted = -1,
    Default = 0,
    Resolving,
    Resolved,
    Creating,
    Created,
    Wired,
}

impl fmt::Display for BeanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BeanStatus::Deleted => "deleted",
            BeanStatus::Default => "default",
            BeanStatus::Resolving => "resolving",
            BeanStatus::Resolved => "resolved",
            BeanStatus::Creating => "creating",
            BeanStatus::Created => "created",
            BeanStatus::Wired => "wired",
        })
    }
}

/// Include/exclude patterns of a configuration bean.
#[derive(Clone)]
pub(crate) struct ConfigurationParam {
    pub(crate) includes: Vec<String>,
    pub(crate) excludes: Vec<String>,
    pub(crate) scan: MethodScan,
}

/// A registered bean, type-erased.
pub struct BeanDefinition {
    pub(crate) name: String,
    pub(crate) type_key: TypeKey,
    pub(crate) value: Option<AnyArc>,
    pub(crate) ctor: Option<Ctor>,
    pub(crate) casts: Vec<(TypeKey, Cast)>,
    pub(crate) depends_on: Vec<BeanId>,
    pub(crate) conditions: Vec<ConditionRef>,
    pub(crate) init: Option<Hook>,
    pub(crate) destroy: Option<Hook>,
    pub(crate) status: BeanStatus,
    pub(crate) file_line: String,
    pub(crate) configuration: Option<ConfigurationParam>,
    pub(crate) root: bool,
}

fn self_cast<T: Send + Sync + 'static>() -> Cast {
    Arc::new(|v: &AnyArc| {
        v.clone()
            .downcast::<T>()
            .ok()
            .map(|a| Box::new(a) as Box<dyn Any + Send + Sync>)
    })
}

#[track_caller]
fn caller_location() -> String {
    let loc = Location::caller();
    format!("{}:{}", loc.file(), loc.line())
}

/// Derives a bean name from a constructor's type name, falling back to
/// `fallback` for closures and function pointers.
pub(crate) fn ctor_name<F>(fallback: &str) -> String {
    let full = std::any::type_name::<F>();
    if full.contains("{{closure}}") || full.starts_with("fn(") || full.starts_with('<') {
        return fallback.to_string();
    }
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

impl BeanDefinition {
    fn blank<T: Send + Sync + 'static>(name: String, file_line: String) -> Self {
        Self {
            name,
            type_key: TypeKey::of::<T>(),
            value: None,
            ctor: None,
            casts: vec![(TypeKey::of::<T>(), self_cast::<T>())],
            depends_on: Vec::new(),
            conditions: Vec::new(),
            init: None,
            destroy: None,
            status: BeanStatus::Default,
            file_line,
            configuration: None,
            root: false,
        }
    }

    /// Definition wrapping an existing instance.
    #[track_caller]
    pub(crate) fn from_value<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        let mut def = Self::blank::<T>(TypeKey::of::<T>().short_name(), caller_location());
        def.value = Some(value as AnyArc);
        def
    }

    /// Definition built lazily by `ctor`.
    pub(crate) fn from_ctor<T: Send + Sync + 'static>(
        name: String,
        ctor: Ctor,
        file_line: String,
    ) -> Self {
        let mut def = Self::blank::<T>(name, file_line);
        def.ctor = Some(ctor);
        def
    }

    #[track_caller]
    pub(crate) fn location() -> String {
        caller_location()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn status(&self) -> BeanStatus {
        self.status
    }

    /// Where the bean was registered, as `file:line`.
    pub fn file_line(&self) -> &str {
        &self.file_line
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Exported types, not including the bean's own type.
    pub fn exports(&self) -> Vec<TypeKey> {
        self.casts.iter().skip(1).map(|(k, _)| *k).collect()
    }

    pub fn depends_on(&self) -> &[BeanId] {
        &self.depends_on
    }

    /// Returns true if the bean can be found as `ty`.
    pub fn has_type(&self, ty: TypeKey) -> bool {
        self.casts.iter().any(|(k, _)| *k == ty)
    }

    /// Returns true if this (non-deleted) bean is selected by `id`.
    pub(crate) fn matches(&self, id: &BeanId) -> bool {
        if self.status == BeanStatus::Deleted {
            return false;
        }
        if !id.name.is_empty() && id.name != self.name {
            return false;
        }
        id.ty.map_or(true, |ty| self.has_type(ty))
    }

    /// Casts the bean value to `Arc<X>`, `X` being its own or an exported type.
    pub(crate) fn cast<X: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<X>> {
        let key = TypeKey::of::<X>();
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| Error::msg(format!("bean {} is not created", self)))?;
        let cast = self
            .casts
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| Error::msg(format!("bean {} can't be used as {}", self, key.short_name())))?;
        cast(value)
            .and_then(|b| b.downcast::<Arc<X>>().ok())
            .map(|b| *b)
            .ok_or_else(|| Error::msg(format!("bean {} can't be cast to {}", self, key.short_name())))
    }
}

impl Clone for BeanDefinition {
    /// Copies the definition; constructor-backed beans start without a value
    /// and once-conditions forget their results.
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            type_key: self.type_key,
            value: if self.ctor.is_some() { None } else { self.value.clone() },
            ctor: self.ctor.clone(),
            casts: self.casts.clone(),
            depends_on: self.depends_on.clone(),
            conditions: self.conditions.iter().map(condition::fork).collect(),
            init: self.init.clone(),
            destroy: self.destroy.clone(),
            status: BeanStatus::Default,
            file_line: self.file_line.clone(),
            configuration: self.configuration.clone(),
            root: self.root,
        }
    }
}

impl fmt::Display for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name={} {}", self.name, self.file_line)
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("name", &self.name)
            .field("type", &self.type_key)
            .field("status", &self.status)
            .field("exports", &self.exports())
            .field("root", &self.root)
            .field("file_line", &self.file_line)
            .finish()
    }
}

fn hook<T, F>(f: F) -> Hook
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(move |v: &AnyArc| match (**v).downcast_ref::<T>() {
        Some(t) => f(t),
        None => Err(Error::msg(format!(
            "hook expects {}",
            short_type_name(std::any::type_name::<T>())
        ))),
    })
}

/// Typed view of a freshly registered bean, for chaining configuration.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use springlet::{on_property, Container, Properties};
///
/// trait Cache: Send + Sync {
///     fn size(&self) -> usize;
/// }
///
/// struct MemoryCache;
/// impl Cache for MemoryCache {
///     fn size(&self) -> usize { 16 }
/// }
///
/// let mut c = Container::new();
/// c.provide(MemoryCache)
///     .name("cache")
///     .condition(on_property("cache.enabled"))
///     .export(|b| b as Arc<dyn Cache>);
///
/// c.refresh(Properties::from_pairs([("cache.enabled", "true")]).unwrap()).unwrap();
/// let cache = c.get::<dyn Cache>("cache").unwrap();
/// assert_eq!(cache.size(), 16);
/// ```
pub struct BeanHandle<'a, T> {
    def: &'a mut BeanDefinition,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Send + Sync + 'static> BeanHandle<'a, T> {
    pub(crate) fn new(def: &'a mut BeanDefinition) -> Self {
        Self {
            def,
            _marker: PhantomData,
        }
    }

    /// Overrides the derived bean name.
    pub fn name(self, name: impl Into<String>) -> Self {
        self.def.name = name.into();
        self
    }

    /// Requires the selected beans to be created before this one.
    pub fn depends_on(self, id: BeanId) -> Self {
        self.def.depends_on.push(id);
        self
    }

    /// Adds an activation condition; all conditions must match.
    pub fn condition(self, c: impl IntoCondition) -> Self {
        self.def.conditions.push(c.into_condition());
        self
    }

    /// Activates the bean only under one of the comma separated profiles.
    pub fn on_profiles(self, profiles: &str) -> Self {
        self.def.conditions.push(on_profiles(profiles));
        self
    }

    /// Marks the bean as an entry point of wiring.
    pub fn root(self) -> Self {
        self.def.root = true;
        self
    }

    /// Makes the bean findable as `I`. Exporting a type twice is a no-op.
    pub fn export<I>(self, f: fn(Arc<T>) -> Arc<I>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let key = TypeKey::of::<I>();
        if self.def.has_type(key) {
            return self;
        }
        let cast: Cast = Arc::new(move |v: &AnyArc| {
            v.clone()
                .downcast::<T>()
                .ok()
                .map(|a| Box::new(f(a)) as Box<dyn Any + Send + Sync>)
        });
        self.def.casts.push((key, cast));
        self
    }

    /// Runs `f` once the bean has been created.
    pub fn init<F>(self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.def.init = Some(hook::<T, _>(move |t| {
            f(t);
            Ok(())
        }));
        self
    }

    /// Runs a fallible `f` once the bean has been created.
    pub fn try_init<F, E>(self, f: F) -> Self
    where
        F: Fn(&T) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.def.init = Some(hook::<T, _>(move |t| f(t).map_err(Error::user)));
        self
    }

    /// Runs `f` when the container closes.
    pub fn destroy<F>(self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.def.destroy = Some(hook::<T, _>(move |t| {
            f(t);
            Ok(())
        }));
        self
    }

    /// Runs a fallible `f` when the container closes.
    pub fn try_destroy<F, E>(self, f: F) -> Self
    where
        F: Fn(&T) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.def.destroy = Some(hook::<T, _>(move |t| f(t).map_err(Error::user)));
        self
    }

    pub fn definition(&self) -> &BeanDefinition {
        self.def
    }
}

impl<'a, T: ConfigurationBean> BeanHandle<'a, T> {
    /// Scans the bean's [`ConfigurationBean::bean_methods`] into further beans.
    pub fn configuration(self, cfg: Configuration) -> Self {
        let scan: MethodScan = Arc::new(|parent: &str, file_line: &str| {
            T::bean_methods()
                .into_iter()
                .map(|m| m.into_definition(parent, file_line))
                .collect()
        });
        self.def.configuration = Some(ConfigurationParam {
            includes: cfg.includes,
            excludes: cfg.excludes,
            scan,
        });
        self
    }
}
