//! Constructor arguments and injectable parameter types.
//!
//! Every constructor parameter implements [`Injectable`]. Property-backed
//! types (strings, numbers, bools, durations, vectors of those and
//! [`Bound`] structs) read the `${key:=default}` tag of their [`Arg`];
//! bean-backed types (`Arc<T>`, `Option<Arc<T>>`, `Vec<Arc<T>>` and
//! [`Lazy`]) read a selector such as `"name"`, `"name?"` or `"a,*,b?"`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::{Lazy as LazyStatic, OnceCell};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use super::{AnyArc, Ctor};
use crate::container::Wiring;
use crate::error::{BoxError, Error, Result};
use crate::expr::{self, Scope, Value};
use crate::key::short_type_name;
use crate::props::bind::{bind_value, tag_text};
use crate::props::BindTag;

type ValueFn = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// How one constructor parameter is supplied.
#[derive(Clone)]
pub enum Arg {
    /// A property tag (`${..}`) or a bean selector, with an optional
    /// validator expression over the bound value.
    Tag { tag: String, expr: Option<String> },
    /// A literal value, cloned for every construction.
    Value(ValueFn),
    /// An argument for the parameter at a given position.
    Index(usize, Box<Arg>),
}

impl Arg {
    /// Property tag or bean selector.
    pub fn tag(tag: impl Into<String>) -> Arg {
        Arg::Tag {
            tag: tag.into(),
            expr: None,
        }
    }

    /// Selects a bean by name.
    pub fn bean(name: impl Into<String>) -> Arg {
        Arg::tag(name)
    }

    /// Supplies a literal value.
    pub fn value<V: Clone + Send + Sync + 'static>(v: V) -> Arg {
        Arg::Value(Arc::new(move || Box::new(v.clone()) as Box<dyn Any + Send>))
    }

    /// Binds `arg` to the parameter at `index`.
    pub fn index(index: usize, arg: Arg) -> Arg {
        Arg::Index(index, Box::new(arg))
    }

    /// Attaches a validator such as `$ > 0` to a property tag.
    ///
    /// # Panics
    ///
    /// Panics if the argument is a literal value.
    pub fn expr(self, e: impl Into<String>) -> Arg {
        match self {
            Arg::Tag { tag, .. } => Arg::Tag {
                tag,
                expr: Some(e.into()),
            },
            Arg::Index(i, inner) => Arg::Index(i, Box::new(inner.expr(e))),
            Arg::Value(_) => panic!("a validator can only be attached to a tag argument"),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Tag { tag, expr: None } => write!(f, "Tag({:?})", tag),
            Arg::Tag { tag, expr: Some(e) } => write!(f, "Tag({:?}, expr={:?})", tag, e),
            Arg::Value(_) => f.write_str("Value(..)"),
            Arg::Index(i, a) => write!(f, "Index({}, {:?})", i, a),
        }
    }
}

/// Lays `args` out one per parameter, filling gaps with empty tags.
///
/// # Panics
///
/// Panics when positional and indexed arguments are mixed, when there are
/// more arguments than parameters or when an index is out of range.
pub(crate) fn normalize_args(args: Vec<Arg>, arity: usize) -> Vec<Arg> {
    let indexed = args.iter().filter(|a| matches!(a, Arg::Index(..))).count();
    if indexed > 0 && indexed != args.len() {
        panic!("arguments must be all indexed or all positional");
    }
    let mut slots: Vec<Option<Arg>> = vec![None; arity];
    if indexed == 0 {
        if args.len() > arity {
            panic!("too many arguments: expected at most {}, got {}", arity, args.len());
        }
        for (i, a) in args.into_iter().enumerate() {
            slots[i] = Some(a);
        }
    } else {
        for a in args {
            if let Arg::Index(i, inner) = a {
                if i >= arity {
                    panic!("arg index {} exceeds the {} parameters", i, arity);
                }
                if slots[i].is_some() {
                    panic!("arg index {} is set twice", i);
                }
                slots[i] = Some(*inner);
            }
        }
    }
    slots
        .into_iter()
        .map(|a| a.unwrap_or_else(|| Arg::tag("")))
        .collect()
}

/// A value a constructor can ask for.
pub trait Injectable: Sized + Send + 'static {
    fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self>;
}

pub(crate) fn inject_arg<A: Injectable>(w: &mut Wiring<'_>, arg: Option<&Arg>) -> Result<A> {
    match arg {
        None => A::inject(w, "", None),
        Some(Arg::Tag { tag, expr }) => A::inject(w, tag, expr.as_deref()),
        Some(Arg::Value(produce)) => produce().downcast::<A>().map(|b| *b).map_err(|_| {
            Error::msg(format!(
                "value arg doesn't match parameter type {}",
                short_type_name(std::any::type_name::<A>())
            ))
        }),
        Some(Arg::Index(_, inner)) => inject_arg(w, Some(inner)),
    }
}

fn validate(e: &str, text: &str) -> Result<()> {
    let scope = Scope::new().with_dollar(Value::from_text(text));
    if expr::eval_bool(e, &scope)? {
        Ok(())
    } else {
        Err(Error::msg(format!("validate failed on \"{}\" for value {}", e, text)))
    }
}

fn reject_validator<T>(expr: Option<&str>) -> Result<()> {
    match expr {
        Some(e) => Err(Error::msg(format!(
            "validator \"{}\" is not supported for {}",
            e,
            short_type_name(std::any::type_name::<T>())
        ))),
        None => Ok(()),
    }
}

fn bind_prop<T: DeserializeOwned>(w: &Wiring<'_>, tag: &str) -> Result<T> {
    bind_value(w.props(), &BindTag::parse(tag)?)
}

macro_rules! impl_property_injectable {
    ($($t:ty),*) => {$(
        impl Injectable for $t {
            fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self> {
                let v: $t = bind_prop(w, tag)?;
                if let Some(e) = expr {
                    validate(e, &v.to_string())?;
                }
                Ok(v)
            }
        }

        impl Injectable for Vec<$t> {
            fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self> {
                let v: Vec<$t> = bind_prop(w, tag)?;
                if let Some(e) = expr {
                    for item in &v {
                        validate(e, &item.to_string())?;
                    }
                }
                Ok(v)
            }
        }
    )*};
}

impl_property_injectable!(String, bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl Injectable for Duration {
    /// A validator sees the duration in milliseconds as `$`.
    fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self> {
        let parsed = BindTag::parse(tag)?;
        let text = tag_text(w.props(), &parsed)?;
        let d = humantime::parse_duration(text.trim()).map_err(|e| Error::Bind {
            path: parsed.key.clone(),
            message: e.to_string(),
        })?;
        if let Some(e) = expr {
            validate(e, &d.as_millis().to_string())?;
        }
        Ok(d)
    }
}

/// Binds a whole property subtree into `T`.
///
/// An empty tag binds the full property set.
///
/// ```rust
/// use serde::Deserialize;
/// use springlet::{Arg, Bound, Container, Properties};
///
/// #[derive(Deserialize)]
/// struct DbConfig {
///     url: String,
///     #[serde(default)]
///     pool: u32,
/// }
///
/// struct Db { url: String, pool: u32 }
///
/// fn new_db(cfg: Bound<DbConfig>) -> Db {
///     Db { url: cfg.url.clone(), pool: cfg.pool }
/// }
///
/// let mut c = Container::new();
/// c.provide_fn(new_db, vec![Arg::tag("${db}")]).root();
/// c.refresh(Properties::from_pairs([("db.url", "mem://"), ("db.pool", "4")]).unwrap()).unwrap();
/// let db = c.get::<Db>("").unwrap();
/// assert_eq!((db.url.as_str(), db.pool), ("mem://", 4));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Bound<T>(pub T);

impl<T> Bound<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Bound<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: DeserializeOwned + Send + 'static> Injectable for Bound<T> {
    fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self> {
        reject_validator::<Self>(expr)?;
        w.props().bind(tag).map(Bound)
    }
}

type ConvertFn = Arc<dyn Fn(&str) -> Result<Box<dyn Any + Send>> + Send + Sync>;

static CONVERTERS: LazyStatic<RwLock<HashMap<TypeId, ConvertFn>>> =
    LazyStatic::new(|| RwLock::new(HashMap::new()));

/// Registers a string to `T` converter used by [`Converted<T>`].
pub fn register_converter<T, F, E>(f: F)
where
    T: Send + 'static,
    F: Fn(&str) -> std::result::Result<T, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    let f: ConvertFn = Arc::new(move |s: &str| {
        f(s).map(|v| Box::new(v) as Box<dyn Any + Send>)
            .map_err(Error::user)
    });
    CONVERTERS.write().insert(TypeId::of::<T>(), f);
}

/// A property value converted by a registered converter.
///
/// ```rust
/// use std::net::SocketAddr;
/// use springlet::{register_converter, Arg, Container, Converted, Properties};
///
/// register_converter(|s: &str| s.parse::<SocketAddr>());
///
/// struct Listener(SocketAddr);
///
/// let mut c = Container::new();
/// c.provide_fn(|a: Converted<SocketAddr>| Listener(a.0), vec![Arg::tag("${addr}")]).root();
/// c.refresh(Properties::from_pairs([("addr", "127.0.0.1:80")]).unwrap()).unwrap();
/// assert_eq!(c.get::<Listener>("").unwrap().0.port(), 80);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Converted<T>(pub T);

impl<T> Deref for Converted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Send + 'static> Injectable for Converted<T> {
    /// A validator sees the unconverted text as `$`.
    fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self> {
        let parsed = BindTag::parse(tag)?;
        let text = tag_text(w.props(), &parsed)?;
        if let Some(e) = expr {
            validate(e, &text)?;
        }
        let name = short_type_name(std::any::type_name::<T>());
        let convert = CONVERTERS
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| Error::msg(format!("no converter registered for {}", name)))?;
        let boxed = convert(&text).map_err(|e| e.wrap(format!("convert {} error", parsed.key)))?;
        boxed
            .downcast::<T>()
            .map(|b| Converted(*b))
            .map_err(|_| Error::msg(format!("converter for {} returned another type", name)))
    }
}

impl<T: ?Sized + Send + Sync + 'static> Injectable for Arc<T> {
    fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self> {
        reject_validator::<Self>(expr)?;
        match w.bean_opt::<T>(tag)? {
            Some(b) => Ok(b),
            None => Err(Error::BeanNotFound(w.selector::<T>(tag))),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Injectable for Option<Arc<T>> {
    fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self> {
        reject_validator::<Self>(expr)?;
        w.bean_opt::<T>(tag)
    }
}

impl<T: ?Sized + Send + Sync + 'static> Injectable for Vec<Arc<T>> {
    fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self> {
        reject_validator::<Self>(expr)?;
        w.beans::<T>(tag)
    }
}

/// A bean reference filled after the constructors of the current refresh
/// have run, which lets two beans depend on each other.
///
/// A `Lazy` whose target is still being constructed closes a real cycle and
/// needs `spring.allow-circular-references=true`.
pub struct Lazy<T: ?Sized> {
    pub(crate) cell: Arc<OnceCell<Arc<T>>>,
}

impl<T: ?Sized> Lazy<T> {
    pub(crate) fn empty() -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// The bean, once the refresh that injected this reference is done.
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: ?Sized> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy").field("ready", &self.is_ready()).finish()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Injectable for Lazy<T> {
    fn inject(w: &mut Wiring<'_>, tag: &str, expr: Option<&str>) -> Result<Self> {
        reject_validator::<Self>(expr)?;
        w.lazy::<T>(tag)
    }
}

/// A bean that builds itself from the wiring context, pulling its
/// properties and dependencies field by field.
///
/// ```rust
/// use std::sync::Arc;
/// use springlet::{Component, Container, Properties, Result, Wiring};
///
/// struct Repo;
///
/// struct Service {
///     repo: Arc<Repo>,
///     retries: u32,
/// }
///
/// impl Component for Service {
///     fn build(w: &mut Wiring<'_>) -> Result<Self> {
///         Ok(Service {
///             repo: w.bean("")?,
///             retries: w.inject("${service.retries:=3}")?,
///         })
///     }
/// }
///
/// let mut c = Container::new();
/// c.provide(Repo);
/// c.provide_component::<Service>().root();
/// c.refresh(Properties::new()).unwrap();
/// assert_eq!(c.get::<Service>("").unwrap().retries, 3);
/// ```
pub trait Component: Sized + Send + Sync + 'static {
    fn build(w: &mut Wiring<'_>) -> Result<Self>;
}

/// A constructor returning its bean directly.
pub trait Constructor<Args>: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// Number of parameters.
    const ARITY: usize;

    fn call(&self, w: &mut Wiring<'_>, args: &[Arg]) -> Result<Self::Output>;
}

/// A constructor returning `Result<Bean, E>`.
pub trait TryConstructor<Args>: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    const ARITY: usize;

    fn call(&self, w: &mut Wiring<'_>, args: &[Arg]) -> Result<Self::Output>;
}

/// Type-erased constructor over pre-laid-out arguments.
pub(crate) fn ctor_of<F, Args>(f: F, args: Vec<Arg>) -> Ctor
where
    F: Constructor<Args>,
    Args: 'static,
{
    Arc::new(move |w: &mut Wiring<'_>| f.call(w, &args).map(|v| Arc::new(v) as AnyArc))
}

pub(crate) fn try_ctor_of<F, Args>(f: F, args: Vec<Arg>) -> Ctor
where
    F: TryConstructor<Args>,
    Args: 'static,
{
    Arc::new(move |w: &mut Wiring<'_>| f.call(w, &args).map(|v| Arc::new(v) as AnyArc))
}

macro_rules! impl_constructors {
    ($n:expr; $($A:ident $i:tt),*) => {
        impl<F, T, $($A,)*> Constructor<($($A,)*)> for F
        where
            F: Fn($($A),*) -> T + Send + Sync + 'static,
            T: Send + Sync + 'static,
            $($A: Injectable,)*
        {
            type Output = T;
            const ARITY: usize = $n;

            #[allow(unused_variables)]
            fn call(&self, w: &mut Wiring<'_>, args: &[Arg]) -> Result<T> {
                Ok((self)($(inject_arg::<$A>(w, args.get($i))?),*))
            }
        }

        impl<F, T, E, $($A,)*> TryConstructor<($($A,)*)> for F
        where
            F: Fn($($A),*) -> std::result::Result<T, E> + Send + Sync + 'static,
            T: Send + Sync + 'static,
            E: Into<BoxError>,
            $($A: Injectable,)*
        {
            type Output = T;
            const ARITY: usize = $n;

            #[allow(unused_variables)]
            fn call(&self, w: &mut Wiring<'_>, args: &[Arg]) -> Result<T> {
                (self)($(inject_arg::<$A>(w, args.get($i))?),*).map_err(Error::user)
            }
        }
    };
}

impl_constructors!(0;);
impl_constructors!(1; A1 0);
impl_constructors!(2; A1 0, A2 1);
impl_constructors!(3; A1 0, A2 1, A3 2);
impl_constructors!(4; A1 0, A2 1, A3 2, A4 3);
impl_constructors!(5; A1 0, A2 1, A3 2, A4 3, A5 4);
impl_constructors!(6; A1 0, A2 1, A3 2, A4 3, A5 4, A6 5);
