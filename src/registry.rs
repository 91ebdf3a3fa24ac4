//! The bean registry: definitions and modules collected before refresh.
//!
//! A [`Registry`] is a plain value. Build one, hand it to a
//! [`Container`](crate::Container), and clone it when several containers
//! need the same definitions; constructor-backed beans in a clone start
//! without a value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::bean::arg::{ctor_of, normalize_args, try_ctor_of};
use crate::bean::{
    ctor_name, AnyArc, Arg, BeanDefinition, BeanHandle, Component, Constructor, Ctor, MethodArgs,
    TryConstructor,
};
use crate::condition::{on_bean_id, on_property, OnProperty};
use crate::container::Wiring;
use crate::error::{BoxError, Error, Result};
use crate::key::{BeanId, TypeKey};
use crate::props::{BindTag, Properties};

/// Registers further beans once the module's conditions match.
pub type ModuleFn = Arc<dyn Fn(&mut Registry, &Properties) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Module {
    pub(crate) conditions: Vec<OnProperty>,
    pub(crate) f: ModuleFn,
    pub(crate) file_line: String,
}

/// Bean definitions and modules awaiting a container refresh.
///
/// # Examples
///
/// ```rust
/// use springlet::{Arg, Container, Properties, Registry};
///
/// struct Server {
///     addr: String,
/// }
///
/// fn new_server(addr: String) -> Server {
///     Server { addr }
/// }
///
/// let mut r = Registry::new();
/// r.provide_fn(new_server, vec![Arg::tag("${server.address:=:9090}")]).root();
///
/// let mut c = Container::with_registry(r.clone());
/// c.refresh(Properties::new()).unwrap();
/// assert_eq!(c.get::<Server>("new_server").unwrap().addr, ":9090");
///
/// let mut c = Container::with_registry(r);
/// c.refresh(Properties::from_pairs([("server.address", ":8080")]).unwrap()).unwrap();
/// assert_eq!(c.get::<Server>("").unwrap().addr, ":8080");
/// ```
#[derive(Clone, Default)]
pub struct Registry {
    pub(crate) beans: Vec<BeanDefinition>,
    pub(crate) modules: Vec<Module>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push<T: Send + Sync + 'static>(&mut self, def: BeanDefinition) -> BeanHandle<'_, T> {
        self.beans.push(def);
        let last = self.beans.len() - 1;
        BeanHandle::new(&mut self.beans[last])
    }

    /// Registers an existing instance, named after its type.
    #[track_caller]
    pub fn provide<T: Send + Sync + 'static>(&mut self, value: T) -> BeanHandle<'_, T> {
        self.provide_arc(Arc::new(value))
    }

    /// Registers an instance that is already shared.
    #[track_caller]
    pub fn provide_arc<T: Send + Sync + 'static>(&mut self, value: Arc<T>) -> BeanHandle<'_, T> {
        let def = BeanDefinition::from_value(value);
        self.push(def)
    }

    /// Registers a constructor. The bean is named after the function, or
    /// after its type when `f` is a closure.
    ///
    /// # Panics
    ///
    /// Panics if `args` mixes positional and indexed arguments or does not
    /// fit the constructor's parameters.
    #[track_caller]
    pub fn provide_fn<F, Args>(&mut self, f: F, args: Vec<Arg>) -> BeanHandle<'_, F::Output>
    where
        F: Constructor<Args>,
        Args: 'static,
    {
        let file_line = BeanDefinition::location();
        let name = ctor_name::<F>(&TypeKey::of::<F::Output>().short_name());
        let args = normalize_args(args, F::ARITY);
        let def = BeanDefinition::from_ctor::<F::Output>(name, ctor_of(f, args), file_line);
        self.push(def)
    }

    /// Registers a constructor returning `Result`.
    #[track_caller]
    pub fn provide_try_fn<F, Args>(&mut self, f: F, args: Vec<Arg>) -> BeanHandle<'_, F::Output>
    where
        F: TryConstructor<Args>,
        Args: 'static,
    {
        let file_line = BeanDefinition::location();
        let name = ctor_name::<F>(&TypeKey::of::<F::Output>().short_name());
        let args = normalize_args(args, F::ARITY);
        let def = BeanDefinition::from_ctor::<F::Output>(name, try_ctor_of(f, args), file_line);
        self.push(def)
    }

    /// Registers a bean that builds itself through [`Component::build`].
    #[track_caller]
    pub fn provide_component<T: Component>(&mut self) -> BeanHandle<'_, T> {
        let file_line = BeanDefinition::location();
        let ctor: Ctor = Arc::new(|w: &mut Wiring<'_>| T::build(w).map(|v| Arc::new(v) as AnyArc));
        let def = BeanDefinition::from_ctor::<T>(TypeKey::of::<T>().short_name(), ctor, file_line);
        self.push(def)
    }

    /// Registers a method of another bean as a constructor. The first
    /// parameter is the receiver; the bean is active only while a receiver
    /// is. When `args` is not empty its first element selects the receiver.
    ///
    /// # Panics
    ///
    /// Panics if the first argument is a literal value.
    #[track_caller]
    pub fn provide_method<P, F, Args>(&mut self, f: F, args: Vec<Arg>) -> BeanHandle<'_, F::Output>
    where
        P: Send + Sync + 'static,
        F: Constructor<Args>,
        Args: MethodArgs<P> + 'static,
    {
        let file_line = BeanDefinition::location();
        let name = ctor_name::<F>(&TypeKey::of::<F::Output>().short_name());
        let args = normalize_args(args, F::ARITY);
        let receiver = match args.first() {
            Some(Arg::Tag { tag, .. }) => tag.trim().trim_end_matches('?').to_string(),
            _ => panic!("the first argument of a method bean must select its receiver"),
        };
        let mut def = BeanDefinition::from_ctor::<F::Output>(name, ctor_of(f, args), file_line);
        def.conditions
            .push(on_bean_id(BeanId::of::<P>().with_name(receiver)));
        self.push(def)
    }

    /// Registers `f` to run during refresh when all `conditions` match.
    #[track_caller]
    pub fn module<F>(&mut self, conditions: Vec<OnProperty>, f: F)
    where
        F: Fn(&mut Registry, &Properties) -> Result<()> + Send + Sync + 'static,
    {
        self.modules.push(Module {
            conditions,
            f: Arc::new(f),
            file_line: BeanDefinition::location(),
        });
    }

    /// Registers one bean per entry of the map under `tag`, named by the
    /// entry key and built by `f` from the entry's configuration.
    ///
    /// ```rust
    /// use serde::Deserialize;
    /// use springlet::{Container, Properties};
    ///
    /// #[derive(Clone, Deserialize)]
    /// struct ClientConfig { url: String }
    ///
    /// struct Client { url: String }
    ///
    /// let mut c = Container::new();
    /// c.group("${clients}", |cfg: ClientConfig| Ok::<_, std::io::Error>(Client { url: cfg.url }));
    ///
    /// let props = Properties::from_pairs([("clients.a.url", "http://a"), ("clients.b.url", "http://b")]).unwrap();
    /// c.refresh(props).unwrap();
    /// assert_eq!(c.get::<Client>("b").unwrap().url, "http://b");
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `tag` is not a `${key}` tag.
    #[track_caller]
    pub fn group<C, T, F, E>(&mut self, tag: &str, f: F)
    where
        C: DeserializeOwned + Clone + Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(C) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.group_inner::<C, T, F, E>(tag, f, None);
    }

    /// Like [`Registry::group`], running `destroy` on every bean at close.
    #[track_caller]
    pub fn group_with_destroy<C, T, F, E, D>(&mut self, tag: &str, f: F, destroy: D)
    where
        C: DeserializeOwned + Clone + Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(C) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
        D: Fn(&T) + Send + Sync + 'static,
    {
        self.group_inner::<C, T, F, E>(tag, f, Some(Arc::new(destroy)));
    }

    #[track_caller]
    fn group_inner<C, T, F, E>(
        &mut self,
        tag: &str,
        f: F,
        destroy: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    ) where
        C: DeserializeOwned + Clone + Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(C) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let parsed = match BindTag::parse(tag) {
            Ok(t) if !t.key.is_empty() => t,
            _ => panic!("group tag '{}' must name a property key", tag),
        };
        let key = parsed.key.clone();
        let tag = tag.to_string();
        let f = Arc::new(f);
        let file_line = BeanDefinition::location();
        let def_line = file_line.clone();
        self.modules.push(Module {
            conditions: vec![on_property(key)],
            f: Arc::new(move |r: &mut Registry, p: &Properties| {
                let entries: BTreeMap<String, C> = p.bind(&tag)?;
                for (name, cfg) in entries {
                    let f = f.clone();
                    let ctor: Ctor = Arc::new(move |_: &mut Wiring<'_>| {
                        f(cfg.clone())
                            .map(|v| Arc::new(v) as AnyArc)
                            .map_err(Error::user)
                    });
                    let def = BeanDefinition::from_ctor::<T>(name, ctor, def_line.clone());
                    let handle = r.push::<T>(def);
                    if let Some(d) = destroy.clone() {
                        handle.destroy(move |t: &T| d(t));
                    }
                }
                Ok(())
            }),
            file_line,
        });
    }

    /// Registered bean definitions, in registration order.
    pub fn beans(&self) -> &[BeanDefinition] {
        &self.beans
    }

    pub fn len(&self) -> usize {
        self.beans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.is_empty() && self.modules.is_empty()
    }
}
