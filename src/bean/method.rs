//! Configuration beans and method beans.
//!
//! A configuration bean lists factory methods through
//! [`ConfigurationBean::bean_methods`]. When the bean is registered with
//! [`BeanHandle::configuration`](super::BeanHandle::configuration), every
//! method whose name matches an include pattern (default `New.*`) and no
//! exclude pattern becomes a bean named `{parent}_{Method}`, active only
//! while the parent bean is.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use springlet::{BeanMethod, Configuration, ConfigurationBean, Container, Properties};
//!
//! struct Factory {
//!     prefix: String,
//! }
//!
//! struct Child(String);
//!
//! impl ConfigurationBean for Factory {
//!     fn bean_methods() -> Vec<BeanMethod<Self>> {
//!         vec![BeanMethod::new("NewChild", |f: Arc<Factory>| Child(format!("{}-child", f.prefix)))]
//!     }
//! }
//!
//! let mut c = Container::new();
//! c.provide(Factory { prefix: "p".into() })
//!     .name("factory")
//!     .configuration(Configuration::new());
//! c.refresh(Properties::new()).unwrap();
//! assert_eq!(c.get::<Child>("factory_NewChild").unwrap().0, "p-child");
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use super::arg::{ctor_of, normalize_args, try_ctor_of, Arg, Constructor, TryConstructor};
use super::{BeanDefinition, Ctor};
use crate::condition::on_bean_id;
use crate::key::BeanId;

/// Marks argument tuples whose first element is the receiver `Arc<P>`.
pub trait MethodArgs<P: ?Sized> {}

macro_rules! impl_method_args {
    ($($A:ident),*) => {
        impl<P: ?Sized, $($A,)*> MethodArgs<P> for (Arc<P>, $($A,)*) {}
    };
}

impl_method_args!();
impl_method_args!(A2);
impl_method_args!(A2, A3);
impl_method_args!(A2, A3, A4);
impl_method_args!(A2, A3, A4, A5);
impl_method_args!(A2, A3, A4, A5, A6);

/// Include and exclude name patterns for configuration scanning.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub(crate) includes: Vec<String>,
    pub(crate) excludes: Vec<String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include regex; without any, `New.*` is used.
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }

    /// Adds an exclude regex.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }
}

/// A bean whose methods produce further beans.
pub trait ConfigurationBean: Send + Sync + Sized + 'static {
    fn bean_methods() -> Vec<BeanMethod<Self>>;
}

type MakeDef = Box<dyn FnOnce(&str, &str) -> BeanDefinition>;

/// One factory method of a configuration bean.
pub struct BeanMethod<P> {
    name: String,
    make: MakeDef,
    _marker: PhantomData<fn() -> P>,
}

impl<P: Send + Sync + 'static> BeanMethod<P> {
    /// A method taking only the receiver or unconfigured extra parameters.
    pub fn new<F, Args>(name: impl Into<String>, f: F) -> Self
    where
        F: Constructor<Args>,
        Args: MethodArgs<P> + 'static,
    {
        Self::with_args(name, f, Vec::new())
    }

    /// A method with arguments for the parameters after the receiver.
    pub fn with_args<F, Args>(name: impl Into<String>, f: F, args: Vec<Arg>) -> Self
    where
        F: Constructor<Args>,
        Args: MethodArgs<P> + 'static,
    {
        let make: MakeDef = Box::new(move |parent: &str, file_line: &str| {
            let args = receiver_args(parent, args, F::ARITY);
            method_definition::<P, F::Output>(parent, file_line, ctor_of(f, args))
        });
        Self::from_parts(name.into(), make)
    }

    /// A fallible method.
    pub fn try_new<F, Args>(name: impl Into<String>, f: F) -> Self
    where
        F: TryConstructor<Args>,
        Args: MethodArgs<P> + 'static,
    {
        Self::try_with_args(name, f, Vec::new())
    }

    pub fn try_with_args<F, Args>(name: impl Into<String>, f: F, args: Vec<Arg>) -> Self
    where
        F: TryConstructor<Args>,
        Args: MethodArgs<P> + 'static,
    {
        let make: MakeDef = Box::new(move |parent: &str, file_line: &str| {
            let args = receiver_args(parent, args, F::ARITY);
            method_definition::<P, F::Output>(parent, file_line, try_ctor_of(f, args))
        });
        Self::from_parts(name.into(), make)
    }

    fn from_parts(name: String, make: MakeDef) -> Self {
        Self {
            name,
            make,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_definition(self, parent: &str, file_line: &str) -> BeanDefinition {
        let mut def = (self.make)(parent, file_line);
        def.name = format!("{}_{}", parent, self.name);
        def
    }
}

fn receiver_args(parent: &str, args: Vec<Arg>, arity: usize) -> Vec<Arg> {
    let mut all = Vec::with_capacity(args.len() + 1);
    all.push(Arg::bean(parent));
    all.extend(args);
    normalize_args(all, arity)
}

fn method_definition<P, T>(parent: &str, file_line: &str, ctor: Ctor) -> BeanDefinition
where
    P: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    let mut def = BeanDefinition::from_ctor::<T>(String::new(), ctor, file_line.to_string());
    def.conditions
        .push(on_bean_id(BeanId::of::<P>().with_name(parent)));
    def
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Parent;
    struct Child;

    #[test]
    fn test_method_definition_shape() {
        let m = BeanMethod::<Parent>::new("NewChild", |_: Arc<Parent>| Child);
        assert_eq!(m.name(), "NewChild");
        let def = m.into_definition("parent", "src/lib.rs:1");
        assert_eq!(def.name(), "parent_NewChild");
        assert_eq!(def.file_line(), "src/lib.rs:1");
        assert_eq!(def.conditions.len(), 1);
        assert!(def.conditions[0].to_string().starts_with("OnBean(selector={Type:"));
        assert!(def.conditions[0].to_string().ends_with(",Name:parent})"));
    }

    #[test]
    fn test_configuration_patterns() {
        let cfg = Configuration::new().include("Make.*").exclude("MakeOld");
        assert_eq!(cfg.includes, vec!["Make.*"]);
        assert_eq!(cfg.excludes, vec!["MakeOld"]);
    }
}
