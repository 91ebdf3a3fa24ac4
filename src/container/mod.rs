//! The IoC container.
//!
//! A [`Container`] goes through three states. While `Default` it accepts
//! registrations. [`Container::refresh`] resolves conditions against a
//! property snapshot, then creates every root bean and their dependencies.
//! Once `Refreshed`, beans are looked up with [`Container::get`] and
//! destroyed in reverse creation order by [`Container::close`].

mod wiring;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::app::{Runner, Server};
use crate::bean::{
    Arg, BeanDefinition, BeanHandle, BeanStatus, Component, Constructor, MethodArgs, TryConstructor,
};
use crate::condition::OnProperty;
use crate::error::{BoxError, Error, Result};
use crate::key::TypeKey;
use crate::props::Properties;
use crate::registry::Registry;
use crate::resolving;
use crate::{ALLOW_CIRCULAR_REFERENCES_PROP, FORCE_AUTOWIRE_IS_NULLABLE_PROP};

pub use wiring::Wiring;
pub(crate) use wiring::{Core, SharedProperties};

/// Lifecycle state of a [`Container`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshState {
    Default,
    Refreshing,
    Refreshed,
}

const REFRESHED_MSG: &str = "container is already refreshing or refreshed";

/// Conditional, property-driven IoC container.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use springlet::{Arg, Container, Properties};
///
/// struct Repo {
///     url: String,
/// }
///
/// struct Service {
///     repo: Arc<Repo>,
/// }
///
/// fn new_repo(url: String) -> Repo {
///     Repo { url }
/// }
///
/// fn new_service(repo: Arc<Repo>) -> Service {
///     Service { repo }
/// }
///
/// let mut c = Container::new();
/// c.provide_fn(new_repo, vec![Arg::tag("${db.url}")]);
/// c.provide_fn(new_service, vec![]).root();
///
/// c.refresh(Properties::from_pairs([("db.url", "mem://")]).unwrap()).unwrap();
/// let svc = c.get::<Service>("").unwrap();
/// assert_eq!(svc.repo.url, "mem://");
/// assert_eq!(c.creation_order(), vec!["new_repo", "new_service"]);
/// c.close();
/// ```
pub struct Container {
    state: RefreshState,
    registry: Registry,
    core: Core,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// A container starting from the definitions in `registry`.
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            state: RefreshState::Default,
            registry,
            core: Core::new(Arc::new(Properties::new())),
        }
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    #[track_caller]
    fn registry_mut(&mut self) -> &mut Registry {
        if self.state != RefreshState::Default {
            panic!("{}", REFRESHED_MSG);
        }
        &mut self.registry
    }

    /// See [`Registry::provide`].
    #[track_caller]
    pub fn provide<T: Send + Sync + 'static>(&mut self, value: T) -> BeanHandle<'_, T> {
        self.registry_mut().provide(value)
    }

    #[track_caller]
    pub fn provide_arc<T: Send + Sync + 'static>(&mut self, value: Arc<T>) -> BeanHandle<'_, T> {
        self.registry_mut().provide_arc(value)
    }

    /// See [`Registry::provide_fn`].
    #[track_caller]
    pub fn provide_fn<F, Args>(&mut self, f: F, args: Vec<Arg>) -> BeanHandle<'_, F::Output>
    where
        F: Constructor<Args>,
        Args: 'static,
    {
        self.registry_mut().provide_fn(f, args)
    }

    #[track_caller]
    pub fn provide_try_fn<F, Args>(&mut self, f: F, args: Vec<Arg>) -> BeanHandle<'_, F::Output>
    where
        F: TryConstructor<Args>,
        Args: 'static,
    {
        self.registry_mut().provide_try_fn(f, args)
    }

    #[track_caller]
    pub fn provide_component<T: Component>(&mut self) -> BeanHandle<'_, T> {
        self.registry_mut().provide_component::<T>()
    }

    /// See [`Registry::provide_method`].
    #[track_caller]
    pub fn provide_method<P, F, Args>(&mut self, f: F, args: Vec<Arg>) -> BeanHandle<'_, F::Output>
    where
        P: Send + Sync + 'static,
        F: Constructor<Args>,
        Args: MethodArgs<P> + 'static,
    {
        self.registry_mut().provide_method::<P, F, Args>(f, args)
    }

    #[track_caller]
    pub fn module<F>(&mut self, conditions: Vec<OnProperty>, f: F)
    where
        F: Fn(&mut Registry, &Properties) -> Result<()> + Send + Sync + 'static,
    {
        self.registry_mut().module(conditions, f)
    }

    /// See [`Registry::group`].
    #[track_caller]
    pub fn group<C, T, F, E>(&mut self, tag: &str, f: F)
    where
        C: DeserializeOwned + Clone + Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(C) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.registry_mut().group(tag, f)
    }

    #[track_caller]
    pub fn group_with_destroy<C, T, F, E, D>(&mut self, tag: &str, f: F, destroy: D)
    where
        C: DeserializeOwned + Clone + Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(C) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
        D: Fn(&T) + Send + Sync + 'static,
    {
        self.registry_mut().group_with_destroy(tag, f, destroy)
    }

    /// Resolves every definition against `props` and creates the root
    /// beans. A container refreshes at most once; a failed refresh leaves
    /// it unusable.
    pub fn refresh(&mut self, props: impl Into<Arc<Properties>>) -> Result<()> {
        if self.state != RefreshState::Default {
            return Err(Error::msg(REFRESHED_MSG));
        }
        self.state = RefreshState::Refreshing;
        let props = props.into();

        resolving::resolve(&mut self.registry, &props)?;

        self.core.publish(props);
        self.core.beans = std::mem::take(&mut self.registry.beans);
        set_flags(&mut self.core)?;

        let runner = TypeKey::of::<dyn Runner>();
        let server = TypeKey::of::<dyn Server>();
        let roots: Vec<usize> = (0..self.core.beans.len())
            .filter(|&i| {
                let b = &self.core.beans[i];
                b.status != BeanStatus::Deleted
                    && (b.root || b.has_type(runner) || b.has_type(server))
            })
            .collect();
        for i in roots {
            self.core.wire(i)?;
        }
        self.core.drain_pending()?;

        self.state = RefreshState::Refreshed;
        info!(
            target: "springlet::container",
            beans = self.core.beans.len(),
            created = self.core.order().len(),
            "container refreshed"
        );
        Ok(())
    }

    /// The single bean of type `T` selected by `tag`, creating it and its
    /// dependencies if no root reached it.
    ///
    /// `T` may be the bean's own type or an exported trait object type.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&mut self, tag: &str) -> Result<Arc<T>> {
        self.check_refreshed()?;
        self.core.sync_props();
        let bean = self.core.wiring().bean::<T>(tag)?;
        self.core.drain_pending()?;
        Ok(bean)
    }

    /// All beans of type `T` selected by `tag`; see [`Wiring::beans`].
    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&mut self, tag: &str) -> Result<Vec<Arc<T>>> {
        self.check_refreshed()?;
        self.core.sync_props();
        let beans = self.core.wiring().beans::<T>(tag)?;
        self.core.drain_pending()?;
        Ok(beans)
    }

    fn check_refreshed(&self) -> Result<()> {
        if self.state != RefreshState::Refreshed {
            return Err(Error::msg("container is not refreshed"));
        }
        Ok(())
    }

    /// Every definition, including deleted ones, in registration order.
    pub fn definitions(&self) -> &[BeanDefinition] {
        if self.state == RefreshState::Default {
            &self.registry.beans
        } else {
            &self.core.beans
        }
    }

    /// Names of the created beans, in creation order.
    pub fn creation_order(&self) -> Vec<&str> {
        self.core
            .order()
            .iter()
            .map(|&i| self.core.beans[i].name())
            .collect()
    }

    /// The property snapshot beans are created from.
    pub fn properties(&self) -> Arc<Properties> {
        self.core.published().read().clone()
    }

    /// Handle on the published snapshot, for framework beans that refresh it.
    pub(crate) fn shared_properties(&self) -> SharedProperties {
        self.core.published()
    }

    /// Publishes a new property snapshot for beans created from now on.
    pub fn refresh_properties(&mut self, props: impl Into<Arc<Properties>>) {
        self.core.publish(props.into());
        debug!(target: "springlet::container", "properties refreshed");
    }

    /// Runs destroy hooks in reverse creation order. Hook errors are logged.
    pub fn close(&mut self) {
        self.core.close();
        info!(target: "springlet::container", "container closed");
    }

    /// Multi-line dump of every bean with its status and source location.
    #[cfg(feature = "diagnostics")]
    pub fn to_debug_string(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "Container ({:?})", self.state);
        for def in self.definitions() {
            let _ = write!(
                out,
                "  {} [{}] {} at {}",
                def.name(),
                def.status(),
                def.type_key().short_name(),
                def.file_line()
            );
            let exports: Vec<String> = def.exports().iter().map(|k| k.short_name()).collect();
            if !exports.is_empty() {
                let _ = write!(out, " exports [{}]", exports.join(", "));
            }
            if def.is_root() {
                out.push_str(" root");
            }
            out.push('\n');
        }
        let _ = writeln!(out, "Creation order: {}", self.creation_order().join(" -> "));
        out
    }
}

fn set_flags(core: &mut Core) -> Result<()> {
    core.allow_circular = core
        .props
        .bind::<bool>(&format!("${{{}:=false}}", ALLOW_CIRCULAR_REFERENCES_PROP))?;
    core.force_nullable = core
        .props
        .bind::<bool>(&format!("${{{}:=false}}", FORCE_AUTOWIRE_IS_NULLABLE_PROP))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;

    #[test]
    fn test_refresh_once() {
        let mut c = Container::new();
        c.provide(A);
        c.refresh(Properties::new()).unwrap();
        assert_eq!(c.state(), RefreshState::Refreshed);
        let err = c.refresh(Properties::new()).unwrap_err();
        assert_eq!(err.to_string(), REFRESHED_MSG);
    }

    #[test]
    #[should_panic(expected = "already refreshing or refreshed")]
    fn test_provide_after_refresh_panics() {
        let mut c = Container::new();
        c.refresh(Properties::new()).unwrap();
        c.provide(A);
    }

    #[test]
    fn test_get_before_refresh_fails() {
        let mut c = Container::new();
        c.provide(A);
        assert!(c.get::<A>("").is_err());
    }

    #[test]
    fn test_unreached_beans_are_not_created() {
        let mut c = Container::new();
        c.provide_fn(|| A, vec![]);
        c.refresh(Properties::new()).unwrap();
        assert_eq!(c.definitions()[0].status(), BeanStatus::Resolved);
        assert!(c.creation_order().is_empty());
        c.get::<A>("").unwrap();
        assert_eq!(c.definitions()[0].status(), BeanStatus::Wired);
    }

    #[test]
    fn test_flags_read_from_properties() {
        let mut c = Container::new();
        let props = Properties::from_pairs([(ALLOW_CIRCULAR_REFERENCES_PROP, "true")]).unwrap();
        c.refresh(props).unwrap();
        assert!(c.core.allow_circular);
        assert!(!c.core.force_nullable);
    }
}
