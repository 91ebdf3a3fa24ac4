//! # springlet
//!
//! Conditional, property-driven inversion of control for Rust.
//!
//! ## Features
//!
//! - **Layered configuration**: hierarchical properties from app defaults,
//!   files, imports, environment and command line, with `${key:=default}`
//!   placeholders and conflict detection
//! - **Conditional beans**: activate beans on properties, other beans,
//!   profiles or expressions
//! - **Typed constructors**: plain functions become bean factories; their
//!   parameters are injected from properties and other beans
//! - **Trait exports**: find beans through `dyn Trait` views
//! - **Ordered lifecycle**: init hooks in dependency order, destroy hooks
//!   in reverse
//! - **Application runtime**: runners, servers with a readiness barrier,
//!   signal-driven graceful shutdown
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use springlet::{on_property, Arg, Container, Properties};
//!
//! trait Store: Send + Sync {
//!     fn url(&self) -> &str;
//! }
//!
//! struct MemStore {
//!     url: String,
//! }
//!
//! impl Store for MemStore {
//!     fn url(&self) -> &str {
//!         &self.url
//!     }
//! }
//!
//! struct Service {
//!     store: Arc<dyn Store>,
//!     retries: u32,
//! }
//!
//! fn new_store(url: String) -> MemStore {
//!     MemStore { url }
//! }
//!
//! fn new_service(store: Arc<dyn Store>, retries: u32) -> Service {
//!     Service { store, retries }
//! }
//!
//! let mut c = Container::new();
//! c.provide_fn(new_store, vec![Arg::tag("${store.url:=mem://}")])
//!     .condition(on_property("store.enabled").having_value("true").match_if_missing())
//!     .export(|s| s as Arc<dyn Store>);
//! c.provide_fn(new_service, vec![Arg::tag(""), Arg::tag("${service.retries:=3}")])
//!     .root();
//!
//! c.refresh(Properties::from_pairs([("service.retries", "5")]).unwrap()).unwrap();
//! let svc = c.get::<Service>("").unwrap();
//! assert_eq!(svc.store.url(), "mem://");
//! assert_eq!(svc.retries, 5);
//! ```
//!
//! ## Lifecycle
//!
//! Refresh runs modules, scans configuration beans, resolves conditions,
//! rejects duplicate identities and then creates the root beans. Root beans
//! are the ones marked with [`BeanHandle::root`] and every bean exported as
//! [`Runner`] or [`Server`]. Other beans are created only when a root, or
//! [`Container::get`], reaches them.

pub mod app;
pub mod bean;
pub mod cancellation;
pub mod condition;
pub mod container;
pub mod error;
pub mod expr;
pub mod key;
pub mod props;
pub mod registry;

mod internal;
mod resolving;

pub use app::{
    App, AppConfig, ConfigRefresher, ContextAware, FuncRunner, LogBackend, ReadySignal, Runner,
    Server, ShutdownHandle, TracingBackend,
};
pub use bean::{
    register_converter, Arg, BeanDefinition, BeanHandle, BeanMethod, BeanStatus, Bound, Component,
    Configuration, ConfigurationBean, Constructor, Converted, Injectable, Lazy, TryConstructor,
};
pub use cancellation::CancellationToken;
pub use condition::{
    on_bean, on_bean_named, on_enable_servers, on_expression, on_func, on_missing_bean,
    on_profiles, on_property, on_single_bean, Condition, ConditionContext, ConditionRef,
    IntoCondition, OnProperty, ACTIVE_PROFILES_PROP, ENABLE_SERVERS_PROP,
};
pub use container::{Container, RefreshState, Wiring};
pub use error::{BoxError, Error, ErrorContext, Result};
pub use key::{BeanId, TypeKey};
pub use props::{register_splitter, BindTag, Properties};
pub use registry::Registry;

/// Directory holding `app.*` and `log.*` files, `./conf` by default.
pub const CONFIG_DIR_PROP: &str = "spring.app.config.dir";

/// Comma separated configuration sources merged after the local files.
pub const IMPORTS_PROP: &str = "spring.app.imports";

/// Lets a [`Lazy`] reference point at a bean that is still being created.
pub const ALLOW_CIRCULAR_REFERENCES_PROP: &str = "spring.allow-circular-references";

/// Makes every bean list injection accept an empty result.
pub const FORCE_AUTOWIRE_IS_NULLABLE_PROP: &str = "spring.force-autowire-is-nullable";
