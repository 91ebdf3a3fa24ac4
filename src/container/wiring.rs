//! Bean creation and dependency injection.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::bean::{BeanDefinition, BeanStatus, Injectable, Lazy};
use crate::error::{Error, ErrorContext, Result};
use crate::internal::{CreationStack, DisposeBag};
use crate::key::BeanId;
use crate::props::Properties;

type PendingFn = Box<dyn FnOnce(&mut Wiring<'_>) -> Result<()> + Send>;

/// Published property snapshot, shared with whoever may replace it.
pub(crate) type SharedProperties = Arc<RwLock<Arc<Properties>>>;

/// Wiring state of a refreshed container.
pub(crate) struct Core {
    pub(crate) beans: Vec<BeanDefinition>,
    pub(crate) props: Arc<Properties>,
    published: SharedProperties,
    stack: CreationStack,
    order: Vec<usize>,
    pending: Vec<PendingFn>,
    pub(crate) allow_circular: bool,
    pub(crate) force_nullable: bool,
    disposers: DisposeBag,
}

impl Core {
    pub(crate) fn new(props: Arc<Properties>) -> Self {
        Self {
            beans: Vec::new(),
            published: Arc::new(RwLock::new(props.clone())),
            props,
            stack: CreationStack::default(),
            order: Vec::new(),
            pending: Vec::new(),
            allow_circular: false,
            force_nullable: false,
            disposers: DisposeBag::default(),
        }
    }

    pub(crate) fn published(&self) -> SharedProperties {
        self.published.clone()
    }

    /// Replaces the snapshot for this and every later wiring pass.
    pub(crate) fn publish(&mut self, props: Arc<Properties>) {
        *self.published.write() = props.clone();
        self.props = props;
    }

    /// Picks up a snapshot published from outside since the last pass.
    pub(crate) fn sync_props(&mut self) {
        let latest = self.published.read().clone();
        if !Arc::ptr_eq(&latest, &self.props) {
            self.props = latest;
        }
    }

    pub(crate) fn wiring(&mut self) -> Wiring<'_> {
        Wiring { core: self }
    }

    /// Indices of wired beans, in creation order.
    pub(crate) fn order(&self) -> &[usize] {
        &self.order
    }

    /// Fills every deferred [`Lazy`] reference, including ones queued
    /// while filling others.
    pub(crate) fn drain_pending(&mut self) -> Result<()> {
        loop {
            let pending = std::mem::take(&mut self.pending);
            if pending.is_empty() {
                return Ok(());
            }
            for f in pending {
                f(&mut self.wiring())?;
            }
        }
    }

    /// Runs destroy hooks, last created first.
    pub(crate) fn close(&mut self) {
        self.disposers.run_all_reverse();
        self.stack.clear();
    }

    /// Creates bean `i` and everything it depends on.
    pub(crate) fn wire(&mut self, i: usize) -> Result<()> {
        match self.beans[i].status {
            BeanStatus::Wired | BeanStatus::Created => return Ok(()),
            BeanStatus::Creating => {
                let name = self.beans[i].name.clone();
                let path = self
                    .stack
                    .cycle_to(i)
                    .unwrap_or_else(|| vec![name.clone(), name]);
                return Err(Error::Circular(path));
            }
            BeanStatus::Resolved => {}
            other => {
                return Err(Error::msg(format!(
                    "unexpected status {} for bean {}",
                    other, self.beans[i]
                )))
            }
        }

        let name = self.beans[i].name.clone();
        self.stack.push(i, &name)?;
        self.beans[i].status = BeanStatus::Creating;
        let result = self.create(i);
        self.stack.pop(i);
        if let Err(e) = result {
            self.beans[i].status = BeanStatus::Resolved;
            return Err(e);
        }

        self.beans[i].status = BeanStatus::Wired;
        self.order.push(i);
        if let (Some(hook), Some(value)) = (self.beans[i].destroy.clone(), self.beans[i].value.clone()) {
            self.disposers
                .push(self.beans[i].to_string(), Box::new(move || hook(&value)));
        }
        debug!(target: "springlet::container", bean = %self.beans[i], "bean wired");
        Ok(())
    }

    fn create(&mut self, i: usize) -> Result<()> {
        for id in self.beans[i].depends_on.clone() {
            let found: Vec<usize> = self.candidates(&id);
            if found.is_empty() {
                return Err(Error::BeanNotFound(id.to_string()))
                    .with_context(|| format!("wire depends on for bean {} error", self.beans[i]));
            }
            for j in found {
                self.wire(j)?;
            }
        }

        if let Some(ctor) = self.beans[i].ctor.clone() {
            let created = ctor(&mut self.wiring());
            let value = created.with_context(|| format!("create bean {} error", self.beans[i]))?;
            self.beans[i].value = Some(value);
        }
        self.beans[i].status = BeanStatus::Created;

        if let (Some(init), Some(value)) = (self.beans[i].init.clone(), self.beans[i].value.clone()) {
            init(&value).with_context(|| format!("init bean {} error", self.beans[i]))?;
        }
        Ok(())
    }

    /// Active beans selected by `id`, in registration order.
    pub(crate) fn candidates(&self, id: &BeanId) -> Vec<usize> {
        (0..self.beans.len())
            .filter(|&i| self.beans[i].status != BeanStatus::Default && self.beans[i].matches(id))
            .collect()
    }
}

/// One element of a bean selector such as `"a,*,b?"`.
#[derive(Debug, PartialEq)]
enum Item {
    Name { name: String, nullable: bool },
    Any { nullable: bool },
}

fn parse_items(tag: &str) -> Vec<Item> {
    tag.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let (body, nullable) = match s.strip_suffix('?') {
                Some(b) => (b.trim(), true),
                None => (s, false),
            };
            if body == "*" || body.is_empty() {
                Item::Any { nullable }
            } else {
                Item::Name {
                    name: body.to_string(),
                    nullable,
                }
            }
        })
        .collect()
}

/// Access to properties and beans while constructing a bean.
///
/// Constructors receive their arguments through [`Injectable`];
/// [`Component`](crate::Component) implementations call these methods
/// directly.
pub struct Wiring<'a> {
    core: &'a mut Core,
}

impl Wiring<'_> {
    pub fn props(&self) -> &Properties {
        &self.core.props
    }

    /// Resolves the placeholders in `s`.
    pub fn prop(&self, s: &str) -> Result<String> {
        self.core.props.resolve(s)
    }

    /// Injects any [`Injectable`] value from `tag`.
    pub fn inject<A: Injectable>(&mut self, tag: &str) -> Result<A> {
        A::inject(self, tag, None)
    }

    /// Binds the property subtree under `tag`.
    pub fn bind<T: serde::de::DeserializeOwned>(&self, tag: &str) -> Result<T> {
        self.core.props.bind(tag)
    }

    /// The single bean of type `T` selected by `tag`.
    pub fn bean<T: ?Sized + Send + Sync + 'static>(&mut self, tag: &str) -> Result<Arc<T>> {
        match self.bean_opt::<T>(tag)? {
            Some(b) => Ok(b),
            None => Err(Error::BeanNotFound(self.selector::<T>(tag))),
        }
    }

    /// The single bean of type `T` selected by `tag`, if there is one.
    pub fn bean_opt<T: ?Sized + Send + Sync + 'static>(&mut self, tag: &str) -> Result<Option<Arc<T>>> {
        let Some(i) = self.find_one::<T>(tag)? else {
            return Ok(None);
        };
        self.core.wire(i)?;
        self.core.beans[i].cast::<T>().map(Some)
    }

    /// All beans of type `T` selected by `tag`.
    ///
    /// The tag lists names and `*` separated by commas; `*` stands for every
    /// bean not named elsewhere in the list, in registration order, and an
    /// empty tag means `*`. A trailing `?` makes an element optional.
    pub fn beans<T: ?Sized + Send + Sync + 'static>(&mut self, tag: &str) -> Result<Vec<Arc<T>>> {
        let tag = self.resolve_tag(tag)?;
        let mut items = parse_items(&tag);
        if items.is_empty() {
            items.push(Item::Any { nullable: false });
        }
        let all = self.core.candidates(&BeanId::of::<T>());
        let named: Vec<&str> = items
            .iter()
            .filter_map(|it| match it {
                Item::Name { name, .. } => Some(name.as_str()),
                Item::Any { .. } => None,
            })
            .collect();

        let mut nullable = self.core.force_nullable;
        let mut selected = Vec::new();
        for item in &items {
            match item {
                Item::Name { name, nullable: n } => {
                    match all.iter().find(|&&i| self.core.beans[i].name == *name) {
                        Some(&i) => selected.push(i),
                        None if *n => nullable = true,
                        None => {
                            return Err(Error::BeanNotFound(
                                BeanId::of::<T>().with_name(name.clone()).to_string(),
                            ))
                        }
                    }
                }
                Item::Any { nullable: n } => {
                    nullable |= *n;
                    selected.extend(
                        all.iter()
                            .copied()
                            .filter(|&i| !named.contains(&self.core.beans[i].name.as_str())),
                    );
                }
            }
        }
        if selected.is_empty() && !nullable {
            return Err(Error::BeanNotFound(BeanId::of::<T>().to_string()));
        }

        let mut out = Vec::with_capacity(selected.len());
        for i in selected {
            self.core.wire(i)?;
            out.push(self.core.beans[i].cast::<T>()?);
        }
        Ok(out)
    }

    /// A reference to the bean selected by `tag`, filled once the current
    /// wiring pass is over.
    pub fn lazy<T: ?Sized + Send + Sync + 'static>(&mut self, tag: &str) -> Result<Lazy<T>> {
        let lazy = Lazy::empty();
        let Some(i) = self.find_one::<T>(tag)? else {
            if self.core.force_nullable || self.nullable(tag)? {
                return Ok(lazy);
            }
            return Err(Error::BeanNotFound(self.selector::<T>(tag)));
        };
        let status = self.core.beans[i].status;
        if status == BeanStatus::Wired {
            let _ = lazy.cell.set(self.core.beans[i].cast::<T>()?);
            return Ok(lazy);
        }
        if status == BeanStatus::Creating && !self.core.allow_circular {
            let name = self.core.beans[i].name.clone();
            let path = self
                .core
                .stack
                .cycle_to(i)
                .unwrap_or_else(|| vec![name.clone(), name]);
            return Err(Error::Circular(path));
        }
        let cell = lazy.cell.clone();
        self.core.pending.push(Box::new(move |w: &mut Wiring<'_>| {
            w.core.wire(i)?;
            let _ = cell.set(w.core.beans[i].cast::<T>()?);
            Ok(())
        }));
        Ok(lazy)
    }

    /// Printable selector for the bean `tag` names.
    pub(crate) fn selector<T: ?Sized + 'static>(&self, tag: &str) -> String {
        let name = self
            .resolve_tag(tag)
            .ok()
            .and_then(|t| match parse_items(&t).into_iter().next() {
                Some(Item::Name { name, .. }) => Some(name),
                _ => None,
            })
            .unwrap_or_default();
        BeanId::of::<T>().with_name(name).to_string()
    }

    fn resolve_tag(&self, tag: &str) -> Result<String> {
        if tag.contains("${") {
            self.core.props.resolve(tag)
        } else {
            Ok(tag.to_string())
        }
    }

    fn nullable(&self, tag: &str) -> Result<bool> {
        let tag = self.resolve_tag(tag)?;
        Ok(parse_items(&tag).iter().any(|it| match it {
            Item::Name { nullable, .. } | Item::Any { nullable } => *nullable,
        }))
    }

    fn find_one<T: ?Sized + 'static>(&self, tag: &str) -> Result<Option<usize>> {
        let resolved = self.resolve_tag(tag)?;
        let items = parse_items(&resolved);
        if items.len() > 1 {
            return Err(Error::msg(format!(
                "only one bean can be selected, got \"{}\"",
                resolved
            )));
        }
        let id = match items.first() {
            Some(Item::Name { name, .. }) => BeanId::of::<T>().with_name(name.clone()),
            _ => BeanId::of::<T>(),
        };
        let found = self.core.candidates(&id);
        match found.len() {
            0 => Ok(None),
            1 => Ok(Some(found[0])),
            n => Err(Error::msg(format!("found {} beans, selector={}", n, id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_items() {
        assert_eq!(
            parse_items("a, *,b?"),
            vec![
                Item::Name { name: "a".into(), nullable: false },
                Item::Any { nullable: false },
                Item::Name { name: "b".into(), nullable: true },
            ]
        );
        assert_eq!(parse_items("*?"), vec![Item::Any { nullable: true }]);
        assert_eq!(parse_items("?"), vec![Item::Any { nullable: true }]);
        assert!(parse_items("").is_empty());
    }
}
