//! Conditions gating bean activation.
//!
//! A condition is evaluated against a [`ConditionContext`], which exposes the
//! property snapshot and a lazy view of the bean graph. Looking a bean up
//! through [`ConditionContext::find`] resolves that bean's own conditions
//! first; a bean that is still being resolved does not match.
//!
//! Primitive conditions wrap their evaluation errors as
//! `condition <cond> matches error: <cause>`; the combinators pass errors
//! through untouched.
//!
//! # Examples
//!
//! ```rust
//! use springlet::condition::{and, not, on_property, Condition, ConditionBean, ConditionContext};
//! use springlet::{BeanId, Result};
//!
//! struct Props;
//! impl ConditionContext for Props {
//!     fn has(&self, key: &str) -> bool { key == "cache.enabled" }
//!     fn prop(&self, key: &str, def: &str) -> String {
//!         if key == "cache.enabled" { "true".into() } else { def.into() }
//!     }
//!     fn find(&mut self, _: &BeanId) -> Result<Vec<ConditionBean>> { Ok(vec![]) }
//! }
//!
//! let c = and(vec![
//!     on_property("cache.enabled").having_value("true").into_condition(),
//!     not(on_property("cache.disabled")),
//! ]);
//! assert!(c.matches(&mut Props).unwrap());
//! assert_eq!(
//!     c.to_string(),
//!     "And(OnProperty(name=cache.enabled, havingValue=true), Not(OnProperty(name=cache.disabled)))"
//! );
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ErrorContext, Result};
use crate::expr::{self, Scope, Value};
use crate::key::{short_type_name, BeanId, TypeKey};
use crate::props::resolve::{find_close, split_default};

/// Property naming the active profiles.
pub const ACTIVE_PROFILES_PROP: &str = "spring.profiles.active";

/// Property switching all servers on or off.
pub const ENABLE_SERVERS_PROP: &str = "spring.app.enable-servers";

/// A bean as seen by conditions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionBean {
    pub name: String,
    pub type_key: TypeKey,
}

/// What a condition can inspect.
pub trait ConditionContext {
    /// Returns true if the property exists, as a value or as a parent.
    fn has(&self, key: &str) -> bool;

    /// Returns the property value or `def`.
    fn prop(&self, key: &str, def: &str) -> String;

    /// Finds the active beans matching `id`, resolving them on demand.
    fn find(&mut self, id: &BeanId) -> Result<Vec<ConditionBean>>;
}

/// A predicate deciding whether a bean (or module) is active.
pub trait Condition: fmt::Display + Send + Sync {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool>;

    /// A copy without remembered results, for conditions that carry
    /// evaluation state. Stateless conditions return `None` and are shared.
    fn fresh(&self) -> Option<ConditionRef> {
        None
    }
}

/// Shared, type-erased condition.
pub type ConditionRef = Arc<dyn Condition>;

/// `c` with its evaluation state reset, sharing it when it has none.
pub(crate) fn fork(c: &ConditionRef) -> ConditionRef {
    c.fresh().unwrap_or_else(|| c.clone())
}

fn fork_all(conds: &[ConditionRef]) -> Option<Vec<ConditionRef>> {
    let forked: Vec<Option<ConditionRef>> = conds.iter().map(|c| c.fresh()).collect();
    if forked.iter().all(Option::is_none) {
        return None;
    }
    Some(
        forked
            .into_iter()
            .zip(conds)
            .map(|(f, c)| f.unwrap_or_else(|| c.clone()))
            .collect(),
    )
}

fn wrap_err<T>(c: &dyn Condition, r: Result<T>) -> Result<T> {
    r.with_context(|| format!("condition {} matches error", c))
}

/// Matches on the presence and, optionally, the value of a property.
#[derive(Clone, Debug)]
pub struct OnProperty {
    name: String,
    having_value: Option<String>,
    match_if_missing: bool,
}

/// Creates a property condition.
pub fn on_property(name: impl Into<String>) -> OnProperty {
    OnProperty {
        name: name.into(),
        having_value: None,
        match_if_missing: false,
    }
}

impl OnProperty {
    /// Requires the property to equal `v`. A value of the form `expr:...`
    /// is evaluated as an expression with `$` bound to the property.
    pub fn having_value(mut self, v: impl Into<String>) -> Self {
        self.having_value = Some(v.into());
        self
    }

    /// Matches when the property is absent.
    pub fn match_if_missing(mut self) -> Self {
        self.match_if_missing = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_condition(self) -> ConditionRef {
        Arc::new(self)
    }

    fn eval(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        if !ctx.has(&self.name) {
            return Ok(self.match_if_missing);
        }
        let Some(having) = &self.having_value else {
            return Ok(true);
        };
        let val = ctx.prop(&self.name, "");
        match having.strip_prefix("expr:") {
            None => Ok(&val == having),
            Some(src) => {
                let ctx_ref: &dyn ConditionContext = &*ctx;
                let lookup = |k: &str| ctx_ref.has(k).then(|| ctx_ref.prop(k, ""));
                let scope = Scope::new()
                    .with_dollar(Value::from_text(&val))
                    .with_props(&lookup);
                expr::eval_bool(src, &scope)
            }
        }
    }
}

impl Condition for OnProperty {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        wrap_err(self, self.eval(ctx))
    }
}

impl fmt::Display for OnProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnProperty(name={}", self.name)?;
        if let Some(v) = &self.having_value {
            write!(f, ", havingValue={}", v)?;
        }
        if self.match_if_missing {
            f.write_str(", matchIfMissing")?;
        }
        f.write_str(")")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BeanCount {
    AtLeastOne,
    Zero,
    ExactlyOne,
}

/// Matches on how many active beans a selector finds.
#[derive(Clone, Debug)]
pub struct OnBeanCount {
    selector: BeanId,
    count: BeanCount,
}

impl OnBeanCount {
    fn label(&self) -> &'static str {
        match self.count {
            BeanCount::AtLeastOne => "OnBean",
            BeanCount::Zero => "OnMissingBean",
            BeanCount::ExactlyOne => "OnSingleBean",
        }
    }
}

impl Condition for OnBeanCount {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        let n = wrap_err(self, ctx.find(&self.selector))?.len();
        Ok(match self.count {
            BeanCount::AtLeastOne => n > 0,
            BeanCount::Zero => n == 0,
            BeanCount::ExactlyOne => n == 1,
        })
    }
}

impl fmt::Display for OnBeanCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(selector={})", self.label(), self.selector)
    }
}

/// At least one active bean of type `T`.
pub fn on_bean<T: ?Sized + 'static>() -> ConditionRef {
    on_bean_id(BeanId::of::<T>())
}

/// At least one active bean of type `T` named `name`.
pub fn on_bean_named<T: ?Sized + 'static>(name: &str) -> ConditionRef {
    on_bean_id(BeanId::of::<T>().with_name(name))
}

/// At least one active bean matching `id`.
pub fn on_bean_id(id: BeanId) -> ConditionRef {
    Arc::new(OnBeanCount {
        selector: id,
        count: BeanCount::AtLeastOne,
    })
}

/// No active bean of type `T`.
pub fn on_missing_bean<T: ?Sized + 'static>() -> ConditionRef {
    on_missing_bean_id(BeanId::of::<T>())
}

/// No active bean matching `id`.
pub fn on_missing_bean_id(id: BeanId) -> ConditionRef {
    Arc::new(OnBeanCount {
        selector: id,
        count: BeanCount::Zero,
    })
}

/// Exactly one active bean of type `T`.
pub fn on_single_bean<T: ?Sized + 'static>() -> ConditionRef {
    on_single_bean_id(BeanId::of::<T>())
}

/// Exactly one active bean matching `id`.
pub fn on_single_bean_id(id: BeanId) -> ConditionRef {
    Arc::new(OnBeanCount {
        selector: id,
        count: BeanCount::ExactlyOne,
    })
}

/// Evaluates a boolean expression over the properties.
///
/// Placeholders are substituted before evaluation, and bare identifiers
/// read properties, so `${mode} == 'fast'` and `mode == 'fast'` agree.
pub struct OnExpression {
    expression: String,
}

pub fn on_expression(expression: impl Into<String>) -> ConditionRef {
    Arc::new(OnExpression {
        expression: expression.into(),
    })
}

impl OnExpression {
    fn eval(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        let ctx_ref: &dyn ConditionContext = &*ctx;
        let src = substitute(ctx_ref, &self.expression)?;
        let lookup = |k: &str| ctx_ref.has(k).then(|| ctx_ref.prop(k, ""));
        let scope = Scope::new().with_props(&lookup);
        expr::eval_bool(&src, &scope)
    }
}

// Placeholder substitution through the context only, where no Properties
// value is available.
fn substitute(ctx: &dyn ConditionContext, s: &str) -> Result<String> {
    let Some(start) = s.find("${") else {
        return Ok(s.to_string());
    };
    let end = find_close(s, start)?;
    let (key, def) = split_default(&s[start + 2..end]);
    let key = key.trim();
    let value = if ctx.has(key) {
        ctx.prop(key, "")
    } else {
        match def {
            Some(def) => substitute(ctx, def)?,
            None => return Err(crate::Error::PropertyNotExist(key.to_string())),
        }
    };
    Ok(format!("{}{}{}", &s[..start], value, substitute(ctx, &s[end + 1..])?))
}

impl Condition for OnExpression {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        wrap_err(self, self.eval(ctx))
    }
}

impl fmt::Display for OnExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnExpression(expression={})", self.expression)
    }
}

type CondFn = dyn Fn(&mut dyn ConditionContext) -> Result<bool> + Send + Sync;

/// Arbitrary closure condition.
pub struct OnFunc {
    name: String,
    f: Arc<CondFn>,
}

/// Wraps a closure as a condition.
pub fn on_func<F>(f: F) -> ConditionRef
where
    F: Fn(&mut dyn ConditionContext) -> Result<bool> + Send + Sync + 'static,
{
    let full = std::any::type_name::<F>();
    let name = if full.contains("{{closure}}") {
        "fn".to_string()
    } else {
        short_type_name(full)
    };
    Arc::new(OnFunc { name, f: Arc::new(f) })
}

impl Condition for OnFunc {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        wrap_err(self, (self.f)(ctx))
    }
}

impl fmt::Display for OnFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnFunc(fn={})", self.name)
    }
}

fn join(f: &mut fmt::Formatter<'_>, label: &str, conds: &[ConditionRef]) -> fmt::Result {
    write!(f, "{}(", label)?;
    for (i, c) in conds.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", c)?;
    }
    f.write_str(")")
}

/// All conditions match; stops at the first that does not.
pub struct And(Vec<ConditionRef>);

pub fn and(conds: Vec<ConditionRef>) -> ConditionRef {
    Arc::new(And(conds))
}

impl Condition for And {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        for c in &self.0 {
            if !c.matches(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn fresh(&self) -> Option<ConditionRef> {
        fork_all(&self.0).map(and)
    }
}

impl fmt::Display for And {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        join(f, "And", &self.0)
    }
}

/// Any condition matches.
pub struct Or(Vec<ConditionRef>);

pub fn or(conds: Vec<ConditionRef>) -> ConditionRef {
    Arc::new(Or(conds))
}

impl Condition for Or {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        for c in &self.0 {
            if c.matches(ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn fresh(&self) -> Option<ConditionRef> {
        fork_all(&self.0).map(or)
    }
}

impl fmt::Display for Or {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        join(f, "Or", &self.0)
    }
}

/// No condition matches.
pub struct NoneOf(Vec<ConditionRef>);

pub fn none(conds: Vec<ConditionRef>) -> ConditionRef {
    Arc::new(NoneOf(conds))
}

impl Condition for NoneOf {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        for c in &self.0 {
            if c.matches(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn fresh(&self) -> Option<ConditionRef> {
        fork_all(&self.0).map(none)
    }
}

impl fmt::Display for NoneOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        join(f, "None", &self.0)
    }
}

/// Negation.
pub struct Not(ConditionRef);

pub fn not(c: impl IntoCondition) -> ConditionRef {
    Arc::new(Not(c.into_condition()))
}

impl Condition for Not {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        Ok(!self.0.matches(ctx)?)
    }

    fn fresh(&self) -> Option<ConditionRef> {
        self.0.fresh().map(|c| Arc::new(Not(c)) as ConditionRef)
    }
}

impl fmt::Display for Not {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Not({})", self.0)
    }
}

/// Evaluates its conditions once and replays the first result.
///
/// An evaluation error is returned once and remembered as `false`.
/// The first evaluation must not race with another.
pub struct OnOnce {
    conds: Vec<ConditionRef>,
    result: Mutex<Option<bool>>,
}

pub fn on_once(conds: Vec<ConditionRef>) -> ConditionRef {
    Arc::new(OnOnce {
        conds,
        result: Mutex::new(None),
    })
}

impl Condition for OnOnce {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        if let Some(r) = *self.result.lock() {
            return Ok(r);
        }
        let mut r = Ok(true);
        for c in &self.conds {
            match c.matches(ctx) {
                Ok(true) => continue,
                other => {
                    r = other;
                    break;
                }
            }
        }
        *self.result.lock() = Some(*r.as_ref().unwrap_or(&false));
        r
    }

    fn fresh(&self) -> Option<ConditionRef> {
        Some(on_once(
            fork_all(&self.conds).unwrap_or_else(|| self.conds.clone()),
        ))
    }
}

impl fmt::Display for OnOnce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        join(f, "OnOnce", &self.conds)
    }
}

/// Matches when any of the comma separated `profiles` is active.
pub fn on_profiles(profiles: &str) -> ConditionRef {
    let wanted: Vec<String> = profiles
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Arc::new(OnProfiles { wanted })
}

struct OnProfiles {
    wanted: Vec<String>,
}

impl Condition for OnProfiles {
    fn matches(&self, ctx: &mut dyn ConditionContext) -> Result<bool> {
        let active = ctx.prop(ACTIVE_PROFILES_PROP, "");
        Ok(active
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .any(|p| self.wanted.iter().any(|w| w == p)))
    }
}

impl fmt::Display for OnProfiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnProfiles(profiles={})", self.wanted.join(","))
    }
}

/// `spring.app.enable-servers` is `true` or unset.
pub fn on_enable_servers() -> OnProperty {
    on_property(ENABLE_SERVERS_PROP)
        .having_value("true")
        .match_if_missing()
}

/// Anything usable where a condition is expected.
pub trait IntoCondition {
    fn into_condition(self) -> ConditionRef;
}

impl IntoCondition for ConditionRef {
    fn into_condition(self) -> ConditionRef {
        self
    }
}

impl IntoCondition for OnProperty {
    fn into_condition(self) -> ConditionRef {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Ctx {
        props: HashMap<String, String>,
        beans: Vec<ConditionBean>,
    }

    impl Ctx {
        fn with(pairs: &[(&str, &str)]) -> Self {
            Ctx {
                props: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                beans: Vec::new(),
            }
        }
    }

    impl ConditionContext for Ctx {
        fn has(&self, key: &str) -> bool {
            self.props.contains_key(key)
        }
        fn prop(&self, key: &str, def: &str) -> String {
            self.props.get(key).cloned().unwrap_or_else(|| def.to_string())
        }
        fn find(&mut self, id: &BeanId) -> Result<Vec<ConditionBean>> {
            Ok(self
                .beans
                .iter()
                .filter(|b| id.ty.map_or(true, |t| t == b.type_key))
                .filter(|b| id.name.is_empty() || id.name == b.name)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_on_property_variants() {
        let mut ctx = Ctx::with(&[("a", "1"), ("port", "8080")]);
        assert!(on_property("a").matches(&mut ctx).unwrap());
        assert!(!on_property("b").matches(&mut ctx).unwrap());
        assert!(on_property("b").match_if_missing().matches(&mut ctx).unwrap());
        assert!(on_property("a").having_value("1").matches(&mut ctx).unwrap());
        assert!(!on_property("a").having_value("2").matches(&mut ctx).unwrap());
        assert!(on_property("port")
            .having_value("expr:$ > 1024")
            .matches(&mut ctx)
            .unwrap());
    }

    #[test]
    fn test_on_property_expression_error_is_wrapped() {
        let mut ctx = Ctx::with(&[("a", "x")]);
        let err = on_property("a")
            .having_value("expr:$ >")
            .matches(&mut ctx)
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("condition OnProperty(name=a, havingValue=expr:$ >) matches error: "));
    }

    #[test]
    fn test_bean_count_conditions() {
        let mut ctx = Ctx::default();
        ctx.beans.push(ConditionBean {
            name: "a".into(),
            type_key: TypeKey::of::<u32>(),
        });
        assert!(on_bean::<u32>().matches(&mut ctx).unwrap());
        assert!(on_single_bean::<u32>().matches(&mut ctx).unwrap());
        assert!(!on_missing_bean::<u32>().matches(&mut ctx).unwrap());
        assert!(on_missing_bean::<String>().matches(&mut ctx).unwrap());
        assert!(!on_bean_named::<u32>("b").matches(&mut ctx).unwrap());
    }

    #[test]
    fn test_combinators_propagate_errors() {
        let failing = on_func(|_| Err(crate::Error::msg("condition error")));
        let mut ctx = Ctx::default();
        let err = and(vec![failing.clone()]).matches(&mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "condition OnFunc(fn=fn) matches error: condition error");
        assert!(not(failing.clone()).matches(&mut ctx).is_err());
        assert!(or(vec![failing.clone()]).matches(&mut ctx).is_err());
        assert!(none(vec![failing]).matches(&mut ctx).is_err());
    }

    #[test]
    fn test_and_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = calls.clone();
            on_func(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
        };
        let mut ctx = Ctx::default();
        let c = and(vec![on_property("nope").into_condition(), counted]);
        assert!(!c.matches(&mut ctx).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_on_once_replays_first_result() {
        let flip = Arc::new(AtomicUsize::new(0));
        let alternating = {
            let flip = flip.clone();
            on_func(move |_| Ok(flip.fetch_add(1, Ordering::SeqCst) % 2 == 0))
        };
        let once = on_once(vec![alternating]);
        let mut ctx = Ctx::default();
        for _ in 0..4 {
            assert!(once.matches(&mut ctx).unwrap());
        }
        assert_eq!(flip.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_once_remembers_error_as_false() {
        let once = on_once(vec![on_func(|_| Err(crate::Error::msg("boom")))]);
        let mut ctx = Ctx::default();
        assert!(once.matches(&mut ctx).is_err());
        assert!(!once.matches(&mut ctx).unwrap());
    }

    #[test]
    fn test_on_expression_and_profiles() {
        let mut ctx = Ctx::with(&[("mode", "fast"), (ACTIVE_PROFILES_PROP, "dev, test")]);
        assert!(on_expression("${mode} == 'fast'").matches(&mut ctx).unwrap());
        assert!(on_expression("mode == 'fast' && has('mode')").matches(&mut ctx).unwrap());
        assert!(on_profiles("prod,test").matches(&mut ctx).unwrap());
        assert!(!on_profiles("prod").matches(&mut ctx).unwrap());
        let err = on_expression("${missing} == 1").matches(&mut ctx).unwrap_err();
        assert!(err.to_string().ends_with("property \"missing\" not exist"));
    }

    #[test]
    fn test_on_enable_servers() {
        let c = on_enable_servers();
        assert!(c.matches(&mut Ctx::default()).unwrap());
        assert!(!c.matches(&mut Ctx::with(&[(ENABLE_SERVERS_PROP, "false")])).unwrap());
    }
}
