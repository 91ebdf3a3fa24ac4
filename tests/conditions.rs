use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use springlet::condition::{and, none, not, on_once, or, ConditionBean};
use springlet::{
    on_bean, on_bean_named, on_expression, on_func, on_missing_bean, on_profiles, on_property,
    on_single_bean, BeanId, BeanStatus, Condition, ConditionContext, Container, Error,
    Properties, Result,
};

struct Ctx {
    props: Properties,
}

impl ConditionContext for Ctx {
    fn has(&self, key: &str) -> bool {
        self.props.has(key)
    }

    fn prop(&self, key: &str, def: &str) -> String {
        self.props.get_or(key, def)
    }

    fn find(&mut self, _id: &BeanId) -> Result<Vec<ConditionBean>> {
        Ok(Vec::new())
    }
}

fn ctx(pairs: &[(&str, &str)]) -> Ctx {
    Ctx {
        props: Properties::from_pairs(pairs.iter().copied()).unwrap(),
    }
}

#[test]
fn test_on_property_variants() {
    let mut c = ctx(&[("cache.size", "64"), ("cache.mode", "lru")]);
    assert!(on_property("cache").matches(&mut c).unwrap());
    assert!(!on_property("db").matches(&mut c).unwrap());
    assert!(on_property("db").match_if_missing().matches(&mut c).unwrap());
    assert!(on_property("cache.mode").having_value("lru").matches(&mut c).unwrap());
    assert!(!on_property("cache.mode").having_value("fifo").matches(&mut c).unwrap());
    assert!(on_property("cache.size")
        .having_value("expr:$ >= 32 && $ < 128")
        .matches(&mut c)
        .unwrap());
}

#[test]
fn test_expression_condition_reads_properties() {
    let mut c = ctx(&[("workers", "4"), ("mode", "fast")]);
    assert!(on_expression("workers > 2 && mode == 'fast'").matches(&mut c).unwrap());
    assert!(on_expression("${workers:=0} == 4").matches(&mut c).unwrap());
    assert!(!on_expression("${threads:=1} > 1").matches(&mut c).unwrap());
    let err = on_expression("workers + 1").matches(&mut c).unwrap_err();
    assert!(err.to_string().starts_with("condition OnExpression(expression=workers + 1) matches error"));
}

#[test]
fn test_combinators() {
    let mut c = ctx(&[("a", "1")]);
    let yes = || on_property("a").into_condition();
    let no = || on_property("b").into_condition();
    assert!(and(vec![yes(), yes()]).matches(&mut c).unwrap());
    assert!(!and(vec![yes(), no()]).matches(&mut c).unwrap());
    assert!(or(vec![no(), yes()]).matches(&mut c).unwrap());
    assert!(!or(vec![no(), no()]).matches(&mut c).unwrap());
    assert!(none(vec![no(), no()]).matches(&mut c).unwrap());
    assert!(!none(vec![no(), yes()]).matches(&mut c).unwrap());
    assert!(not(no()).matches(&mut c).unwrap());
    assert_eq!(not(on_property("b")).to_string(), "Not(OnProperty(name=b))");
}

#[test]
fn test_on_once_replays_first_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let flip = on_func(move |_| Ok(counter.fetch_add(1, Ordering::SeqCst) % 2 == 0));
    let once = on_once(vec![flip]);
    let mut c = ctx(&[]);
    for _ in 0..4 {
        assert!(once.matches(&mut c).unwrap());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_profiles() {
    let mut c = ctx(&[("spring.profiles.active", "dev, test")]);
    assert!(on_profiles("prod,test").matches(&mut c).unwrap());
    assert!(!on_profiles("prod").matches(&mut c).unwrap());
    assert!(!on_profiles("dev").matches(&mut ctx(&[])).unwrap());
}

trait Codec: Send + Sync {}

struct Json;
impl Codec for Json {}

struct Yaml;
impl Codec for Yaml {}

struct Api;
struct Fallback;
struct Single;

#[test]
fn test_bean_conditions_in_container() {
    let mut c = Container::new();
    c.provide(Json).name("json").export(|b| b as Arc<dyn Codec>);
    c.provide(Yaml)
        .name("yaml")
        .condition(on_property("codec.yaml"))
        .export(|b| b as Arc<dyn Codec>);
    c.provide(Api).condition(on_bean::<dyn Codec>());
    c.provide(Fallback).condition(on_missing_bean::<Yaml>());
    c.provide(Single).condition(on_single_bean::<dyn Codec>());
    c.refresh(Properties::new()).unwrap();

    let status = |name: &str| {
        c.definitions()
            .iter()
            .find(|d| d.name() == name)
            .map(|d| d.status())
            .unwrap()
    };
    assert_eq!(status("yaml"), BeanStatus::Deleted);
    assert_eq!(status("Api"), BeanStatus::Resolved);
    assert_eq!(status("Fallback"), BeanStatus::Resolved);
    assert_eq!(status("Single"), BeanStatus::Resolved);
}

#[test]
fn test_bean_condition_by_name_sees_later_registrations() {
    let mut c = Container::new();
    c.provide(Api).condition(on_bean_named::<Json>("json"));
    c.provide(Json).name("json").condition(on_property("json.on"));
    c.refresh(Properties::from_pairs([("json.on", "yes")]).unwrap()).unwrap();
    assert!(c.definitions().iter().all(|d| d.status() == BeanStatus::Resolved));
}

#[test]
fn test_condition_error_aborts_refresh() {
    let mut c = Container::new();
    c.provide(Api).condition(on_bean::<Json>());
    c.provide(Json).condition(on_func(|_| Err(Error::msg("condition error"))));
    let err = c.refresh(Properties::new()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.starts_with("resolve bean error: condition OnBean(selector={Type:"), "{}", msg);
    assert!(msg.ends_with("matches error: condition OnFunc(fn=fn) matches error: condition error"), "{}", msg);
}

#[test]
fn test_registered_function_in_expression() {
    use springlet::expr::{register_express_fn, Value};

    register_express_fn("even", |args| match args {
        [Value::Int(i)] => Ok(Value::Bool(i % 2 == 0)),
        _ => Err(Error::msg("even expects one int")),
    });
    let mut c = ctx(&[("shards", "4")]);
    assert!(on_expression("even(${shards:=1})").matches(&mut c).unwrap());
    assert!(!on_expression("even(${replicas:=3})").matches(&mut c).unwrap());
}
