use std::sync::Arc;

use springlet::condition::on_once;
use springlet::{on_property, Arg, BeanId, BeanStatus, Container, Properties, Registry, TypeKey};

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

trait Named: Send + Sync {
    fn name(&self) -> &str;
}

struct English;

impl Greeter for English {
    fn greet(&self) -> String {
        "hello".into()
    }
}

impl Named for English {
    fn name(&self) -> &str {
        "en"
    }
}

struct Clock;

fn new_clock() -> Clock {
    Clock
}

#[test]
fn test_definition_accessors() {
    let mut c = Container::new();
    c.provide(English)
        .export(|e| e as Arc<dyn Greeter>)
        .export(|e| e as Arc<dyn Named>)
        .export(|e| e as Arc<dyn Greeter>);
    c.provide_fn(new_clock, vec![])
        .depends_on(BeanId::of::<English>())
        .root();

    let defs = c.definitions();
    assert_eq!(defs[0].name(), "English");
    assert_eq!(
        defs[0].exports(),
        vec![TypeKey::of::<dyn Greeter>(), TypeKey::of::<dyn Named>()]
    );
    assert!(defs[0].has_type(TypeKey::of::<English>()));
    assert!(!defs[0].is_root());
    assert_eq!(defs[1].name(), "new_clock");
    assert_eq!(defs[1].type_key(), TypeKey::of::<Clock>());
    assert_eq!(defs[1].depends_on(), &[BeanId::of::<English>()]);
    assert!(defs[1].is_root());
    assert!(defs[1].file_line().starts_with("tests"), "{}", defs[1].file_line());
    assert!(defs[1].file_line().contains("bean_definition.rs:"));
    assert!(defs.iter().all(|d| d.status() == BeanStatus::Default));
}

#[test]
fn test_every_export_sees_the_same_instance() {
    let mut c = Container::new();
    c.provide(English)
        .export(|e| e as Arc<dyn Greeter>)
        .export(|e| e as Arc<dyn Named>);
    c.refresh(Properties::new()).unwrap();

    let g = c.get::<dyn Greeter>("").unwrap();
    let n = c.get::<dyn Named>("").unwrap();
    let own = c.get::<English>("").unwrap();
    assert_eq!(g.greet(), "hello");
    assert_eq!(n.name(), "en");
    assert!(std::ptr::eq(
        Arc::as_ptr(&n) as *const u8,
        Arc::as_ptr(&own) as *const u8
    ));
}

#[test]
fn test_debug_output_names_bean() {
    let mut r = Registry::new();
    r.provide(Clock).name("clock");
    let debug = format!("{:?}", r.beans()[0]);
    assert!(debug.starts_with("BeanDefinition { name: \"clock\""), "{}", debug);
    assert!(r.beans()[0].to_string().starts_with("name=clock tests"));
}

#[test]
fn test_registry_clone_creates_fresh_instances() {
    struct Counter(usize);

    let mut r = Registry::new();
    r.provide_fn(|| Counter(0), vec![]).root();
    r.provide(Clock).name("shared");

    let mut first = Container::with_registry(r.clone());
    let mut second = Container::with_registry(r);
    first.refresh(Properties::new()).unwrap();
    second.refresh(Properties::new()).unwrap();

    let a = first.get::<Counter>("").unwrap();
    let b = second.get::<Counter>("").unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.0 + b.0, 0);
    assert!(Arc::ptr_eq(
        &first.get::<Clock>("shared").unwrap(),
        &second.get::<Clock>("shared").unwrap()
    ));
}

#[test]
fn test_registry_clone_forgets_once_results() {
    let mut r = Registry::new();
    r.provide(Clock)
        .name("clock")
        .condition(on_once(vec![on_property("clock.enabled").into_condition()]));

    let mut first = Container::with_registry(r.clone());
    let mut second = Container::with_registry(r.clone());
    first
        .refresh(Properties::from_pairs([("clock.enabled", "true")]).unwrap())
        .unwrap();
    second.refresh(Properties::new()).unwrap();

    assert!(first.get::<Clock>("clock").is_ok());
    assert!(second.get::<Clock>("clock").is_err());
}

#[test]
#[should_panic(expected = "arguments must be all indexed or all positional")]
fn test_mixed_arguments_panic() {
    let mut c = Container::new();
    c.provide_fn(
        |_a: u32, _b: u32| Clock,
        vec![Arg::tag("${a}"), Arg::index(1, Arg::tag("${b}"))],
    );
}

#[test]
#[should_panic(expected = "too many arguments: expected at most 1, got 2")]
fn test_extra_arguments_panic() {
    let mut c = Container::new();
    c.provide_fn(|_a: u32| Clock, vec![Arg::tag("${a}"), Arg::tag("${b}")]);
}

#[test]
#[should_panic(expected = "arg index 3 exceeds the 2 parameters")]
fn test_index_out_of_range_panics() {
    let mut c = Container::new();
    c.provide_fn(|_a: u32, _b: u32| Clock, vec![Arg::index(3, Arg::tag("${a}"))]);
}

#[test]
#[should_panic(expected = "a validator can only be attached to a tag argument")]
fn test_validator_on_value_panics() {
    let _ = Arg::value(1u32).expr("$ > 0");
}

#[test]
#[should_panic(expected = "container is already refreshing or refreshed")]
fn test_provide_after_refresh_panics() {
    let mut c = Container::new();
    c.refresh(Properties::new()).unwrap();
    c.provide(Clock);
}

#[cfg(feature = "diagnostics")]
#[test]
fn test_debug_string_lists_beans() {
    let mut c = Container::new();
    c.provide(Clock).name("clock").root();
    c.refresh(Properties::new()).unwrap();
    let dump = c.to_debug_string();
    assert!(dump.contains("clock"), "{}", dump);
}
