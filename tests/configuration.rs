use std::sync::Arc;

use springlet::{
    on_property, Arg, BeanMethod, BeanStatus, Configuration, ConfigurationBean, Container,
    Properties,
};

struct Factory {
    prefix: String,
}

struct Child(String);

struct Helper;

struct Tagged {
    label: String,
}

impl ConfigurationBean for Factory {
    fn bean_methods() -> Vec<BeanMethod<Self>> {
        vec![
            BeanMethod::new("NewChild", |f: Arc<Factory>| {
                Child(format!("{}-child", f.prefix))
            }),
            BeanMethod::new("Helper", |_: Arc<Factory>| Helper),
            BeanMethod::with_args(
                "NewTagged",
                |f: Arc<Factory>, suffix: String| Tagged {
                    label: format!("{}-{}", f.prefix, suffix),
                },
                vec![Arg::tag("${tagged.suffix:=x}")],
            ),
        ]
    }
}

fn status(c: &Container, name: &str) -> Option<BeanStatus> {
    c.definitions()
        .iter()
        .find(|d| d.name() == name)
        .map(|d| d.status())
}

#[test]
fn test_method_beans_are_named_after_parent() {
    let mut c = Container::new();
    c.provide(Factory { prefix: "p".into() })
        .name("factory")
        .configuration(Configuration::new());
    c.refresh(Properties::from_pairs([("tagged.suffix", "y")]).unwrap())
        .unwrap();

    assert_eq!(c.get::<Child>("factory_NewChild").unwrap().0, "p-child");
    assert_eq!(c.get::<Tagged>("").unwrap().label, "p-y");
    assert_eq!(status(&c, "factory_Helper"), None);
}

#[test]
fn test_method_beans_follow_deleted_parent() {
    let mut c = Container::new();
    c.provide(Factory { prefix: "p".into() })
        .name("factory")
        .condition(on_property("factory.enabled"))
        .configuration(Configuration::new());
    c.refresh(Properties::new()).unwrap();

    assert_eq!(status(&c, "factory"), Some(BeanStatus::Deleted));
    assert_eq!(status(&c, "factory_NewChild"), Some(BeanStatus::Deleted));
    assert_eq!(status(&c, "factory_NewTagged"), Some(BeanStatus::Deleted));
    assert!(c.get::<Child>("").is_err());
}

#[test]
fn test_include_and_exclude_patterns() {
    let mut c = Container::new();
    c.provide(Factory { prefix: "p".into() })
        .name("factory")
        .configuration(
            Configuration::new()
                .include("New.*")
                .include("Helper")
                .exclude("Tagged$"),
        );
    c.refresh(Properties::new()).unwrap();

    assert_eq!(status(&c, "factory_NewChild"), Some(BeanStatus::Resolved));
    assert_eq!(status(&c, "factory_Helper"), Some(BeanStatus::Resolved));
    assert_eq!(status(&c, "factory_NewTagged"), None);
}

#[test]
fn test_invalid_pattern_fails_refresh() {
    let mut c = Container::new();
    c.provide(Factory { prefix: "p".into() })
        .name("factory")
        .configuration(Configuration::new().include("New("));
    let err = c.refresh(Properties::new()).unwrap_err();
    assert!(err.to_string().starts_with("scan configuration error"), "{}", err);
    assert!(err.to_string().contains("invalid regexp 'New('"), "{}", err);
}
