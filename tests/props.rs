use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use proptest::prelude::*;
use serde::Deserialize;
use springlet::props::{load, read_file};
use springlet::{Error, Properties};

fn props(pairs: &[(&str, &str)]) -> Properties {
    Properties::from_pairs(pairs.iter().copied()).unwrap()
}

#[test]
fn test_nested_default_resolution() {
    assert_eq!(props(&[]).resolve("${A:=${B:=C}}").unwrap(), "C");
    assert_eq!(props(&[("B", "x")]).resolve("${A:=${B:=C}}").unwrap(), "x");
    assert_eq!(props(&[("A", "y"), ("B", "x")]).resolve("${A:=${B:=C}}").unwrap(), "y");
}

#[test]
fn test_resolution_inside_text_and_values() {
    let p = props(&[("host", "localhost"), ("port", "8080"), ("url", "http://${host}:${port}")]);
    assert_eq!(p.resolve("${url}/api").unwrap(), "http://localhost:8080/api");
}

#[test]
fn test_missing_property_error_names_key() {
    let err = props(&[]).resolve("${db.url}").unwrap_err();
    assert!(matches!(err.root_cause(), Error::PropertyNotExist(k) if k == "db.url"));
}

#[test]
fn test_merge_scalar_then_list_conflicts() {
    let mut s1 = Properties::new();
    s1.insert("http.server.addr", "a").unwrap();
    let mut s2 = Properties::new();
    s2.insert("http.server[0].addr", "b").unwrap();
    let err = s1.merge(&s2).unwrap_err();
    assert!(matches!(err, Error::PropertyConflict(ref path) if path == "http.server"), "{}", err);
}

#[derive(Debug, Deserialize, PartialEq)]
struct ServerConfig {
    addr: String,
    #[serde(default)]
    tls: bool,
    ports: Vec<u16>,
    labels: BTreeMap<String, String>,
}

#[test]
fn test_bind_struct_from_yaml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.yaml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        "server:\n  addr: \"${{host:=0.0.0.0}}:80\"\n  tls: true\n  ports: [80, 443]\n  labels:\n    zone: a"
    )
    .unwrap();

    let p = load(&path.display().to_string()).unwrap().unwrap();
    let cfg: ServerConfig = p.bind("${server}").unwrap();
    assert_eq!(
        cfg,
        ServerConfig {
            addr: "0.0.0.0:80".into(),
            tls: true,
            ports: vec![80, 443],
            labels: BTreeMap::from([("zone".to_string(), "a".to_string())]),
        }
    );
}

#[test]
fn test_scalar_list_is_split_on_commas() {
    let p = props(&[("hosts", "a, b,c")]);
    let hosts: Vec<String> = p.bind("${hosts}").unwrap();
    assert_eq!(hosts, vec!["a", "b", "c"]);
    let missing: Vec<u32> = p.bind("${ports:=1,2}").unwrap();
    assert_eq!(missing, vec![1, 2]);
}

#[test]
fn test_bind_reports_key_on_bad_value() {
    let p = props(&[("port", "eighty")]);
    let err = p.bind::<u16>("${port}").unwrap_err();
    assert!(err.to_string().starts_with("bind port error"), "{}", err);
}

#[test]
fn test_readers_agree_on_flattened_keys() {
    let dir = tempfile::tempdir().unwrap();
    let files = [
        ("a.properties", "db.hosts[0]=h1\ndb.hosts[1]=h2\ndb.timeout=5s\n"),
        ("a.toml", "[db]\nhosts = [\"h1\", \"h2\"]\ntimeout = \"5s\"\n"),
        ("a.json", "{\"db\": {\"hosts\": [\"h1\", \"h2\"], \"timeout\": \"5s\"}}"),
        ("a.yml", "db:\n  hosts:\n    - h1\n    - h2\n  timeout: 5s\n"),
    ];
    for (name, content) in files {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let data = read_file(&path).unwrap();
        let keys: Vec<&str> = data.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["db.hosts[0]", "db.hosts[1]", "db.timeout"], "{}", name);
        let p = load(&path.display().to_string()).unwrap().unwrap();
        let timeout: String = p.bind("${db.timeout}").unwrap();
        assert_eq!(humantime::parse_duration(&timeout).unwrap(), Duration::from_secs(5));
    }
}

#[test]
fn test_unknown_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.ini");
    std::fs::write(&path, "a=1").unwrap();
    let err = read_file(&path).unwrap_err();
    assert!(err.to_string().contains("unsupported file type .ini"), "{}", err);
}

proptest! {
    #[test]
    fn prop_defaults_used_only_when_key_missing(
        key in "[a-z]{1,8}",
        value in "[a-zA-Z0-9]{0,12}",
        def in "[a-zA-Z0-9]{0,12}",
    ) {
        let tag = format!("${{{}:={}}}", key, def);
        prop_assert_eq!(props(&[]).resolve(&tag).unwrap(), def);
        let set = Properties::from_pairs([(key.as_str(), value.as_str())]).unwrap();
        prop_assert_eq!(set.resolve(&tag).unwrap(), value);
    }

    #[test]
    fn prop_text_without_placeholders_is_unchanged(s in "[^$]{0,32}") {
        prop_assert_eq!(props(&[]).resolve(&s).unwrap(), s);
    }
}
