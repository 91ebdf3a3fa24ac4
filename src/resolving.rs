//! Turning the registered definitions into the active bean set.
//!
//! The phases run in a fixed order and stop at the first error:
//! modules are applied, configuration beans are scanned, every bean's
//! conditions are resolved and finally identities are checked for
//! duplicates.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::bean::{BeanDefinition, BeanStatus};
use crate::condition::{Condition, ConditionBean, ConditionContext};
use crate::error::{Error, ErrorContext, Result};
use crate::key::{BeanId, TypeKey};
use crate::props::Properties;
use crate::registry::Registry;

const DEFAULT_INCLUDE: &str = "New.*";

pub(crate) fn resolve(reg: &mut Registry, props: &Properties) -> Result<()> {
    apply_modules(reg, props).context("apply module error")?;
    scan_configurations(reg).context("scan configuration error")?;
    resolve_beans(&mut reg.beans, props).context("resolve bean error")?;
    check_duplicates(&reg.beans)
}

/// Condition context that only sees properties.
struct PropsContext<'a> {
    props: &'a Properties,
}

impl ConditionContext for PropsContext<'_> {
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

fn apply_modules(reg: &mut Registry, props: &Properties) -> Result<()> {
    // Modules registered by modules run too.
    while !reg.modules.is_empty() {
        let modules = std::mem::take(&mut reg.modules);
        for m in modules {
            let mut ctx = PropsContext { props };
            let mut active = true;
            for c in &m.conditions {
                if !c.matches(&mut ctx)? {
                    active = false;
                    break;
                }
            }
            if !active {
                debug!(target: "springlet::resolve", module = %m.file_line, "module skipped");
                continue;
            }
            (m.f)(reg, props)?;
        }
    }
    Ok(())
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|_| Error::msg(format!("invalid regexp '{}'", p))))
        .collect()
}

fn scan_configurations(reg: &mut Registry) -> Result<()> {
    let mut added = Vec::new();
    for def in &reg.beans {
        let Some(cfg) = &def.configuration else {
            continue;
        };
        let includes = if cfg.includes.is_empty() {
            compile(&[DEFAULT_INCLUDE.to_string()])?
        } else {
            compile(&cfg.includes)?
        };
        let excludes = compile(&cfg.excludes)?;
        let prefix_len = def.name.len() + 1;
        for method_def in (cfg.scan)(&def.name, &def.file_line) {
            let method = &method_def.name[prefix_len..];
            if !includes.iter().any(|r| r.is_match(method)) {
                continue;
            }
            if excludes.iter().any(|r| r.is_match(method)) {
                continue;
            }
            debug!(target: "springlet::resolve", parent = %def.name, method, "configuration method scanned");
            added.push(method_def);
        }
    }
    reg.beans.extend(added);
    Ok(())
}

/// Condition context over the bean set being resolved.
struct ResolveContext<'a> {
    beans: &'a mut [BeanDefinition],
    props: &'a Properties,
}

impl ResolveContext<'_> {
    fn resolve_one(&mut self, i: usize) -> Result<()> {
        if self.beans[i].status != BeanStatus::Default {
            return Ok(());
        }
        self.beans[i].status = BeanStatus::Resolving;
        let conditions = self.beans[i].conditions.clone();
        for c in conditions {
            if !c.matches(self)? {
                self.beans[i].status = BeanStatus::Deleted;
                debug!(
                    target: "springlet::resolve",
                    bean = %self.beans[i],
                    condition = %c,
                    "bean deleted by condition"
                );
                return Ok(());
            }
        }
        self.beans[i].status = BeanStatus::Resolved;
        Ok(())
    }
}

impl ConditionContext for ResolveContext<'_> {
    fn has(&self, key: &str) -> bool {
        self.props.has(key)
    }

    fn prop(&self, key: &str, def: &str) -> String {
        self.props.get_or(key, def)
    }

    fn find(&mut self, id: &BeanId) -> Result<Vec<ConditionBean>> {
        let candidates: Vec<usize> = (0..self.beans.len())
            .filter(|&i| self.beans[i].matches(id))
            .collect();
        let mut found = Vec::new();
        for i in candidates {
            self.resolve_one(i)?;
            // A bean still resolving is part of the current lookup chain.
            if self.beans[i].status == BeanStatus::Resolved {
                found.push(ConditionBean {
                    name: self.beans[i].name.clone(),
                    type_key: self.beans[i].type_key,
                });
            }
        }
        Ok(found)
    }
}

pub(crate) fn resolve_beans(beans: &mut [BeanDefinition], props: &Properties) -> Result<()> {
    let mut ctx = ResolveContext { beans, props };
    for i in 0..ctx.beans.len() {
        ctx.resolve_one(i)?;
    }
    Ok(())
}

pub(crate) fn check_duplicates(beans: &[BeanDefinition]) -> Result<()> {
    let mut seen: HashMap<(&str, TypeKey), usize> = HashMap::new();
    for (i, def) in beans.iter().enumerate() {
        if def.status == BeanStatus::Deleted {
            continue;
        }
        for (ty, _) in &def.casts {
            if let Some(&j) = seen.get(&(def.name.as_str(), *ty)) {
                if j != i {
                    return Err(Error::DuplicateBean(beans[j].to_string(), def.to_string()));
                }
            }
            seen.insert((def.name.as_str(), *ty), i);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{on_bean, on_func, on_missing_bean, on_property};

    struct A;
    struct B;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        Properties::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn test_every_bean_ends_resolved_or_deleted() {
        let mut r = Registry::new();
        r.provide(A).condition(on_bean::<B>());
        r.provide(B).condition(on_property("b.enabled"));
        r.provide(A).name("other").condition(on_missing_bean::<B>());
        resolve(&mut r, &props(&[])).unwrap();
        let statuses: Vec<BeanStatus> = r.beans().iter().map(|b| b.status()).collect();
        assert_eq!(
            statuses,
            vec![BeanStatus::Deleted, BeanStatus::Deleted, BeanStatus::Resolved]
        );
    }

    #[test]
    fn test_mutual_conditions_do_not_recurse_forever() {
        let mut r = Registry::new();
        r.provide(A).condition(on_bean::<B>());
        r.provide(B).condition(on_bean::<A>());
        resolve(&mut r, &props(&[])).unwrap();
        // A is resolving while B looks for it, so B finds nothing.
        assert_eq!(r.beans()[1].status(), BeanStatus::Deleted);
        assert_eq!(r.beans()[0].status(), BeanStatus::Deleted);
    }

    #[test]
    fn test_condition_error_is_wrapped() {
        let mut r = Registry::new();
        r.provide(B)
            .condition(on_func(|_| Err(Error::msg("condition error"))));
        let err = resolve(&mut r, &props(&[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "resolve bean error: condition OnFunc(fn=fn) matches error: condition error"
        );
    }

    #[test]
    fn test_duplicates_detected() {
        let mut r = Registry::new();
        r.provide(A).name("a");
        r.provide(A).name("a");
        let err = resolve(&mut r, &props(&[])).unwrap_err();
        assert!(matches!(err, Error::DuplicateBean(..)));
        assert!(err.to_string().starts_with("found duplicate beans [name=a "));
    }

    #[test]
    fn test_deleted_duplicate_is_ignored() {
        let mut r = Registry::new();
        r.provide(A).name("a");
        r.provide(A).name("a").condition(on_property("never").into_condition());
        assert!(resolve(&mut r, &props(&[])).is_ok());
    }

    #[test]
    fn test_module_registers_beans_when_active() {
        let mut r = Registry::new();
        r.module(vec![on_property("feature.on")], |r, p| {
            let name = p.get_or("feature.name", "x");
            r.provide(A).name(name);
            Ok(())
        });
        resolve(&mut r, &props(&[("feature.on", "1"), ("feature.name", "f")])).unwrap();
        assert_eq!(r.beans()[0].name(), "f");

        let mut r2 = Registry::new();
        r2.module(vec![on_property("feature.on")], |r, _| {
            r.provide(A);
            Ok(())
        });
        resolve(&mut r2, &props(&[])).unwrap();
        assert!(r2.beans().is_empty());
    }

    #[test]
    fn test_module_error_is_wrapped() {
        let mut r = Registry::new();
        r.module(vec![], |_, _| Err(Error::msg("boom")));
        let err = resolve(&mut r, &props(&[])).unwrap_err();
        assert_eq!(err.to_string(), "apply module error: boom");
    }
}
