//! Destroy hooks with LIFO execution order.

use tracing::error;

use crate::error::Result;

type DestroyFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Destroy hooks in bean creation order; they run in reverse.
#[derive(Default)]
pub(crate) struct DisposeBag {
    hooks: Vec<(String, DestroyFn)>,
}

impl DisposeBag {
    pub(crate) fn push(&mut self, bean: String, f: DestroyFn) {
        self.hooks.push((bean, f));
    }

    /// Runs every hook, last registered first. Failures are logged and do
    /// not stop the remaining hooks.
    pub(crate) fn run_all_reverse(&mut self) {
        while let Some((bean, f)) = self.hooks.pop() {
            if let Err(e) = f() {
                error!(target: "springlet::container", bean = %bean, "destroy bean error: {}", e);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_hooks_run_in_reverse_and_survive_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bag = DisposeBag::default();
        for name in ["a", "b", "c"] {
            let seen = seen.clone();
            bag.push(
                name.to_string(),
                Box::new(move || {
                    seen.lock().unwrap().push(name);
                    if name == "b" {
                        return Err(crate::Error::msg("boom"));
                    }
                    Ok(())
                }),
            );
        }
        bag.run_all_reverse();
        assert!(bag.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["c", "b", "a"]);
    }
}
