//! Creation stack for circular dependency detection.

use crate::error::{Error, Result};

const MAX_DEPTH: usize = 1024;

/// Beans currently under construction, outermost first.
///
/// Frames are keyed by bean index; names only label the reported path, so
/// two beans sharing a name never look like a cycle.
#[derive(Debug, Default)]
pub(crate) struct CreationStack {
    stack: Vec<(usize, String)>,
}

impl CreationStack {
    /// Pushes bean `id`; fails with the cycle path if it is already on the stack.
    pub(crate) fn push(&mut self, id: usize, name: &str) -> Result<()> {
        // Detection happens before pushing the new frame
        if let Some(path) = self.cycle_to(id) {
            return Err(Error::Circular(path));
        }
        if self.stack.len() >= MAX_DEPTH {
            return Err(Error::msg(format!("creation depth exceeded {}", MAX_DEPTH)));
        }
        self.stack.push((id, name.to_string()));
        Ok(())
    }

    pub(crate) fn pop(&mut self, id: usize) {
        if let Some((last, _)) = self.stack.pop() {
            debug_assert_eq!(last, id);
        }
    }

    /// Path from the frame of bean `id` back to it, if it is on the stack.
    pub(crate) fn cycle_to(&self, id: usize) -> Option<Vec<String>> {
        let pos = self.stack.iter().position(|(i, _)| *i == id)?;
        let mut path: Vec<String> = self.stack[pos..].iter().map(|(_, n)| n.clone()).collect();
        path.push(self.stack[pos].1.clone());
        Some(path)
    }

    pub(crate) fn clear(&mut self) {
        self.stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_path_starts_at_repeated_bean() {
        let mut s = CreationStack::default();
        s.push(0, "root").unwrap();
        s.push(1, "a").unwrap();
        s.push(2, "b").unwrap();
        let err = s.push(1, "a").unwrap_err();
        assert_eq!(err.to_string(), "found circular references: a -> b -> a");
    }

    #[test]
    fn test_pop_allows_reentry() {
        let mut s = CreationStack::default();
        s.push(0, "a").unwrap();
        s.pop(0);
        assert!(s.push(0, "a").is_ok());
        assert_eq!(s.cycle_to(0), Some(vec!["a".to_string(), "a".to_string()]));
        assert_eq!(s.cycle_to(1), None);
    }

    #[test]
    fn test_same_name_different_beans_is_not_a_cycle() {
        let mut s = CreationStack::default();
        s.push(0, "main").unwrap();
        assert!(s.push(1, "main").is_ok());
        assert_eq!(s.cycle_to(1), Some(vec!["main".to_string(), "main".to_string()]));
    }
}
