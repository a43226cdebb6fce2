//! Label identity across the two representations.

use std::collections::HashMap;
use std::hash::Hash;

/// Maps labels of one representation to labels of the other.
///
/// The first lookup of a source label allocates its target; every later
/// lookup returns that same target. Labels are matched by identity only,
/// never by position.
#[derive(Debug, Clone)]
pub struct LabelMap<S, T> {
    targets: Vec<T>,
    handles: HashMap<S, usize>,
}

impl<S, T> Default for LabelMap<S, T> {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            handles: HashMap::new(),
        }
    }
}

impl<S, T> LabelMap<S, T>
where
    S: Copy + Eq + Hash,
    T: Copy,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, source: S, allocate: impl FnOnce() -> T) -> T {
        if let Some(handle) = self.handles.get(&source) {
            return self.targets[*handle];
        }
        let target = allocate();
        self.handles.insert(source, self.targets.len());
        self.targets.push(target);
        target
    }

    /// The target of `source` if it was resolved before.
    pub fn get(&self, source: S) -> Option<T> {
        self.handles.get(&source).map(|handle| self.targets[*handle])
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::LabelNode;
    use crate::nodes::CodeNode;
    use crate::visitor::Label;

    #[test]
    fn repeated_lookups_return_the_same_target() {
        let mut code = CodeNode::default();
        let mut labels: LabelMap<Label, LabelNode> = LabelMap::new();
        let source = Label::new();
        let first = labels.resolve(source, || code.new_label());
        let second = labels.resolve(source, || code.new_label());
        assert_eq!(first, second);
        assert_eq!(code.label_count(), 1);
        assert_eq!(labels.get(source), Some(first));
    }

    #[test]
    fn distinct_sources_never_merge() {
        let mut code = CodeNode::default();
        let mut labels: LabelMap<Label, LabelNode> = LabelMap::new();
        let a = labels.resolve(Label::new(), || code.new_label());
        let b = labels.resolve(Label::new(), || code.new_label());
        assert_ne!(a, b);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get(Label::new()), None);
    }
}
