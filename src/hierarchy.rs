//! Class ancestry lookups used when merging reference types during frame
//! computation.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

pub const OBJECT: &str = "java/lang/Object";

/// Supplies the direct super class of a class given by internal name.
pub trait HierarchyResolver {
    /// `None` when the class is unknown. `java/lang/Object` has no super
    /// class and reports `None` as well.
    fn super_class(&self, internal_name: &str) -> Option<String>;
}

impl<F> HierarchyResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn super_class(&self, internal_name: &str) -> Option<String> {
        self(internal_name)
    }
}

/// A fixed table of `class -> super class` edges, preloaded with the
/// common `java.lang` throwables.
#[derive(Debug, Clone)]
pub struct ClassHierarchy {
    supers: HashMap<String, String>,
}

impl Default for ClassHierarchy {
    fn default() -> Self {
        let mut hierarchy = Self {
            supers: HashMap::new(),
        };
        for (name, parent) in [
            ("java/lang/String", OBJECT),
            ("java/lang/Number", OBJECT),
            ("java/lang/Integer", "java/lang/Number"),
            ("java/lang/Long", "java/lang/Number"),
            ("java/lang/Throwable", OBJECT),
            ("java/lang/Exception", "java/lang/Throwable"),
            ("java/lang/Error", "java/lang/Throwable"),
            ("java/lang/RuntimeException", "java/lang/Exception"),
            ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
            ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
            ("java/lang/NullPointerException", "java/lang/RuntimeException"),
            ("java/lang/ClassCastException", "java/lang/RuntimeException"),
            ("java/io/IOException", "java/lang/Exception"),
            ("java/security/GeneralSecurityException", "java/lang/Exception"),
        ] {
            hierarchy.insert(name, parent);
        }
        hierarchy
    }
}

impl ClassHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, super_class: impl Into<String>) -> &mut Self {
        self.supers.insert(name.into(), super_class.into());
        self
    }
}

impl HierarchyResolver for ClassHierarchy {
    fn super_class(&self, internal_name: &str) -> Option<String> {
        self.supers.get(internal_name).cloned()
    }
}

/// Walks the super class chain of `name` up to `java/lang/Object`.
fn ancestry(resolver: &dyn HierarchyResolver, name: &str) -> Option<Vec<String>> {
    let mut chain = vec![name.to_string()];
    let mut seen = HashSet::new();
    seen.insert(name.to_string());
    let mut current = name.to_string();
    while current != OBJECT {
        let parent = resolver.super_class(&current)?;
        if !seen.insert(parent.clone()) {
            return None;
        }
        chain.push(parent.clone());
        current = parent;
    }
    Some(chain)
}

/// The most specific common super class of two internal names. Arrays
/// merge to `java/lang/Object`.
pub fn common_super_class(
    resolver: &dyn HierarchyResolver,
    left: &str,
    right: &str,
) -> Result<String> {
    if left == right {
        return Ok(left.to_string());
    }
    if left == OBJECT || right == OBJECT || left.starts_with('[') || right.starts_with('[') {
        return Ok(OBJECT.to_string());
    }
    let unresolved = || Error::HierarchyResolution {
        left: left.to_string(),
        right: right.to_string(),
    };
    let left_chain = ancestry(resolver, left).ok_or_else(unresolved)?;
    let right_chain = ancestry(resolver, right).ok_or_else(unresolved)?;
    let left_set: HashSet<&str> = left_chain.iter().map(String::as_str).collect();
    right_chain
        .iter()
        .find(|name| left_set.contains(name.as_str()))
        .cloned()
        .ok_or_else(unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_super_class_of_known_throwables() {
        let hierarchy = ClassHierarchy::new();
        let common = common_super_class(
            &hierarchy,
            "java/lang/IllegalStateException",
            "java/io/IOException",
        );
        assert_eq!(common.unwrap(), "java/lang/Exception");
        assert_eq!(
            common_super_class(&hierarchy, "java/lang/Error", "java/lang/String").unwrap(),
            OBJECT
        );
        assert_eq!(common_super_class(&hierarchy, "[I", "java/lang/String").unwrap(), OBJECT);
    }

    #[test]
    fn unknown_ancestry_is_an_error() {
        let hierarchy = ClassHierarchy::new();
        let err = common_super_class(&hierarchy, "com/example/A", "com/example/B").unwrap_err();
        assert!(matches!(err, Error::HierarchyResolution { .. }));
    }

    #[test]
    fn closures_resolve_application_classes() {
        let resolver = |name: &str| match name {
            "com/example/A" | "com/example/B" => Some("com/example/Base".to_string()),
            "com/example/Base" => Some(OBJECT.to_string()),
            _ => None,
        };
        assert_eq!(
            common_super_class(&resolver, "com/example/A", "com/example/B").unwrap(),
            "com/example/Base"
        );
    }
}
