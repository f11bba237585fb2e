/*
 * cache.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compilation cache.
//!
//! Memoizes compiled classes by a [`Fingerprint`] of everything that
//! shapes the generated class: the (preprocessed) source, the normalized
//! compiler settings, the class name, the base class, the module globals
//! and the main method name. The module name is deliberately left out, so
//! textually identical compiles placed in different modules share a class.
//!
//! Concurrent compiles of one fingerprint may both run; the last `put`
//! wins.

use crate::class::ClassRef;
use crate::value::Namespace;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// SHA-256 hex digest identifying a compile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Components of a fingerprint.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintInput<'a> {
    pub source: &'a str,
    /// Canonical text of the normalized compiler settings.
    pub settings: &'a str,
    pub class_name: &'a str,
    /// Description of the base class reference.
    pub base: &'a str,
    pub module_globals: &'a Namespace,
    pub main_method_name: Option<&'a str>,
}

impl FingerprintInput<'_> {
    pub fn compute(&self) -> Fingerprint {
        let mut globals = String::new();
        for (name, value) in self.module_globals {
            globals.push_str(name);
            globals.push('=');
            value.write_fingerprint(&mut globals);
            globals.push(';');
        }
        let components = [
            self.source,
            self.settings,
            self.class_name,
            self.base,
            globals.as_str(),
            self.main_method_name.unwrap_or(""),
        ];

        let mut hasher = Sha256::new();
        for component in components {
            // Length prefixes keep component boundaries unambiguous.
            hasher.update((component.len() as u64).to_le_bytes());
            hasher.update(component.as_bytes());
        }
        let result = hasher.finalize();
        Fingerprint(hex::encode(result))
    }
}

/// Lock-protected map of fingerprints to compiled classes.
#[derive(Default)]
pub struct CompilationCache {
    entries: RwLock<HashMap<Fingerprint, ClassRef>>,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ClassRef> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .cloned()
    }

    /// Store a class, replacing any entry for the same fingerprint.
    pub fn put(&self, fingerprint: Fingerprint, class: ClassRef) {
        tracing::debug!(%fingerprint, class = %class.name(), "storing compiled class");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fingerprint, class);
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<ClassRef> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Debug for CompilationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::template_class;
    use crate::value::Value;
    use std::sync::Arc;

    fn input<'a>(source: &'a str, globals: &'a Namespace) -> FingerprintInput<'a> {
        FingerprintInput {
            source,
            settings: "{}",
            class_name: "Cls",
            base: "name:Template",
            module_globals: globals,
            main_method_name: None,
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let globals = Namespace::new();
        let a = input("$foo", &globals).compute();
        let b = input("$foo", &globals).compute();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_components_matter() {
        let globals = Namespace::new();
        let base = input("$foo", &globals).compute();
        assert_ne!(base, input("$bar", &globals).compute());

        let mut renamed = input("$foo", &globals);
        renamed.class_name = "Other";
        assert_ne!(base, renamed.compute());

        let mut with_globals = Namespace::new();
        with_globals.insert("x".to_string(), Value::Int(1));
        assert_ne!(base, input("$foo", &with_globals).compute());
    }

    #[test]
    fn test_component_boundaries() {
        let globals = Namespace::new();
        let mut a = input("ab", &globals);
        a.settings = "c";
        let mut b = input("a", &globals);
        b.settings = "bc";
        assert_ne!(a.compute(), b.compute());
    }

    #[test]
    fn test_put_get_replace_clear() {
        let cache = CompilationCache::new();
        let globals = Namespace::new();
        let key = input("x", &globals).compute();
        assert!(cache.get(&key).is_none());

        let first = template_class();
        cache.put(key.clone(), first.clone());
        assert!(Arc::ptr_eq(&cache.get(&key).unwrap(), &first));

        let second = crate::builtins::dict_class();
        cache.put(key.clone(), second.clone());
        assert!(Arc::ptr_eq(&cache.get(&key).unwrap(), &second));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
