//! Typed key-value parameters passed to parsers.
//!
//! A [`ParserParameters`] map carries format-specific options such as
//! `TXTParser::parse_paragraphs` without forcing every parser to grow
//! constructor arguments. Values are stored type-erased and recovered with
//! [`ParserParameters::get`].

use ahash::AHashMap;
use std::any::Any;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct ParserParameters {
    values: AHashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ParserParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a parameter set with a single entry.
    pub fn with<T: Any + Send + Sync>(name: &str, value: T) -> Self {
        let mut parameters = Self::new();
        parameters.set(name, value);
        parameters
    }

    pub fn set<T: Any + Send + Sync>(&mut self, name: &str, value: T) {
        self.values.insert(name.to_string(), Arc::new(value));
    }

    /// Returns the value stored under `name` if present and of type `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self, name: &str) -> Option<T> {
        self.values
            .get(name)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Merge `other` into `self`; entries of `other` win on conflict.
    pub fn extend(&mut self, other: &ParserParameters) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }
}

impl std::fmt::Debug for ParserParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserParameters")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}
