use crate::{error::Error, types::Value};
use fxhash::FxHashMap;

/// Per-record scratchpad exposing already-processed sibling values by name,
/// with parent chaining for nested records.
///
/// A context lives for exactly one parse or write of one record. Lookups
/// resolve innermost-first, walking out through the enclosing records.
#[derive(Debug, Default)]
pub struct ParsingContext<'a> {
    values: FxHashMap<String, Value>,
    parent: Option<&'a ParsingContext<'a>>,
}

impl<'a> ParsingContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_parent(parent: Option<&'a ParsingContext<'a>>) -> Self {
        Self {
            values: FxHashMap::default(),
            parent,
        }
    }

    /// Look up a sibling (or enclosing-record) field value by name.
    pub fn get(&self, name: &str) -> Result<&Value, Error> {
        self.try_get(name)
            .ok_or_else(|| Error::UnknownField(name.to_owned()))
    }

    pub fn try_get(&self, name: &str) -> Option<&Value> {
        match self.values.get(name) {
            Some(v) => Some(v),
            None => self.parent.and_then(|p| p.try_get(name)),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub(crate) fn into_values(self) -> FxHashMap<String, Value> {
        self.values
    }
}
