//! Process definition registry.
//!
//! The kernel does not parse process models; it only needs to know which
//! definition keys are startable. Definitions are registered at startup and
//! read-only thereafter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{DefinitionKey, Error, Result};

/// A startable process definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessDefinition {
    pub key: DefinitionKey,
    pub name: String,
}

impl ProcessDefinition {
    pub fn new(key: DefinitionKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
        }
    }
}

/// Known process definitions, keyed by definition key.
#[derive(Debug, Default)]
pub struct ProcessDefinitionRegistry {
    definitions: HashMap<String, ProcessDefinition>,
}

impl ProcessDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Re-registering a key overwrites it.
    pub fn register(&mut self, definition: ProcessDefinition) {
        self.definitions
            .insert(definition.key.as_str().to_string(), definition);
    }

    pub fn get(&self, key: &str) -> Option<&ProcessDefinition> {
        self.definitions.get(key)
    }

    /// Resolve a key or fail with `UnknownDefinition`.
    pub fn require(&self, key: &str) -> Result<&ProcessDefinition> {
        self.get(key)
            .ok_or_else(|| Error::unknown_definition(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.definitions.contains_key(key)
    }

    pub fn count(&self) -> usize {
        self.definitions.len()
    }
}
