//! Alias lookup seam.
//!
//! The conversation store that remembers "the prod bucket" lives outside the
//! core. From here it is only a lookup function.

use crate::resource::ResourceRef;
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves a human alias to a resource.
pub trait AliasResolver: Send + Sync {
    /// `None` means the alias is unknown.
    fn resolve_alias(&self, name: &str) -> Option<ResourceRef>;
}

/// Simple in-process alias table.
#[derive(Default)]
pub struct InMemoryAliasStore {
    aliases: RwLock<HashMap<String, ResourceRef>>,
}

impl InMemoryAliasStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an alias. Names are case-insensitive.
    pub fn insert(&self, name: impl AsRef<str>, resource: ResourceRef) {
        if let Ok(mut aliases) = self.aliases.write() {
            aliases.insert(name.as_ref().to_lowercase(), resource);
        }
    }

    pub fn remove(&self, name: &str) -> Option<ResourceRef> {
        self.aliases
            .write()
            .ok()
            .and_then(|mut aliases| aliases.remove(&name.to_lowercase()))
    }
}

impl AliasResolver for InMemoryAliasStore {
    fn resolve_alias(&self, name: &str) -> Option<ResourceRef> {
        self.aliases
            .read()
            .ok()
            .and_then(|aliases| aliases.get(&name.to_lowercase()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::AccountRef;

    #[test]
    fn test_resolve_is_case_insensitive() {
        let store = InMemoryAliasStore::new();
        let bucket = ResourceRef::new("s3", "bucket", "assets", "", AccountRef::new("1"));
        store.insert("Prod Bucket", bucket.clone());

        assert_eq!(store.resolve_alias("prod bucket"), Some(bucket));
        assert_eq!(store.resolve_alias("staging bucket"), None);
    }
}
