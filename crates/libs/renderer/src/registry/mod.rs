mod blas;
mod material;
mod texture;

pub use blas::*;
pub use material::*;
pub use texture::*;

use std::collections::HashMap;

use scene::ResourceId;

/// Slot 0 is the default/fallback resource; lookups that miss resolve there.
pub const DEFAULT_SLOT: u32 = 0;

/// Id/alias to slot-index mapping shared by the registries.
#[derive(Default)]
pub struct RegistryIndex {
    id_to_index: HashMap<ResourceId, u32>,
    alias_to_index: HashMap<String, u32>,
}

impl RegistryIndex {
    pub fn insert(&mut self, id: ResourceId, alias: Option<&str>, index: u32) {
        self.id_to_index.insert(id, index);
        if let Some(alias) = alias {
            self.alias_to_index.insert(alias.to_owned(), index);
        }
    }

    pub fn index_of(&self, id: ResourceId) -> u32 {
        self.id_to_index.get(&id).copied().unwrap_or(DEFAULT_SLOT)
    }

    pub fn index_of_alias(&self, alias: &str) -> u32 {
        self.alias_to_index
            .get(alias)
            .copied()
            .unwrap_or(DEFAULT_SLOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misses_resolve_to_the_default_slot() {
        let mut index = RegistryIndex::default();
        let id = ResourceId::new();
        index.insert(id, Some("checker"), 7);

        assert_eq!(index.index_of(id), 7);
        assert_eq!(index.index_of_alias("checker"), 7);
        assert_eq!(index.index_of(ResourceId::new()), DEFAULT_SLOT);
        assert_eq!(index.index_of_alias("missing"), DEFAULT_SLOT);
    }
}
