//! Temporary key remapping.

use super::CacheState;
use crate::cache::find_entity;
use crate::entity::EntityKey;
use crate::error::{CacheError, CacheResult};
use crate::metadata::MetadataStore;
use crate::save::KeyMapping;
use tracing::{debug, warn};

impl CacheState {
    /// Replaces temporary keys with the values the server assigned.
    ///
    /// For each mapping the owning entity is rekeyed in place, every cached
    /// foreign key holding the temporary value is repointed, and links
    /// buffered under the temporary key move to the real one. All of this
    /// happens before anything else observes the new key.
    ///
    /// A real key that already names a different cached entity is an error,
    /// reported before any mapping is applied.
    pub(crate) fn apply_key_mappings(
        &mut self,
        metadata: &MetadataStore,
        mappings: &[KeyMapping],
    ) -> CacheResult<()> {
        for mapping in mappings {
            let entity_type = metadata.entity_type(&mapping.entity_type_name)?;
            let root = entity_type.root_type_name();
            let real_key = EntityKey::single(root, mapping.real_value.clone());
            let taken = find_entity(metadata, &self.groups, &real_key).is_some();
            if taken && mapping.real_value != mapping.temp_value {
                warn!(
                    key = %real_key,
                    temp = %mapping.temp_value,
                    "server assigned a key that is already cached"
                );
                return Err(CacheError::invalid_operation(format!(
                    "cannot remap temporary key {} to {real_key}: that key is already cached",
                    mapping.temp_value
                )));
            }
        }

        for mapping in mappings {
            let entity_type = metadata.entity_type(&mapping.entity_type_name)?;
            let (temp, real) = (&mapping.temp_value, &mapping.real_value);

            let mut fixed = None;
            for name in entity_type.self_and_subtypes() {
                if let Some(group) = self.groups.get_mut(&name) {
                    fixed = group.fixup_key(temp, real)?;
                    if fixed.is_some() {
                        break;
                    }
                }
            }
            if let Some(entity) = &fixed {
                entity.write_aspect(|a| a.has_temp_key = false);
            }
            self.key_generator
                .remove(&EntityKey::single(entity_type.root_type_name(), temp.clone()));

            let mut repointed = 0;
            for reference in entity_type.foreign_key_references() {
                let Some(dependent) = metadata.find_entity_type(&reference.dependent_type) else {
                    continue;
                };
                for name in dependent.self_and_subtypes() {
                    if let Some(group) = self.groups.get_mut(&name) {
                        repointed += group.update_fk_val(&reference.property, temp, real);
                    }
                }
            }

            let hierarchy = entity_type
                .self_and_subtypes()
                .into_iter()
                .chain(entity_type.ancestors().iter().cloned());
            for name in hierarchy {
                self.unattached.rekey(
                    &EntityKey::single(name.as_str(), temp.clone()).key_string(),
                    EntityKey::single(name.as_str(), real.clone()).key_string(),
                );
            }

            debug!(
                entity_type = %mapping.entity_type_name,
                temp = %temp,
                real = %real,
                found = fixed.is_some(),
                repointed,
                "temporary key remapped"
            );
        }
        Ok(())
    }
}
