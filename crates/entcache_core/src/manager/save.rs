//! The save pipeline.

use super::EntityManager;
use crate::cache::{find_entity, AttachOutcome};
use crate::config::SaveOptions;
use crate::entity::{Entity, EntityKey, EntityState, MergeStrategy};
use crate::error::{CacheError, CacheResult};
use crate::events::EntityAction;
use crate::save::{
    stamp_concurrency, EntitySnapshot, PendingSave, SaveFailure, SaveRequest, SaveResponse,
    SaveResult, SaveTransport,
};
use crate::validation::{
    validate_into_aspect, EntityValidationFailure, ValidationError, ValidationOrigin,
};
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl EntityManager {
    /// Prepares a save.
    ///
    /// Saves `entities`, or every changed entity when `None`. Detached
    /// entities are ignored; when nothing is left the returned save is a
    /// no-op that completes without a network call.
    ///
    /// On success every target is marked as being saved and the returned
    /// request carries snapshots with concurrency properties already
    /// bumped. The cached entities themselves are not modified.
    ///
    /// # Errors
    ///
    /// - `AttachFailed` if an entity belongs to another manager
    /// - `ConcurrentSave` if concurrent saves are disallowed and a target
    ///   is already being saved
    /// - `ClientValidation` if the validator rejects a target
    /// - `ConcurrencyProperty` if a concurrency property cannot be stamped
    pub fn begin_save(
        &self,
        entities: Option<&[Entity]>,
        options: Option<SaveOptions>,
    ) -> CacheResult<PendingSave> {
        let options = options.unwrap_or_else(|| self.config.save_options.clone());
        let targets = match entities {
            Some(list) => {
                let mut targets: Vec<Entity> = Vec::with_capacity(list.len());
                for entity in list.iter().filter(|e| e.is_attached()) {
                    if entity.manager_id() != Some(self.id()) {
                        return Err(CacheError::attach_failed(format!(
                            "{} belongs to another entity manager and cannot be saved here",
                            entity.key()
                        )));
                    }
                    if !targets.contains(entity) {
                        targets.push(entity.clone());
                    }
                }
                targets
            }
            None => self.get_changes(None)?,
        };
        if targets.is_empty() {
            debug!(manager = %self.id(), "nothing to save");
            return Ok(PendingSave::noop(self.id(), &options));
        }

        if !options.allow_concurrent_saves {
            let busy: Vec<String> = targets
                .iter()
                .filter(|e| e.is_being_saved())
                .map(|e| e.key().key_string())
                .collect();
            if !busy.is_empty() {
                warn!(
                    manager = %self.id(),
                    busy = busy.len(),
                    "save rejected: entities already being saved"
                );
                return Err(CacheError::ConcurrentSave { keys: busy });
            }
        }

        for entity in &targets {
            entity.replace_validation_errors(ValidationOrigin::Server, Vec::new());
        }
        if let Some(validator) = self
            .ctx
            .validator
            .as_ref()
            .filter(|_| self.config.validation_options.validate_on_save)
        {
            let failures: Vec<EntityValidationFailure> = targets
                .iter()
                .filter(|e| !e.entity_state().is_deleted())
                .filter_map(|e| {
                    let errors = validate_into_aspect(validator.as_ref(), e);
                    (!errors.is_empty()).then(|| EntityValidationFailure { key: e.key(), errors })
                })
                .collect();
            if !failures.is_empty() {
                warn!(
                    manager = %self.id(),
                    failed = failures.len(),
                    "save rejected by client validation"
                );
                return Err(CacheError::ClientValidation { failures });
            }
        }

        for entity in &targets {
            entity.write_aspect(|a| a.is_being_saved = true);
        }
        let snapshots: CacheResult<Vec<EntitySnapshot>> = {
            let mut cache = self.state.lock();
            targets
                .iter()
                .map(|entity| {
                    let mut snapshot = EntitySnapshot::of(entity);
                    stamp_concurrency(&mut snapshot, &entity.entity_type(), &mut cache.last_stamp)?;
                    Ok(snapshot)
                })
                .collect()
        };
        let snapshots = match snapshots {
            Ok(snapshots) => snapshots,
            Err(err) => {
                for entity in &targets {
                    entity.write_aspect(|a| a.is_being_saved = false);
                }
                return Err(err);
            }
        };

        info!(
            manager = %self.id(),
            resource = %options.resource_name,
            entities = snapshots.len(),
            "save started"
        );
        Ok(PendingSave {
            manager_id: self.id(),
            request: SaveRequest {
                resource_name: options.resource_name,
                tag: options.tag,
                entities: snapshots,
            },
            targets,
        })
    }

    /// Finishes a save with the server's answer.
    ///
    /// On success temporary keys are remapped first, then the returned
    /// entities are merged with overwrite semantics. Targets the server did
    /// not return are accepted as saved. Notifications raised meanwhile are
    /// delivered once everything is consistent.
    ///
    /// On failure the cache is left as it was, apart from server
    /// validation errors attached to the entities they name.
    pub fn complete_save(
        &self,
        pending: PendingSave,
        outcome: Result<SaveResponse, SaveFailure>,
    ) -> CacheResult<SaveResult> {
        if pending.manager_id != self.id() {
            return Err(CacheError::invalid_operation(
                "pending save was started by another entity manager",
            ));
        }
        if pending.is_noop() {
            return Ok(SaveResult::default());
        }
        let PendingSave { request, targets, .. } = pending;
        for entity in &targets {
            entity.write_aspect(|a| a.is_being_saved = false);
        }
        match outcome {
            Ok(response) => self.apply_save(&request, &targets, response),
            Err(failure) => Err(self.fail_save(failure)),
        }
    }

    /// Saves through a synchronous transport.
    pub fn save_changes(
        &self,
        entities: Option<&[Entity]>,
        options: Option<SaveOptions>,
        transport: &dyn SaveTransport,
    ) -> CacheResult<SaveResult> {
        let pending = self.begin_save(entities, options)?;
        if pending.is_noop() {
            return self.complete_save(pending, Ok(SaveResponse::default()));
        }
        let outcome = transport.save_changes(pending.request());
        self.complete_save(pending, outcome)
    }

    fn apply_save(
        &self,
        request: &SaveRequest,
        targets: &[Entity],
        response: SaveResponse,
    ) -> CacheResult<SaveResult> {
        let incoming = self.materialize_all(&response.entities)?;
        let _deferred = self.ctx.feed.defer();
        let mut saved: Vec<Entity> = Vec::with_capacity(targets.len());
        {
            let mut cache = self.state.lock();
            cache.apply_key_mappings(&self.metadata, &response.key_mappings)?;
            let _loading = self.ctx.loading.enter();

            let mut returned: HashSet<Entity> = HashSet::new();
            for entity in &incoming {
                let cached = find_entity(&self.metadata, &cache.groups, &entity.key());
                if let Some(deleted) = cached.filter(|c| c.entity_state().is_deleted()) {
                    self.detach_in(&mut cache, &deleted);
                    if returned.insert(deleted.clone()) {
                        saved.push(deleted);
                    }
                    continue;
                }
                let outcome = self.attach_in(
                    &mut cache,
                    entity,
                    EntityState::Unchanged,
                    MergeStrategy::OverwriteChanges,
                )?;
                let action = match &outcome {
                    AttachOutcome::Attached(_) => EntityAction::Attach,
                    AttachOutcome::Merged(_) | AttachOutcome::Skipped(_) => {
                        EntityAction::MergeOnSave
                    }
                };
                let merged = outcome.into_entity();
                self.ctx.feed.publish(action, Some(&merged));
                if returned.insert(merged.clone()) {
                    saved.push(merged);
                }
            }

            for (entity, snapshot) in targets.iter().zip(&request.entities) {
                if returned.contains(entity) {
                    continue;
                }
                match entity.entity_state() {
                    EntityState::Deleted => {
                        self.detach_in(&mut cache, entity);
                    }
                    EntityState::Added | EntityState::Modified => {
                        for name in entity.entity_type().concurrency_properties() {
                            if let Some(stamped) = snapshot.values.get(name) {
                                entity.set_value_raw(name, stamped.clone());
                            }
                        }
                        entity.write_aspect(|a| {
                            a.state = EntityState::Unchanged;
                            a.original_values.clear();
                        });
                        self.ctx.feed.publish(EntityAction::EntityStateChange, Some(entity));
                    }
                    EntityState::Unchanged => {}
                    EntityState::Detached => continue,
                }
                saved.push(entity.clone());
            }
        }
        self.ctx.mark_changed();
        let has_changes = self.has_changes();
        info!(
            manager = %self.id(),
            saved = saved.len(),
            key_mappings = response.key_mappings.len(),
            has_changes,
            "save completed"
        );
        Ok(SaveResult {
            entities: saved,
            key_mappings: response.key_mappings,
        })
    }

    fn fail_save(&self, failure: SaveFailure) -> CacheError {
        let mut resolved = 0;
        for error in &failure.entity_errors {
            let key = EntityKey::new(error.entity_type_name.as_str(), error.key_values.clone());
            let Some(entity) = self.find_entity_by_key(&key) else {
                continue;
            };
            let mut validation =
                ValidationError::server(error.error_name.as_str(), error.error_message.as_str());
            if let Some(property) = &error.property_name {
                validation = validation.with_property(property.as_str());
            }
            entity.write_aspect(|a| a.validation_errors.push(validation));
            resolved += 1;
        }
        warn!(
            manager = %self.id(),
            message = %failure.message,
            entity_errors = failure.entity_errors.len(),
            resolved,
            partial = failure.partial.is_some(),
            "save failed"
        );
        CacheError::ServerSave {
            message: failure.message,
            entity_errors: failure.entity_errors,
            partial: failure.partial.map(Box::new),
        }
    }
}
