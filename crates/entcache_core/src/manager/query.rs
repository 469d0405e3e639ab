//! Local query evaluation and merging of remote results.

use super::EntityManager;
use crate::cache::{find_entity, AttachOutcome};
use crate::config::FetchStrategy;
use crate::entity::{Entity, EntityState, MergeStrategy};
use crate::error::{CacheError, CacheResult};
use crate::events::EntityAction;
use crate::query::{EntityQuery, QueryResponse, QueryResult, QueryTransport};
use crate::value::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

impl EntityManager {
    /// Evaluates `query` against cached entities only.
    ///
    /// `Deleted` entities are skipped unless the query (or the manager's
    /// query options) includes them, or the effective merge strategy is
    /// `OverwriteChanges`.
    pub fn execute_query_locally(&self, query: &EntityQuery) -> CacheResult<Vec<Entity>> {
        let entity_type = self.metadata.entity_type(query.entity_type())?;
        let include_deleted = query
            .includes_deleted()
            .unwrap_or(self.config.query_options.include_deleted)
            || self.effective_merge_strategy(query) == MergeStrategy::OverwriteChanges;
        let candidates: Vec<Entity> = {
            let cache = self.state.lock();
            entity_type
                .self_and_subtypes()
                .iter()
                .filter_map(|name| cache.groups.get(name))
                .flat_map(|group| group.get_entities(None))
                .collect()
        };
        let candidates = candidates
            .into_iter()
            .filter(|e| include_deleted || !e.entity_state().is_deleted())
            .collect();
        Ok(query.apply(candidates))
    }

    /// Evaluates `query` locally and applies its projection.
    pub fn project_locally(&self, query: &EntityQuery) -> CacheResult<Vec<Value>> {
        if !query.has_projection() {
            return Err(CacheError::invalid_operation(format!(
                "query {query} has no projection"
            )));
        }
        Ok(self
            .execute_query_locally(query)?
            .iter()
            .filter_map(|e| query.project(e))
            .collect())
    }

    /// Runs `query` where its fetch strategy says.
    ///
    /// Remote results are merged into the cache; a failed query leaves the
    /// cache untouched.
    pub fn execute_query(
        &self,
        query: &EntityQuery,
        transport: &dyn QueryTransport,
    ) -> CacheResult<QueryResult> {
        let fetch = query
            .query_fetch_strategy()
            .unwrap_or(self.config.query_options.fetch_strategy);
        if fetch == FetchStrategy::FromLocalCache {
            return Ok(QueryResult {
                entities: self.execute_query_locally(query)?,
                inline_count: None,
                from_cache: true,
            });
        }
        let response = transport.execute(query).map_err(|failure| {
            warn!(manager = %self.id(), query = %query, status = ?failure.status, "query failed");
            self.query_failed(query, failure.message)
        })?;
        self.merge_query_results(query, response)
    }

    /// Merges records fetched for `query` into the cache.
    pub fn merge_query_results(
        &self,
        query: &EntityQuery,
        response: QueryResponse,
    ) -> CacheResult<QueryResult> {
        let strategy = self.effective_merge_strategy(query);
        let incoming = self
            .materialize_all(&response.records)
            .map_err(|err| self.query_failed(query, err.to_string()))?;

        let _deferred = self.ctx.feed.defer();
        let mut entities: Vec<Entity> = Vec::with_capacity(incoming.len());
        let (mut attached, mut merged) = (0usize, 0usize);
        {
            let mut cache = self.state.lock();
            if strategy == MergeStrategy::Disallowed {
                let mut seen = HashSet::new();
                for entity in &incoming {
                    let key = entity.key();
                    if !seen.insert(key.key_string())
                        || find_entity(&self.metadata, &cache.groups, &key).is_some()
                    {
                        let err = CacheError::MergeDisallowed {
                            key: key.key_string(),
                        };
                        return Err(self.query_failed(query, err.to_string()));
                    }
                }
            }

            let _loading = self.ctx.loading.enter();
            for entity in &incoming {
                let outcome = self
                    .attach_in(&mut cache, entity, EntityState::Unchanged, strategy)
                    .map_err(|err| self.query_failed(query, err.to_string()))?;
                match &outcome {
                    AttachOutcome::Attached(e) => {
                        attached += 1;
                        self.ctx.feed.publish(EntityAction::AttachOnQuery, Some(e));
                    }
                    AttachOutcome::Merged(e) => {
                        merged += 1;
                        self.ctx.feed.publish(EntityAction::MergeOnQuery, Some(e));
                    }
                    AttachOutcome::Skipped(_) => {}
                }
                let cached = outcome.into_entity();
                if !entities.contains(&cached) {
                    entities.push(cached);
                }
            }
        }

        if self.config.validation_options.validate_on_query {
            for entity in &entities {
                self.validate_entity(entity);
            }
        }
        debug!(
            manager = %self.id(),
            query = %query,
            records = response.records.len(),
            attached,
            merged,
            "query results merged"
        );
        Ok(QueryResult {
            entities,
            inline_count: response.inline_count,
            from_cache: false,
        })
    }

    fn effective_merge_strategy(&self, query: &EntityQuery) -> MergeStrategy {
        query
            .query_merge_strategy()
            .unwrap_or(self.config.query_options.merge_strategy)
    }

    fn query_failed(&self, query: &EntityQuery, message: String) -> CacheError {
        CacheError::QueryFailed {
            query: query.to_string(),
            manager_id: self.id().to_string(),
            message,
        }
    }
}
