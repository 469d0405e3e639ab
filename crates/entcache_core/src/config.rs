//! Manager configuration.

use crate::entity::MergeStrategy;
use serde::{Deserialize, Serialize};

/// Where a query is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FetchStrategy {
    /// Ask the data service, then merge results into the cache.
    #[default]
    FromServer,
    /// Evaluate against cached entities only.
    FromLocalCache,
}

/// Defaults applied to queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Collision policy when merging results.
    pub merge_strategy: MergeStrategy,
    /// Where queries run.
    pub fetch_strategy: FetchStrategy,
    /// Whether local queries return `Deleted` entities.
    pub include_deleted: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            merge_strategy: MergeStrategy::PreserveChanges,
            fetch_strategy: FetchStrategy::FromServer,
            include_deleted: false,
        }
    }
}

impl QueryOptions {
    /// Sets the merge strategy.
    #[must_use]
    pub fn merge_strategy(mut self, value: MergeStrategy) -> Self {
        self.merge_strategy = value;
        self
    }

    /// Sets the fetch strategy.
    #[must_use]
    pub fn fetch_strategy(mut self, value: FetchStrategy) -> Self {
        self.fetch_strategy = value;
        self
    }

    /// Sets whether deleted entities are returned.
    #[must_use]
    pub fn include_deleted(mut self, value: bool) -> Self {
        self.include_deleted = value;
        self
    }
}

/// Defaults applied to saves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    /// Resource the save is posted to.
    pub resource_name: String,
    /// Whether a save may include entities another save is still handling.
    pub allow_concurrent_saves: bool,
    /// Opaque value passed through to the server.
    pub tag: Option<String>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            resource_name: "SaveChanges".to_string(),
            allow_concurrent_saves: false,
            tag: None,
        }
    }
}

impl SaveOptions {
    /// Sets the resource name.
    #[must_use]
    pub fn resource_name(mut self, value: impl Into<String>) -> Self {
        self.resource_name = value.into();
        self
    }

    /// Sets whether overlapping saves are allowed.
    #[must_use]
    pub fn allow_concurrent_saves(mut self, value: bool) -> Self {
        self.allow_concurrent_saves = value;
        self
    }

    /// Sets the tag.
    #[must_use]
    pub fn tag(mut self, value: impl Into<String>) -> Self {
        self.tag = Some(value.into());
        self
    }
}

/// When the configured validator runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOptions {
    /// Validate entities as they are attached.
    pub validate_on_attach: bool,
    /// Validate entities before they are saved.
    pub validate_on_save: bool,
    /// Validate entities materialized by queries.
    pub validate_on_query: bool,
    /// Validate after every tracked property write.
    pub validate_on_property_change: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            validate_on_attach: false,
            validate_on_save: true,
            validate_on_query: false,
            validate_on_property_change: false,
        }
    }
}

impl ValidationOptions {
    /// Sets validation on attach.
    #[must_use]
    pub const fn validate_on_attach(mut self, value: bool) -> Self {
        self.validate_on_attach = value;
        self
    }

    /// Sets validation on save.
    #[must_use]
    pub const fn validate_on_save(mut self, value: bool) -> Self {
        self.validate_on_save = value;
        self
    }

    /// Sets validation of query results.
    #[must_use]
    pub const fn validate_on_query(mut self, value: bool) -> Self {
        self.validate_on_query = value;
        self
    }

    /// Sets validation on property change.
    #[must_use]
    pub const fn validate_on_property_change(mut self, value: bool) -> Self {
        self.validate_on_property_change = value;
        self
    }
}

/// The remote data service a manager talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataService {
    /// Service root, e.g. `https://example.test/breeze/sales/`.
    pub service_name: String,
    /// Whether the service publishes metadata.
    pub has_server_metadata: bool,
}

impl DataService {
    /// Creates a service description that publishes metadata.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            has_server_metadata: true,
        }
    }
}

/// Configuration for an `EntityManager`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Query defaults.
    pub query_options: QueryOptions,
    /// Save defaults.
    pub save_options: SaveOptions,
    /// Validation triggers.
    pub validation_options: ValidationOptions,
    /// Remote service, if any.
    pub data_service: Option<DataService>,
    /// Collision policy used by imports when none is given.
    pub import_merge_strategy: MergeStrategy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            query_options: QueryOptions::default(),
            save_options: SaveOptions::default(),
            validation_options: ValidationOptions::default(),
            data_service: None,
            import_merge_strategy: MergeStrategy::PreserveChanges,
        }
    }
}

impl ManagerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the query defaults.
    #[must_use]
    pub fn query_options(mut self, value: QueryOptions) -> Self {
        self.query_options = value;
        self
    }

    /// Sets the save defaults.
    #[must_use]
    pub fn save_options(mut self, value: SaveOptions) -> Self {
        self.save_options = value;
        self
    }

    /// Sets the validation triggers.
    #[must_use]
    pub fn validation_options(mut self, value: ValidationOptions) -> Self {
        self.validation_options = value;
        self
    }

    /// Sets the data service.
    #[must_use]
    pub fn data_service(mut self, value: DataService) -> Self {
        self.data_service = Some(value);
        self
    }

    /// Sets the import merge strategy.
    #[must_use]
    pub fn import_merge_strategy(mut self, value: MergeStrategy) -> Self {
        self.import_merge_strategy = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.query_options.merge_strategy, MergeStrategy::PreserveChanges);
        assert_eq!(config.query_options.fetch_strategy, FetchStrategy::FromServer);
        assert_eq!(config.save_options.resource_name, "SaveChanges");
        assert!(!config.save_options.allow_concurrent_saves);
        assert!(config.validation_options.validate_on_save);
        assert!(!config.validation_options.validate_on_attach);
        assert_eq!(config.import_merge_strategy, MergeStrategy::PreserveChanges);
    }

    #[test]
    fn builder() {
        let config = ManagerConfig::new()
            .save_options(SaveOptions::default().allow_concurrent_saves(true).tag("t1"))
            .validation_options(ValidationOptions::default().validate_on_attach(true))
            .data_service(DataService::new("https://example.test/api/"))
            .import_merge_strategy(MergeStrategy::OverwriteChanges);
        assert!(config.save_options.allow_concurrent_saves);
        assert_eq!(config.save_options.tag.as_deref(), Some("t1"));
        assert!(config.validation_options.validate_on_attach);
        assert_eq!(config.import_merge_strategy, MergeStrategy::OverwriteChanges);
    }

    #[test]
    fn options_serialize() {
        let config = ManagerConfig::new().query_options(
            QueryOptions::default().fetch_strategy(FetchStrategy::FromLocalCache),
        );
        let json = serde_json::to_string(&config).unwrap();
        let back: ManagerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
