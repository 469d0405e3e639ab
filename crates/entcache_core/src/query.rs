//! Entity queries.
//!
//! Predicate, ordering and projection compilation is not the cache's job:
//! queries carry already compiled closures. The same query can run against
//! the cache (`EntityManager::execute_query_locally`) or be handed to a
//! [`QueryTransport`] whose results are merged into the cache.

use crate::config::FetchStrategy;
use crate::entity::{Entity, MergeStrategy};
use crate::save::RawEntity;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Compiled filter predicate.
pub type EntityPredicate = Arc<dyn Fn(&Entity) -> bool + Send + Sync>;
/// Compiled ordering comparator.
pub type EntityComparator = Arc<dyn Fn(&Entity, &Entity) -> Ordering + Send + Sync>;
/// Compiled projection.
pub type EntityProjection = Arc<dyn Fn(&Entity) -> Value + Send + Sync>;

/// A query over one entity type (and its subtypes).
#[derive(Clone)]
pub struct EntityQuery {
    entity_type: String,
    resource_name: Option<String>,
    filter: Option<EntityPredicate>,
    order_by: Option<EntityComparator>,
    skip: Option<usize>,
    take: Option<usize>,
    select: Option<EntityProjection>,
    include_deleted: Option<bool>,
    merge_strategy: Option<MergeStrategy>,
    fetch_strategy: Option<FetchStrategy>,
}

impl EntityQuery {
    /// Starts a query over `entity_type`.
    pub fn from(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            resource_name: None,
            filter: None,
            order_by: None,
            skip: None,
            take: None,
            select: None,
            include_deleted: None,
            merge_strategy: None,
            fetch_strategy: None,
        }
    }

    /// Sets the resource queried remotely.
    #[must_use]
    pub fn resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    /// Sets the filter predicate.
    #[must_use]
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Entity) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Filters on a property equal to `value`.
    #[must_use]
    pub fn where_eq(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        let property = property.into();
        let value = value.into();
        self.filter(move |e| e.get_value(&property).as_ref() == Some(&value))
    }

    /// Sets the ordering comparator.
    #[must_use]
    pub fn order_by<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&Entity, &Entity) -> Ordering + Send + Sync + 'static,
    {
        self.order_by = Some(Arc::new(comparator));
        self
    }

    /// Orders by a property's value.
    #[must_use]
    pub fn order_by_property(self, property: impl Into<String>, descending: bool) -> Self {
        let property = property.into();
        self.order_by(move |a, b| {
            let ord = a.get_value(&property).cmp(&b.get_value(&property));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        })
    }

    /// Skips the first `n` results.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Returns at most `n` results.
    #[must_use]
    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    /// Sets the projection.
    #[must_use]
    pub fn select<F>(mut self, projection: F) -> Self
    where
        F: Fn(&Entity) -> Value + Send + Sync + 'static,
    {
        self.select = Some(Arc::new(projection));
        self
    }

    /// Sets whether local evaluation returns `Deleted` entities.
    #[must_use]
    pub fn include_deleted(mut self, value: bool) -> Self {
        self.include_deleted = Some(value);
        self
    }

    /// Overrides the manager's merge strategy.
    #[must_use]
    pub fn merge_strategy(mut self, value: MergeStrategy) -> Self {
        self.merge_strategy = Some(value);
        self
    }

    /// Overrides the manager's fetch strategy.
    #[must_use]
    pub fn fetch_strategy(mut self, value: FetchStrategy) -> Self {
        self.fetch_strategy = Some(value);
        self
    }

    /// Target type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Explicit resource name, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource_name.as_deref()
    }

    /// Skip count.
    pub fn skip_count(&self) -> Option<usize> {
        self.skip
    }

    /// Take count.
    pub fn take_count(&self) -> Option<usize> {
        self.take
    }

    /// Explicit include-deleted flag.
    pub fn includes_deleted(&self) -> Option<bool> {
        self.include_deleted
    }

    /// Explicit merge strategy.
    pub fn query_merge_strategy(&self) -> Option<MergeStrategy> {
        self.merge_strategy
    }

    /// Explicit fetch strategy.
    pub fn query_fetch_strategy(&self) -> Option<FetchStrategy> {
        self.fetch_strategy
    }

    /// Returns true if the query has a projection.
    pub fn has_projection(&self) -> bool {
        self.select.is_some()
    }

    /// Returns true if `entity` passes the filter.
    pub fn matches(&self, entity: &Entity) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(entity))
    }

    /// Applies filter, ordering, skip and take to `entities`.
    pub fn apply(&self, entities: Vec<Entity>) -> Vec<Entity> {
        let mut result: Vec<Entity> = entities.into_iter().filter(|e| self.matches(e)).collect();
        if let Some(order_by) = &self.order_by {
            result.sort_by(|a, b| order_by(a, b));
        }
        result
            .into_iter()
            .skip(self.skip.unwrap_or(0))
            .take(self.take.unwrap_or(usize::MAX))
            .collect()
    }

    /// Projects an entity, or `None` without a projection.
    pub fn project(&self, entity: &Entity) -> Option<Value> {
        self.select.as_ref().map(|select| select(entity))
    }
}

impl fmt::Debug for EntityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityQuery")
            .field("entity_type", &self.entity_type)
            .field("resource_name", &self.resource_name)
            .field("filter", &self.filter.is_some())
            .field("order_by", &self.order_by.is_some())
            .field("skip", &self.skip)
            .field("take", &self.take)
            .field("select", &self.select.is_some())
            .field("merge_strategy", &self.merge_strategy)
            .field("fetch_strategy", &self.fetch_strategy)
            .finish()
    }
}

impl fmt::Display for EntityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource_name.as_deref().unwrap_or(&self.entity_type))?;
        if self.filter.is_some() {
            f.write_str(" where <filter>")?;
        }
        if self.order_by.is_some() {
            f.write_str(" orderby <comparator>")?;
        }
        if let Some(n) = self.skip {
            write!(f, " skip {n}")?;
        }
        if let Some(n) = self.take {
            write!(f, " take {n}")?;
        }
        Ok(())
    }
}

/// Records returned by a data service for a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Materialized records.
    pub records: Vec<RawEntity>,
    /// Total count before skip/take, when requested.
    pub inline_count: Option<usize>,
}

/// A failed remote query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    /// Failure message.
    pub message: String,
    /// Transport status code, if any.
    pub status: Option<u16>,
}

impl QueryFailure {
    /// Creates a failure with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Sets the transport status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Result of a query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Cached instances of the matching entities.
    pub entities: Vec<Entity>,
    /// Total count reported by the service.
    pub inline_count: Option<usize>,
    /// Whether the query was answered from the cache.
    pub from_cache: bool,
}

/// Executes queries against the data service.
pub trait QueryTransport: Send + Sync {
    /// Runs the query remotely.
    fn execute(&self, query: &EntityQuery) -> Result<QueryResponse, QueryFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_describes_query() {
        let q = EntityQuery::from("Customer")
            .resource_name("Customers")
            .where_eq("name", "x")
            .skip(5)
            .take(10);
        assert_eq!(q.to_string(), "Customers where <filter> skip 5 take 10");
        assert!(format!("{q:?}").contains("Customers"));
    }

    #[test]
    fn builder_accessors() {
        let q = EntityQuery::from("Order")
            .include_deleted(true)
            .merge_strategy(MergeStrategy::SkipMerge)
            .fetch_strategy(FetchStrategy::FromLocalCache)
            .select(|e| Value::from(e.type_name()));
        assert_eq!(q.entity_type(), "Order");
        assert_eq!(q.includes_deleted(), Some(true));
        assert_eq!(q.query_merge_strategy(), Some(MergeStrategy::SkipMerge));
        assert_eq!(q.query_fetch_strategy(), Some(FetchStrategy::FromLocalCache));
        assert!(q.has_projection());
        assert_eq!(q.skip_count(), None);
    }
}
