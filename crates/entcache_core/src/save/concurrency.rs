//! Optimistic concurrency stamping.

use super::EntitySnapshot;
use crate::error::{CacheError, CacheResult};
use crate::metadata::{DataType, EntityType};
use crate::value::Value;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Bumps every concurrency property of a modified entity's snapshot once.
///
/// A property that already has an original value was bumped (or set by the
/// caller) during this attempt and is left alone. Integers are incremented,
/// instants are resampled until strictly later than `last_stamp`, GUIDs are
/// regenerated and binary values are left for the server to compute.
pub(crate) fn stamp_concurrency(
    snapshot: &mut EntitySnapshot,
    entity_type: &EntityType,
    last_stamp: &mut Option<DateTime<Utc>>,
) -> CacheResult<()> {
    if !snapshot.entity_state.is_modified() {
        return Ok(());
    }
    for name in entity_type.concurrency_properties() {
        if snapshot.original_values.contains_key(name) {
            continue;
        }
        let Some(prop) = entity_type.data_property(name) else {
            continue;
        };
        let current = snapshot.values.get(name).cloned().unwrap_or_default();
        let next = match prop.data_type {
            DataType::Int32 | DataType::Int64 => {
                Value::Integer(current.as_integer().unwrap_or(0).saturating_add(1))
            }
            DataType::DateTime => Value::DateTime(next_instant(last_stamp)),
            DataType::Guid => Value::Guid(Uuid::new_v4()),
            DataType::Binary => continue,
            other => {
                return Err(CacheError::ConcurrencyProperty {
                    type_name: entity_type.name().to_string(),
                    property: name.clone(),
                    data_type: other.to_string(),
                })
            }
        };
        snapshot.original_values.insert(name.clone(), current);
        snapshot.values.insert(name.clone(), next);
    }
    Ok(())
}

fn next_instant(last_stamp: &mut Option<DateTime<Utc>>) -> DateTime<Utc> {
    let mut now = Utc::now();
    while last_stamp.is_some_and(|last| now <= last) {
        std::hint::spin_loop();
        now = Utc::now();
    }
    *last_stamp = Some(now);
    now
}
