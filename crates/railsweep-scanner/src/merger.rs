//! Merging partial viewport payloads into one aggregate document.
//!
//! Each category in the aggregate has a kind resolved from the first non-null
//! value seen for it:
//!
//! - list categories collect entities, deduplicated by identity
//! - object categories are shallow-merged, first-seen key wins
//! - scalar categories keep their first non-null value
//!
//! Categories not in the configured set are always treated as lists. A null or
//! absent value never overwrites existing content.

use indexmap::IndexMap;
use railsweep_core::Timestamp;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// Top-level JSON object returned for one tile.
pub type RawPayload = Map<String, Value>;

/// Key under which the sweep finish time is written.
pub const GENERATED_AT_KEY: &str = "generated_at";

/// How two entities are recognized as the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// First identity field present on the entity, with its canonical JSON value
    Field {
        /// Identity field name
        name: String,
        /// Canonical JSON of the field value
        value: String,
    },
    /// Hash of the entity's canonical JSON when it has no identity field
    Structural(u64),
}

/// Ordered list of identity fields, tried in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPolicy {
    fields: Vec<String>,
}

impl IdentityPolicy {
    /// Create a policy from field names in priority order.
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Identity field names.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Identity key of an entity.
    ///
    /// Null or empty-string identity values count as absent.
    #[must_use]
    pub fn key_for(&self, entity: &Value) -> EntityKey {
        if let Value::Object(map) = entity {
            for field in &self.fields {
                match map.get(field) {
                    None | Some(Value::Null) => {}
                    Some(Value::String(s)) if s.is_empty() => {}
                    Some(value) => {
                        return EntityKey::Field {
                            name: field.clone(),
                            value: canonical_json(value),
                        };
                    }
                }
            }
        }

        let mut hasher = DefaultHasher::new();
        canonical_json(entity).hash(&mut hasher);
        EntityKey::Structural(hasher.finish())
    }
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self::new(vec!["id".to_string(), "vehicleId".to_string()])
    }
}

/// Counters from merging one payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Entities appended to list categories
    pub added: usize,
    /// Entities dropped because their identity was already present
    pub duplicates: usize,
    /// Keys added to object categories
    pub keys_added: usize,
    /// Values whose shape disagreed with the category's resolved kind, or
    /// that arrived under the reserved [`GENERATED_AT_KEY`]
    pub shape_conflicts: usize,
}

impl MergeStats {
    fn absorb(&mut self, other: MergeStats) {
        self.added += other.added;
        self.duplicates += other.duplicates;
        self.keys_added += other.keys_added;
        self.shape_conflicts += other.shape_conflicts;
    }
}

#[derive(Debug, Clone)]
enum Slot {
    /// Known category with no non-null value seen yet
    Unresolved,
    List {
        items: Vec<Value>,
        seen: HashSet<EntityKey>,
    },
    Object(Map<String, Value>),
    Scalar(Value),
}

impl Slot {
    fn empty_list() -> Self {
        Slot::List {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn resolve(value: &Value) -> Self {
        match value {
            Value::Object(_) => Slot::Object(Map::new()),
            Value::Array(_) => Slot::empty_list(),
            _ => Slot::Scalar(Value::Null),
        }
    }

    fn render(&self) -> Value {
        match self {
            Slot::Unresolved => Value::Null,
            Slot::List { items, .. } => Value::Array(items.clone()),
            Slot::Object(map) => Value::Object(map.clone()),
            Slot::Scalar(value) => value.clone(),
        }
    }

    fn merge(&mut self, value: &Value, identity: &IdentityPolicy) -> MergeStats {
        let mut stats = MergeStats::default();
        if value.is_null() {
            return stats;
        }
        if matches!(self, Slot::Unresolved) {
            *self = Slot::resolve(value);
        }

        match self {
            Slot::Unresolved => {}
            Slot::List { items, seen } => {
                let incoming = match value {
                    Value::Array(values) => values.as_slice(),
                    single => std::slice::from_ref(single),
                };
                for entity in incoming.iter().filter(|e| !e.is_null()) {
                    if seen.insert(identity.key_for(entity)) {
                        items.push(entity.clone());
                        stats.added += 1;
                    } else {
                        stats.duplicates += 1;
                    }
                }
            }
            Slot::Object(existing) => match value {
                Value::Object(partial) => {
                    for (key, v) in partial {
                        if v.is_null() || existing.contains_key(key) {
                            continue;
                        }
                        existing.insert(key.clone(), v.clone());
                        stats.keys_added += 1;
                    }
                }
                _ => stats.shape_conflicts += 1,
            },
            Slot::Scalar(existing) => {
                if value.is_array() || value.is_object() {
                    stats.shape_conflicts += 1;
                } else if existing.is_null() {
                    *existing = value.clone();
                }
            }
        }

        stats
    }
}

/// Accumulated result of a sweep, keyed by category.
///
/// Category order is the configured order followed by unknown categories in
/// first-seen order.
#[derive(Debug, Clone)]
pub struct Aggregate {
    slots: IndexMap<String, Slot>,
    identity: IdentityPolicy,
    generated_at: Option<Timestamp>,
}

impl Aggregate {
    /// Create an empty aggregate with the given categories pre-created.
    #[must_use]
    pub fn new(known_categories: &[String], identity: IdentityPolicy) -> Self {
        let slots = known_categories
            .iter()
            .filter(|name| name.as_str() != GENERATED_AT_KEY)
            .map(|name| (name.clone(), Slot::Unresolved))
            .collect();
        Self {
            slots,
            identity,
            generated_at: None,
        }
    }

    /// Fold one partial payload into the aggregate.
    ///
    /// Merging the same payload twice leaves the aggregate unchanged the second
    /// time.
    pub fn merge(&mut self, partial: &RawPayload) -> MergeStats {
        let mut stats = MergeStats::default();

        for (category, value) in partial {
            // Reserved for the stamp
            if category == GENERATED_AT_KEY {
                stats.shape_conflicts += 1;
                continue;
            }
            let slot = self
                .slots
                .entry(category.clone())
                .or_insert_with(Slot::empty_list);
            stats.absorb(slot.merge(value, &self.identity));
        }

        if stats.shape_conflicts > 0 {
            tracing::debug!(
                "Ignored {} value(s) with a conflicting shape",
                stats.shape_conflicts
            );
        }
        stats
    }

    /// Record the sweep finish time.
    pub fn stamp(&mut self, at: Timestamp) {
        self.generated_at = Some(at);
    }

    /// Sweep finish time, if stamped.
    #[must_use]
    pub fn generated_at(&self) -> Option<Timestamp> {
        self.generated_at
    }

    /// Category names in output order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Current value of a category (`null` if unknown or never populated).
    #[must_use]
    pub fn get(&self, category: &str) -> Value {
        self.slots.get(category).map_or(Value::Null, Slot::render)
    }

    /// Number of entities in a list category.
    #[must_use]
    pub fn list_len(&self, category: &str) -> Option<usize> {
        match self.slots.get(category) {
            Some(Slot::List { items, .. }) => Some(items.len()),
            _ => None,
        }
    }

    /// Total entities across list categories.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.slots
            .values()
            .map(|slot| match slot {
                Slot::List { items, .. } => items.len(),
                _ => 0,
            })
            .sum()
    }

    /// `true` if nothing has been merged into any category.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.values().all(|slot| match slot {
            Slot::Unresolved => true,
            Slot::List { items, .. } => items.is_empty(),
            Slot::Object(map) => map.is_empty(),
            Slot::Scalar(value) => value.is_null(),
        })
    }

    /// Render the output document: every category plus `generated_at` in
    /// milliseconds since the epoch.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut doc: Map<String, Value> = self
            .slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.render()))
            .collect();
        doc.insert(
            GENERATED_AT_KEY.to_string(),
            self.generated_at
                .map_or(Value::Null, |ts| Value::from(ts.epoch_millis())),
        );
        Value::Object(doc)
    }
}

impl Serialize for Aggregate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

/// `true` if every category in the payload is null or empty.
///
/// An expired session often yields exactly this shape.
#[must_use]
pub fn is_effectively_empty(payload: &RawPayload) -> bool {
    payload.values().all(|value| match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    })
}

/// JSON text with object keys sorted recursively, so equal values compare equal
/// regardless of key order.
fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                Value::Object(
                    keys.into_iter()
                        .map(|k| (k.clone(), sorted(&map[k])))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}
