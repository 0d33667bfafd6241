//! Stamped, map-shaped actions
//!
//! Actions are the only input a store ever reduces. Callers hand the
//! dispatcher arbitrary JSON; only objects survive, and every surviving
//! object is stamped with an id drawn from the dispatcher's [`IdGenerator`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier stamped onto every action by its dispatcher.
///
/// Ids are strictly increasing within one dispatcher. Two dispatchers may
/// hand out overlapping ids.
pub type ActionId = u64;

/// Field name holding the action id in the serialised form.
pub const ID_FIELD: &str = "id";

/// Conventional field name of the action discriminator.
pub const TYPE_FIELD: &str = "type";

/// An immutable action as seen by stores and middleware.
///
/// Serialises flat: `{"id": 17, "type": "increment", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    id: ActionId,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Action {
    /// Stamp a map with an id. A caller-supplied `id` field is replaced.
    pub(crate) fn stamp(id: ActionId, mut fields: Map<String, Value>) -> Self {
        fields.remove(ID_FIELD);
        Self { id, fields }
    }

    /// The injected id
    pub fn id(&self) -> ActionId {
        self.id
    }

    /// The `type` discriminator, when it is a string
    pub fn action_type(&self) -> Option<&str> {
        self.fields.get(TYPE_FIELD).and_then(Value::as_str)
    }

    /// Name used in logs: the `type` discriminator or `"<untyped>"`
    pub fn name(&self) -> &str {
        self.action_type().unwrap_or("<untyped>")
    }

    /// Look up a caller-defined field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Caller-defined fields, without the id
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The action as a single JSON object including its id
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert(ID_FIELD.to_string(), Value::from(self.id));
        Value::Object(object)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name(), self.id)
    }
}

/// Accept only map-shaped values as action payloads.
pub(crate) fn action_fields(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(fields) => Some(fields),
        _ => None,
    }
}

/// Strictly increasing id source.
///
/// Seeded from wall-clock milliseconds times 1000 so that ids from a restarted
/// process rarely collide with ids handed out before the restart.
#[derive(Debug)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    /// Seed from the current wall-clock time
    pub fn from_clock() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Self::starting_after(millis.saturating_mul(1000))
    }

    /// The first id handed out will be `seed + 1`
    pub fn starting_after(seed: u64) -> Self {
        Self {
            last: AtomicU64::new(seed),
        }
    }

    /// Hand out the next id
    pub fn next_id(&self) -> ActionId {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_clock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        action_fields(value).unwrap()
    }

    #[test]
    fn test_stamp_serialises_flat() {
        let action = Action::stamp(7, fields(json!({"type": "test", "value": 1})));
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"id": 7, "type": "test", "value": 1})
        );
        assert_eq!(action.to_value(), json!({"id": 7, "type": "test", "value": 1}));
    }

    #[test]
    fn test_injected_id_overrides_caller_id() {
        let action = Action::stamp(9, fields(json!({"id": "mine", "type": "x"})));
        assert_eq!(action.id(), 9);
        assert!(action.get(ID_FIELD).is_none());
    }

    #[test]
    fn test_action_type_and_name() {
        let typed = Action::stamp(1, fields(json!({"type": "load"})));
        assert_eq!(typed.action_type(), Some("load"));
        assert_eq!(typed.to_string(), "load#1");

        let untyped = Action::stamp(2, Map::new());
        assert_eq!(untyped.action_type(), None);
        assert_eq!(untyped.name(), "<untyped>");
    }

    #[test]
    fn test_only_objects_are_actions() {
        assert!(action_fields(json!({})).is_some());
        assert!(action_fields(json!("test")).is_none());
        assert!(action_fields(json!(1)).is_none());
        assert!(action_fields(Value::Null).is_none());
        assert!(action_fields(json!([{"type": "a"}])).is_none());
    }

    #[test]
    fn test_id_generator_strictly_increasing() {
        let ids = IdGenerator::starting_after(41);
        assert_eq!(ids.next_id(), 42);
        assert_eq!(ids.next_id(), 43);

        let clock = IdGenerator::from_clock();
        let first = clock.next_id();
        let second = clock.next_id();
        assert!(second > first);
        assert!(first > 1_000_000);
    }
}
