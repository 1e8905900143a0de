use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered field name → value mapping. Insertion order is preserved.
pub type FieldMap = Map<String, Value>;

/// A generic entity stored by one of the two backends.
///
/// The `fields` map holds arbitrary JSON values; its shape is defined by
/// whoever owns the entity type. `id` is always backend-assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: String,
    pub fields: FieldMap,
    pub created_at: i64,
    pub modified_at: i64,
}

impl Entity {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Extract a string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Extract a boolean field.
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(|v| v.as_bool())
    }

    /// Extract a numeric field.
    pub fn get_number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(|v| v.as_f64())
    }

    /// Applies a partial update: every supplied field overwrites (or adds)
    /// the stored one, untouched fields keep their value and position.
    pub fn apply_patch(&mut self, patch: FieldMap, modified_at: i64) {
        for (key, value) in patch {
            self.fields.insert(key, value);
        }
        self.modified_at = modified_at;
    }

    /// The snapshot carried in sync event payloads: fields plus identity.
    pub fn to_snapshot(&self) -> Value {
        let mut doc = Map::with_capacity(self.fields.len() + 2);
        doc.insert("id".into(), Value::String(self.id.clone()));
        doc.insert("entity_type".into(), Value::String(self.entity_type.clone()));
        doc.insert("fields".into(), Value::Object(self.fields.clone()));
        doc.insert("created_at".into(), Value::from(self.created_at));
        doc.insert("modified_at".into(), Value::from(self.modified_at));
        Value::Object(doc)
    }

    /// Inverse of [`Entity::to_snapshot`].
    pub fn from_snapshot(snapshot: &Value) -> Option<Entity> {
        serde_json::from_value(snapshot.clone()).ok()
    }

    /// Ids referenced by `field`: a single string or an array of strings.
    pub fn linked_ids(&self, field: &str) -> Vec<String> {
        match self.fields.get(field) {
            Some(Value::String(id)) => vec![id.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}
