//! Domain: namespace grouping queues and routing rules under an optional
//! validation schema (§3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Bool,
    Object,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub field_type: FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: HashMap<String, SchemaField>,
}

impl Schema {
    /// Validates a payload against the field->type mapping. A schema with no
    /// fields accepts anything (the common "no schema" case modeled as an
    /// empty schema rather than `Option`, matching the source's cardinality).
    pub fn validate(&self, payload: &Value) -> Result<(), String> {
        if self.fields.is_empty() {
            return Ok(());
        }
        let obj = payload
            .as_object()
            .ok_or_else(|| "payload must be a JSON object".to_string())?;

        for (name, field) in &self.fields {
            match obj.get(name) {
                Some(value) => {
                    if !matches_type(value, field.field_type) {
                        return Err(format!("field '{}' has the wrong type", name));
                    }
                }
                None if field.required => {
                    return Err(format!("missing required field '{}'", name));
                }
                None => {}
            }
        }
        Ok(())
    }
}

fn matches_type(value: &Value, field_type: FieldType) -> bool {
    match field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Object => value.is_object(),
        FieldType::Array => value.is_array(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    #[serde(default)]
    pub schema: Schema,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::default(),
        }
    }
}
