//! Schema helpers shared by typed tool and prompt registration.

use std::collections::HashSet;

use schemars::{JsonSchema, generate::SchemaSettings};
use serde_json::Value;

use crate::model::{JsonObject, PromptArgument};

/// JSON Schema (draft 2020-12) for `T` as a JSON object.
pub fn schema_for_type<T: JsonSchema>() -> JsonObject {
    let mut settings = SchemaSettings::draft2020_12();
    settings.transforms = vec![Box::new(schemars::transform::AddNullable::default())];
    let schema = settings.into_generator().into_root_schema_for::<T>();
    match serde_json::to_value(schema) {
        Ok(Value::Object(object)) => object,
        _ => {
            tracing::warn!(ty = std::any::type_name::<T>(), "schema is not an object");
            JsonObject::default()
        }
    }
}

/// Output schemas must describe a JSON object at the root.
pub fn validate_output_schema(schema: &JsonObject) -> Result<(), String> {
    match schema.get("type") {
        Some(Value::String(t)) if t == "object" => Ok(()),
        Some(Value::String(t)) => Err(format!("output schema root type must be 'object', found '{t}'")),
        Some(other) => Err(format!("output schema 'type' has unexpected format: {other}")),
        None => Err("output schema is missing its root 'type'".to_owned()),
    }
}

/// Derive prompt arguments from the top-level properties of `T`'s schema.
pub fn arguments_from_schema<T: JsonSchema>() -> Option<Vec<PromptArgument>> {
    let schema = schema_for_type::<T>();
    let properties = schema.get("properties")?.as_object()?;
    let required: HashSet<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let arguments: Vec<_> = properties
        .iter()
        .map(|(name, property)| PromptArgument {
            name: name.clone(),
            title: property.get("title").and_then(Value::as_str).map(String::from),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
            required: Some(required.contains(name.as_str())),
        })
        .collect();
    (!arguments.is_empty()).then_some(arguments)
}
