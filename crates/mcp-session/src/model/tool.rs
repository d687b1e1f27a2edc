use std::{borrow::Cow, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Content, JsonObject};

/// A tool the server exposes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique name within the server
    pub name: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Cow<'static, str>>,
    /// JSON Schema object describing the expected arguments
    pub input_schema: Arc<JsonObject>,
    /// JSON Schema object describing `structuredContent`, when the tool produces it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Arc<JsonObject>>,
}

impl Tool {
    pub fn new<N, D, S>(name: N, description: D, input_schema: S) -> Self
    where
        N: Into<Cow<'static, str>>,
        D: Into<Cow<'static, str>>,
        S: Into<Arc<JsonObject>>,
    {
        Tool {
            name: name.into(),
            title: None,
            description: Some(description.into()),
            input_schema: input_schema.into(),
            output_schema: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_output_schema(mut self, schema: impl Into<Arc<JsonObject>>) -> Self {
        self.output_schema = Some(schema.into());
        self
    }

    /// The schema as a [`Value`], for embedding in other JSON.
    pub fn schema_as_json_value(&self) -> Value {
        Value::Object(self.input_schema.as_ref().clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolRequestParam {
    pub name: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<JsonObject>,
}

/// Result of `tools/call`. Failures of the tool itself are reported here with
/// `is_error: Some(true)`, not as JSON-RPC errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn success(content: Vec<Content>) -> Self {
        CallToolResult {
            content,
            structured_content: None,
            is_error: Some(false),
        }
    }

    pub fn error(content: Vec<Content>) -> Self {
        CallToolResult {
            content,
            structured_content: None,
            is_error: Some(true),
        }
    }

    /// Structured result; the JSON is also mirrored as a text block for
    /// clients that only read `content`.
    pub fn structured(value: Value) -> Self {
        CallToolResult {
            content: vec![Content::text(value.to_string())],
            structured_content: Some(value),
            is_error: Some(false),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Every readable text fragment, in order.
    pub fn texts(&self) -> Vec<&str> {
        self.content.iter().filter_map(Content::as_text).collect()
    }

    /// Text fragments joined with newlines.
    pub fn text(&self) -> String {
        self.texts().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{ResourceContents, object};

    #[test]
    fn test_tool_serializes_camel_case() {
        let tool = Tool::new(
            "mcp_get_forecast",
            "Get the forecast",
            object(json!({ "type": "object" })),
        )
        .with_output_schema(object(json!({ "type": "object" })));
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["inputSchema"]["type"], "object");
        assert_eq!(value["outputSchema"]["type"], "object");
        assert!(value.get("title").is_none());
    }

    #[test]
    fn test_text_extraction() {
        let result = CallToolResult::success(vec![
            Content::text("first"),
            Content::image("AAAA", "image/png"),
            Content::resource(ResourceContents::text("mem://x", "second")),
        ]);
        assert_eq!(result.texts(), vec!["first", "second"]);
        assert_eq!(result.text(), "first\nsecond");
    }

    #[test]
    fn test_structured_mirrors_text() {
        let result = CallToolResult::structured(json!({ "temperature": 20, "unit": "celsius" }));
        assert!(!result.is_error());
        let mirrored: Value = serde_json::from_str(&result.text()).unwrap();
        assert_eq!(Some(mirrored), result.structured_content);
    }
}
