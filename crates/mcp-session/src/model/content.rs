//! Content blocks carried by tool results.
use serde::{Deserialize, Serialize};

use super::resource::ResourceContents;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    /// The base64-encoded image
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    pub resource: ResourceContents,
}

impl EmbeddedResource {
    /// Text of a text resource, empty for blobs.
    pub fn get_text(&self) -> String {
        self.resource.as_text().unwrap_or_default().to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text(TextContent),
    Image(ImageContent),
    Resource(EmbeddedResource),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text(TextContent { text: text.into() })
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Content::Image(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
        })
    }

    pub fn resource(resource: ResourceContents) -> Self {
        Content::Resource(EmbeddedResource { resource })
    }

    /// Serialize `value` as compact JSON text.
    pub fn json<S: Serialize>(value: &S) -> Result<Self, crate::ErrorData> {
        let json = serde_json::to_string(value).map_err(|e| {
            crate::ErrorData::internal_error(format!("failed to serialize content: {e}"), None)
        })?;
        Ok(Content::text(json))
    }

    /// The readable text of this block: text parts and text resources.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(TextContent { text }) => Some(text),
            Content::Resource(EmbeddedResource { resource }) => resource.as_text(),
            Content::Image(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_content_tagging() {
        let text = serde_json::to_value(Content::text("hi")).unwrap();
        assert_eq!(text, json!({ "type": "text", "text": "hi" }));

        let resource: Content = serde_json::from_value(json!({
            "type": "resource",
            "resource": { "uri": "mem://a", "mimeType": "text/plain", "text": "body" }
        }))
        .unwrap();
        assert_eq!(resource.as_text(), Some("body"));
    }
}
