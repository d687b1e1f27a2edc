use serde::Serialize;

use super::router::tool::IntoCallToolResult;
use crate::model::{CallToolResult, ErrorData};

/// Tool return value sent as `structuredContent`, mirrored as JSON text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoCallToolResult for Json<T> {
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData> {
        let value = serde_json::to_value(self.0).map_err(|e| {
            ErrorData::internal_error(format!("failed to serialize structured content: {e}"), None)
        })?;
        Ok(CallToolResult::structured(value))
    }
}
