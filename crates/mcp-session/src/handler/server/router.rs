use std::borrow::Cow;

pub mod prompt;
pub mod tool;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("tool `{0}` is registered twice")]
    DuplicateTool(Cow<'static, str>),
    #[error("prompt `{0}` is registered twice")]
    DuplicatePrompt(String),
    #[error("tool `{tool}` has an invalid output schema: {reason}")]
    InvalidOutputSchema {
        tool: Cow<'static, str>,
        reason: String,
    },
}
