use std::time::Duration;

use futures::stream::BoxStream;
use sse_stream::{Error as SseError, Sse};

pub type BoxedSseResponse = BoxStream<'static, Result<Sse, SseError>>;

/// How a client re-opens an SSE stream that dropped before it was done.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct SseRetryConfig {
    /// `None` retries forever.
    pub max_times: Option<usize>,
    /// Lower bound of the wait between attempts. A longer `retry:` hint
    /// from the server is honored.
    pub min_duration: Duration,
}

impl SseRetryConfig {
    pub const DEFAULT_MIN_DURATION: Duration = Duration::from_millis(1000);

    pub fn allows(&self, attempt: usize) -> bool {
        self.max_times.is_none_or(|max| attempt < max)
    }
}

impl Default for SseRetryConfig {
    fn default() -> Self {
        Self {
            max_times: Some(3),
            min_duration: Self::DEFAULT_MIN_DURATION,
        }
    }
}
