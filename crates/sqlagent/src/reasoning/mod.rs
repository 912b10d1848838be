pub mod offline;
pub mod ollama;
pub mod scripted;

use std::sync::Arc;

use crate::error::ServiceError;
use crate::models::Stage;

pub use offline::OfflineService;
pub use ollama::OllamaService;
pub use scripted::ScriptedService;

/// One stateless request to the reasoning capability.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub stage: Stage,
    pub instruction: String,
    pub input: String,
    pub temperature: f32,
}

/// Opaque text-completion capability. Nothing survives between calls; every stage sends
/// its full instruction and input each time.
pub trait ReasoningService: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;

    fn name(&self) -> &str;
}

impl<T: ReasoningService + ?Sized> ReasoningService for Arc<T> {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        (**self).complete(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Trims `text` to at most `max_chars` characters for logs and error payloads.
#[must_use]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut shortened = trimmed.chars().take(max_chars).collect::<String>();
    shortened.push_str("...");
    shortened
}

#[cfg(test)]
mod tests {
    use super::excerpt;

    #[test]
    fn excerpt_trims_and_truncates_on_char_boundaries() {
        assert_eq!(excerpt("  short  ", 10), "short");
        assert_eq!(excerpt("Plzeň and Brno", 5), "Plzeň...");
    }
}
