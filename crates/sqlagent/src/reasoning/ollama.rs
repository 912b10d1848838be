use std::time::Duration;

use serde_json::{Value, json};

use super::{CompletionRequest, ReasoningService, excerpt};
use crate::config::ServiceConfig;
use crate::error::ServiceError;

const CHAT_PATH: &str = "/api/chat";
const TAGS_PATH: &str = "/api/tags";
const ERROR_BODY_EXCERPT_CHARS: usize = 200;

/// Reasoning backend talking to an Ollama server over its chat endpoint.
#[derive(Debug, Clone)]
pub struct OllamaService {
    endpoint: String,
    model: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl OllamaService {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| ServiceError::Unavailable(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.request_timeout,
            client,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Confirms the server answers and has the configured model pulled.
    pub fn check(&self) -> Result<(), ServiceError> {
        let url = format!("{}{TAGS_PATH}", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|error| self.transport_error(&error))?;
        let body = read_success_body(response)?;

        let installed = parse_model_names(&body)?;
        if installed.iter().any(|name| model_matches(name, &self.model)) {
            Ok(())
        } else {
            Err(ServiceError::Unavailable(format!(
                "model `{}` is not installed; run `ollama pull {}`",
                self.model, self.model
            )))
        }
    }

    fn transport_error(&self, error: &reqwest::Error) -> ServiceError {
        if error.is_timeout() {
            ServiceError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
        } else {
            ServiceError::Unavailable(format!("{} unreachable: {error}", self.endpoint))
        }
    }
}

impl ReasoningService for OllamaService {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let url = format!("{}{CHAT_PATH}", self.endpoint);
        let body = build_chat_body(&self.model, request);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|error| self.transport_error(&error))?;
        let payload = read_success_body(response)?;

        parse_chat_response(&payload)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

fn read_success_body(response: reqwest::blocking::Response) -> Result<Value, ServiceError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().unwrap_or_default();
        return Err(ServiceError::Unavailable(format!(
            "HTTP {status}: {}",
            excerpt(&text, ERROR_BODY_EXCERPT_CHARS)
        )));
    }

    let text = response
        .text()
        .map_err(|error| ServiceError::MalformedResponse(format!("unreadable body: {error}")))?;
    serde_json::from_str(&text).map_err(|error| {
        ServiceError::MalformedResponse(format!(
            "invalid JSON ({error}): {}",
            excerpt(&text, ERROR_BODY_EXCERPT_CHARS)
        ))
    })
}

#[must_use]
pub fn build_chat_body(model: &str, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "stream": false,
        "messages": [
            {"role": "system", "content": request.instruction},
            {"role": "user", "content": request.input},
        ],
        "options": {"temperature": request.temperature},
    })
}

pub fn parse_chat_response(payload: &Value) -> Result<String, ServiceError> {
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        return Err(ServiceError::Unavailable(error.to_string()));
    }

    let content = payload
        .pointer("/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::MalformedResponse("response missing message.content".to_string()))?;

    if content.trim().is_empty() {
        return Err(ServiceError::MalformedResponse(
            "response content is empty".to_string(),
        ));
    }
    Ok(content.to_string())
}

fn parse_model_names(payload: &Value) -> Result<Vec<String>, ServiceError> {
    let models = payload
        .get("models")
        .and_then(Value::as_array)
        .ok_or_else(|| ServiceError::MalformedResponse("tags response missing models".to_string()))?;

    Ok(models
        .iter()
        .filter_map(|model| model.get("name").and_then(Value::as_str))
        .map(ToString::to_string)
        .collect())
}

/// `llama3` matches an installed `llama3:latest`; an explicit tag must match exactly.
fn model_matches(installed: &str, wanted: &str) -> bool {
    if installed == wanted {
        return true;
    }
    !wanted.contains(':') && installed.split(':').next() == Some(wanted)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_chat_body, model_matches, parse_chat_response, parse_model_names};
    use crate::error::ServiceError;
    use crate::models::Stage;
    use crate::reasoning::CompletionRequest;

    #[test]
    fn chat_body_carries_instruction_input_and_temperature() {
        let request = CompletionRequest {
            stage: Stage::Decomposer,
            instruction: "write sql".to_string(),
            input: "QUESTION: how many?".to_string(),
            temperature: 0.3,
        };
        let body = build_chat_body("llama3", &request);

        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "write sql");
        assert_eq!(body["messages"][1]["content"], "QUESTION: how many?");
        let temperature = body["options"]["temperature"]
            .as_f64()
            .expect("temperature should be numeric");
        assert!((temperature - 0.3).abs() < 1e-6);
    }

    #[test]
    fn chat_response_content_is_extracted() {
        let payload = json!({"message": {"role": "assistant", "content": "```sql\nSELECT 1\n```"}});
        assert_eq!(
            parse_chat_response(&payload).expect("content should parse"),
            "```sql\nSELECT 1\n```"
        );
    }

    #[test]
    fn malformed_and_error_payloads_are_classified() {
        assert!(matches!(
            parse_chat_response(&json!({"done": true})),
            Err(ServiceError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_chat_response(&json!({"message": {"content": "  "}})),
            Err(ServiceError::MalformedResponse(_))
        ));
        assert_eq!(
            parse_chat_response(&json!({"error": "model \"llama9\" not found"})),
            Err(ServiceError::Unavailable("model \"llama9\" not found".to_string()))
        );
    }

    #[test]
    fn installed_models_match_with_implicit_latest_tag() {
        let names = parse_model_names(&json!({"models": [{"name": "llama3:latest"}, {"name": "qwen2:7b"}]}))
            .expect("tags should parse");
        assert!(names.iter().any(|name| model_matches(name, "llama3")));
        assert!(names.iter().any(|name| model_matches(name, "qwen2:7b")));
        assert!(!names.iter().any(|name| model_matches(name, "qwen2:1b")));
    }
}
