//! LLM Client Abstraction
//!
//! Generic interface for asking a model backend for a JSON document.
//! Real implementation speaks Ollama and OpenAI-compatible HTTP APIs; the
//! scripted client replays canned answers for tests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// LLM backend configuration (`[planner]` in the config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Off by default: plans then come only from the direct path
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// LLM errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("LLM is disabled in configuration")]
    Disabled,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned empty response")]
    EmptyResponse,
}

/// Generic LLM client trait
pub trait LlmClient: Send + Sync {
    /// Call the model with a prompt and expect a JSON document back
    fn call_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_description: &str,
    ) -> Result<Value, LlmError>;
}

/// Find the first balanced JSON object in model output
///
/// Models like to wrap JSON in prose or code fences. Braces inside string
/// literals are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse model text as JSON, falling back to the first embedded object
pub fn parse_model_json(text: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let object = extract_json_object(trimmed)
        .ok_or_else(|| LlmError::InvalidJson("no JSON object in LLM output".to_string()))?;
    serde_json::from_str(object)
        .map_err(|e| LlmError::InvalidJson(format!("LLM output is not valid JSON: {}", e)))
}

// ============================================================================
// HTTP client
// ============================================================================

/// Real LLM client implementation using HTTP
///
/// The blocking reqwest client is built per call: it must never be created
/// or dropped on an async runtime thread.
pub struct HttpLlmClient {
    config: LlmConfig,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    fn http(&self) -> Result<reqwest::blocking::Client, LlmError> {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpError(format!("Failed to create HTTP client: {}", e)))
    }

    /// Check if endpoint is Ollama-style
    fn is_ollama_endpoint(&self) -> bool {
        self.config.endpoint.contains("11434") || self.config.endpoint.contains("ollama")
    }

    fn send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.timeout_secs)
        } else {
            LlmError::HttpError(format!("Request failed: {}", e))
        }
    }

    /// Ollama `/api/generate`
    fn call_ollama(&self, prompt: &str) -> Result<Value, LlmError> {
        let url = format!("{}/api/generate", self.config.endpoint);

        let request_body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
        });

        let response = self
            .http()?
            .post(&url)
            .json(&request_body)
            .send()
            .map_err(|e| self.send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from Ollama",
                response.status()
            )));
        }

        let response_json: Value = response
            .json()
            .map_err(|e| LlmError::InvalidJson(format!("Failed to parse response: {}", e)))?;

        let text = response_json
            .get("response")
            .and_then(Value::as_str)
            .ok_or(LlmError::EmptyResponse)?;

        parse_model_json(text)
    }

    /// OpenAI-compatible `/v1/chat/completions`
    fn call_openai_compatible(&self, system_prompt: &str, user_prompt: &str) -> Result<Value, LlmError> {
        let url = format!("{}/v1/chat/completions", self.config.endpoint);

        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "response_format": {"type": "json_object"},
        });

        let mut request = self.http()?.post(&url).json(&request_body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().map_err(|e| self.send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from OpenAI-compatible API",
                response.status()
            )));
        }

        let response_json: Value = response
            .json()
            .map_err(|e| LlmError::InvalidJson(format!("Failed to parse response: {}", e)))?;

        let text = response_json
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(Value::as_str)
            .ok_or(LlmError::EmptyResponse)?;

        parse_model_json(text)
    }
}

impl LlmClient for HttpLlmClient {
    fn call_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_description: &str,
    ) -> Result<Value, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }

        let full_prompt = format!(
            "{}\n\nUser request: {}\n\nYou must respond with valid JSON matching this schema:\n{}",
            system_prompt, user_prompt, schema_description
        );

        if self.is_ollama_endpoint() {
            match self.call_ollama(&full_prompt) {
                Ok(json) => return Ok(json),
                Err(e) => {
                    tracing::debug!("Ollama API failed, trying OpenAI-compatible: {}", e);
                }
            }
        }

        self.call_openai_compatible(system_prompt, &full_prompt)
    }
}

// ============================================================================
// Scripted client
// ============================================================================

/// Replays canned responses; the last one repeats
pub struct ScriptedLlmClient {
    responses: Mutex<Vec<Result<Value, LlmError>>>,
    prompts: Mutex<Vec<String>>,
    call_count: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<Value, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn always_valid(json: Value) -> Self {
        Self::new(vec![Ok(json)])
    }

    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// User prompts seen so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl LlmClient for ScriptedLlmClient {
    fn call_json(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        _schema_description: &str,
    ) -> Result<Value, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(user_prompt.to_string());
        }

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| LlmError::HttpError("scripted client poisoned".to_string()))?;

        match responses.len() {
            0 => Err(LlmError::EmptyResponse),
            1 => responses[0].clone(),
            _ => responses.remove(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_llm_config_default() {
        let config = LlmConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert!(config.api_key.is_none());
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_disabled_http_client_never_sends() {
        let client = HttpLlmClient::new(LlmConfig::default());
        assert_eq!(client.call_json("s", "u", "{}"), Err(LlmError::Disabled));
    }

    #[test]
    fn test_scripted_client_sequence() {
        let client = ScriptedLlmClient::new(vec![
            Ok(json!({"response": 1})),
            Err(LlmError::Timeout(30)),
        ]);

        assert_eq!(client.call_json("", "first", "").unwrap()["response"], 1);
        assert!(client.call_json("", "second", "").is_err());
        // Last response repeats
        assert!(client.call_json("", "third", "").is_err());
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.prompts(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_extract_json_object() {
        let text = "Sure! Here is the plan:\n```json\n{\"steps\": [{\"a\": \"}\"}]}\n```\nDone.";
        assert_eq!(
            extract_json_object(text),
            Some("{\"steps\": [{\"a\": \"}\"}]}")
        );
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("{ unclosed"), None);
    }

    #[test]
    fn test_parse_model_json() {
        assert_eq!(parse_model_json(" {\"x\": 1} ").unwrap(), json!({"x": 1}));
        assert_eq!(parse_model_json("answer: {\"x\": 2}").unwrap(), json!({"x": 2}));
        assert_eq!(parse_model_json("   "), Err(LlmError::EmptyResponse));
        assert!(matches!(
            parse_model_json("nothing here"),
            Err(LlmError::InvalidJson(_))
        ));
    }
}
