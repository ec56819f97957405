use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

// --- Provider trait ---

pub trait AIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    Anthropic,
    OpenAI,
    ClaudeCli,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
    pub short_name: String,
}

const MODELS: &[(&[&str], ProviderKind, &str)] = &[
    (&["gemini-flash", "flash"], ProviderKind::Gemini, "gemini-2.5-flash"),
    (&["gemini-pro"], ProviderKind::Gemini, "gemini-2.5-pro"),
    (&["api-haiku", "haiku"], ProviderKind::Anthropic, "claude-haiku-4-5-20251001"),
    (&["api-sonnet", "sonnet"], ProviderKind::Anthropic, "claude-sonnet-4-5-20250929"),
    (&["claude-haiku"], ProviderKind::ClaudeCli, "claude-haiku-4-5-20251001"),
    (&["claude-sonnet"], ProviderKind::ClaudeCli, "claude-sonnet-4-5-20250929"),
    (&["gpt-4o-mini"], ProviderKind::OpenAI, "gpt-4o-mini"),
    (&["gpt-4o"], ProviderKind::OpenAI, "gpt-4o"),
];

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    let wanted = name.trim();
    MODELS
        .iter()
        .find(|(aliases, _, _)| aliases.contains(&wanted))
        .map(|(aliases, provider, model_id)| ModelSpec {
            provider: *provider,
            model_id: model_id.to_string(),
            short_name: aliases[0].to_string(),
        })
        .ok_or_else(|| {
            let known: Vec<&str> = MODELS.iter().map(|(aliases, _, _)| aliases[0]).collect();
            anyhow!("Unknown model '{}'. Available: {}", name, known.join(", "))
        })
}

pub fn create_provider(spec: &ModelSpec, timeout: Duration) -> Result<Box<dyn AIProvider>> {
    let model_id = spec.model_id.clone();
    let provider: Box<dyn AIProvider> = match spec.provider {
        ProviderKind::Gemini => Box::new(GeminiProvider::new(model_id, timeout)?),
        ProviderKind::Anthropic => Box::new(AnthropicProvider::new(model_id, timeout)?),
        ProviderKind::OpenAI => Box::new(OpenAIProvider::new(model_id, timeout)?),
        ProviderKind::ClaudeCli => Box::new(ClaudeCliProvider::new(model_id)?),
    };
    Ok(provider)
}

fn api_key(var: &str) -> Result<String> {
    env::var(var).with_context(|| {
        format!("{var} environment variable not set. Set it with: export {var}=your-key-here")
    })
}

fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Sends the request and decodes a JSON body, turning non-2xx answers into errors
/// that carry the response text.
fn send_json<T: DeserializeOwned>(request: reqwest::blocking::RequestBuilder, api: &str) -> Result<T> {
    let response = request
        .send()
        .with_context(|| format!("Failed to send request to {api}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().unwrap_or_default();
        return Err(anyhow!(
            "{} request failed with status {}: {}",
            api,
            status,
            error_text
        ));
    }

    response
        .json()
        .with_context(|| format!("Failed to parse {api} response"))
}

// --- Gemini provider ---

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl GeminiProvider {
    pub fn new(model_id: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key("GEMINI_API_KEY")?,
            model_id,
            client: http_client(timeout)?,
        })
    }
}

impl AIProvider for GeminiProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: max_tokens,
            },
        };

        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model_id);
        let api_response: GeminiResponse = send_json(
            self.client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(&request),
            "Gemini API",
        )?;

        let text: String = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(anyhow!("No content in Gemini API response"));
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn user(prompt: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: prompt.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key("ANTHROPIC_API_KEY")?,
            model_id,
            client: http_client(timeout)?,
        })
    }
}

impl AIProvider for AnthropicProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![ChatMessage::user(prompt)],
        };

        let api_response: AnthropicResponse = send_json(
            self.client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&request),
            "Anthropic API",
        )?;

        api_response
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| anyhow!("No content in Anthropic API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key("OPENAI_API_KEY")?,
            model_id,
            client: http_client(timeout)?,
        })
    }
}

impl AIProvider for OpenAIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = OpenAIRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![ChatMessage::user(prompt)],
        };

        let api_response: OpenAIResponse = send_json(
            self.client
                .post(OPENAI_API_URL)
                .bearer_auth(&self.api_key)
                .json(&request),
            "OpenAI API",
        )?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No choices in OpenAI API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Local `claude` CLI provider ---

#[derive(Debug)]
pub struct ClaudeCliProvider {
    model_id: String,
}

impl ClaudeCliProvider {
    pub fn new(model_id: String) -> Result<Self> {
        check_cli("claude", &["--version"])
            .context("'claude' CLI unavailable. Use one of the API-backed models instead.")?;
        Ok(Self { model_id })
    }
}

/// Runs `program args..` and requires it to start and exit successfully.
fn check_cli(program: &str, args: &[&str]) -> Result<()> {
    let status = std::process::Command::new(program)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .with_context(|| format!("'{program}' not found"))?;
    if !status.success() {
        return Err(anyhow!("'{program}' exited with {status}"));
    }
    Ok(())
}

impl AIProvider for ClaudeCliProvider {
    fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        let output = std::process::Command::new("claude")
            .arg("-p")
            .arg(prompt)
            .arg("--model")
            .arg(&self.model_id)
            .output()
            .context("Failed to run 'claude' CLI")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("claude CLI failed: {}", stderr));
        }

        let response = String::from_utf8(output.stdout)
            .context("Invalid UTF-8 in claude CLI output")?;
        if response.trim().is_empty() {
            return Err(anyhow!("Empty response from claude CLI"));
        }
        Ok(response)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}
