use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::ai::AIProvider;
use crate::models::PostingId;

const MAX_RESPONSE_TOKENS: u32 = 4096;

pub const REASON_BATCH_FAILED: &str = "AI batch failed";
pub const REASON_MISSING_VERDICT: &str = "AI response missing verdict";

/// What the model gets to see of one posting.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierInput {
    #[serde(serialize_with = "id_as_string")]
    pub id: PostingId,
    pub title: String,
    pub description: String,
}

fn id_as_string<S: serde::Serializer>(id: &PostingId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub is_match: bool,
    pub reason: String,
}

impl Judgement {
    fn default_match(reason: &str) -> Self {
        Self {
            is_match: true,
            reason: reason.to_string(),
        }
    }
}

/// Second filtering stage: asks a language model which postings fit the
/// candidate profile, one batch per call.
///
/// Any failure resolves to "match": a rejected id is never fetched again.
pub struct BatchClassifier {
    provider: Box<dyn AIProvider>,
    profile: String,
    max_description_chars: usize,
}

impl BatchClassifier {
    pub fn new(provider: Box<dyn AIProvider>, profile: &str, max_description_chars: usize) -> Self {
        Self {
            provider,
            profile: profile.to_string(),
            max_description_chars,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn prepare(&self, id: PostingId, title: &str, description: &str) -> ClassifierInput {
        ClassifierInput {
            id,
            title: title.to_string(),
            description: truncate_chars(description, self.max_description_chars).to_string(),
        }
    }

    /// Returns one judgement per submitted id, whatever the service does.
    pub fn evaluate(&self, batch: &[ClassifierInput]) -> HashMap<PostingId, Judgement> {
        if batch.is_empty() {
            return HashMap::new();
        }

        let mut verdicts = match self.request(batch) {
            Ok(verdicts) => verdicts,
            Err(e) => {
                warn!(batch = batch.len(), error = %format!("{e:#}"), "classifier batch failed, approving all");
                return batch
                    .iter()
                    .map(|input| (input.id, Judgement::default_match(REASON_BATCH_FAILED)))
                    .collect();
            }
        };

        batch
            .iter()
            .map(|input| {
                let judgement = verdicts.remove(&input.id.to_string()).unwrap_or_else(|| {
                    debug!(id = %input.id, "no usable verdict for posting, approving");
                    Judgement::default_match(REASON_MISSING_VERDICT)
                });
                (input.id, judgement)
            })
            .collect()
    }

    fn request(&self, batch: &[ClassifierInput]) -> Result<HashMap<String, Judgement>> {
        let prompt = build_prompt(&self.profile, batch)?;
        let response = self.provider.complete(&prompt, MAX_RESPONSE_TOKENS)?;
        parse_verdicts(&response)
    }
}

fn build_prompt(profile: &str, batch: &[ClassifierInput]) -> Result<String> {
    let jobs_json = serde_json::to_string_pretty(batch).context("Failed to encode batch")?;
    Ok(format!(
        "Act as a technical recruiter for this candidate:\n{profile}\n\n\
        Evaluate the following list of jobs. For each job, decide whether it is a match \
        for the candidate profile.\n\n\
        Strict rules:\n\
        1. REJECT senior/lead roles (more than 3 years of experience required).\n\
        2. REJECT roles with an irrelevant tech stack (e.g. pure C#/.NET, pure frontend).\n\
        3. APPROVE junior, graduate and mid-level roles that fit the profile.\n\n\
        Input jobs:\n{jobs_json}\n\n\
        Return ONLY a JSON object whose keys are the job ids and whose values are objects \
        with \"match\" (boolean) and \"reason\" (short string). Example:\n\
        {{\"12345\": {{\"match\": true, \"reason\": \"Good stack fit\"}}, \
        \"67890\": {{\"match\": false, \"reason\": \"Requires 10 years experience\"}}}}"
    ))
}

/// Parses `{"<id>": {"match": bool, "reason": "..."}}`, tolerating a Markdown
/// fence or prose around the object. Entries without a boolean `match` are left
/// out so the caller defaults them.
fn parse_verdicts(response: &str) -> Result<HashMap<String, Judgement>> {
    let json = extract_json_object(response)
        .ok_or_else(|| anyhow!("No JSON object in classifier response"))?;
    let value: Value = serde_json::from_str(json).context("Malformed classifier JSON")?;
    let entries = value
        .as_object()
        .ok_or_else(|| anyhow!("Classifier response is not a JSON object"))?;

    let mut verdicts = HashMap::new();
    for (id, entry) in entries {
        let Some(is_match) = entry.get("match").and_then(Value::as_bool) else {
            continue;
        };
        let reason = entry
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        verdicts.insert(id.trim().to_string(), Judgement { is_match, reason });
    }
    Ok(verdicts)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Cuts `text` to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
