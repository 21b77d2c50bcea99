// External battle judge: asks a generative-language API for a verdict and
// recovers structured JSON from its free-text reply.
//
// Every way this can go wrong (no credential, network failure, non-2xx,
// safety block, unparseable reply, wrong winner name) is reported as
// "unavailable" (`None`), never as an error. The caller falls back to the
// deterministic elo verdict.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;
use crate::db::Character;
use crate::metrics;

const API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TEMPERATURE: f64 = 0.4;
const MAX_OUTPUT_TOKENS: u32 = 300;

/// A resolved battle verdict: a definite winner plus narrative text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub winner: String,
    pub log: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

pub struct JudgeClient {
    http: reqwest::Client,
    api_key: String,
}

impl JudgeClient {
    /// Build a client when a judge credential is configured. A missing
    /// credential means every verdict uses the elo fallback instead.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.judge_api_key.clone()?;
        let http = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("failed to build judge HTTP client: {e}");
                return None;
            }
        };
        Some(Self { http, api_key })
    }

    /// Ask the judge to resolve a battle between two characters. Returns
    /// `None` whenever the judge is unavailable for any reason.
    pub async fn judge(&self, a: &Character, b: &Character) -> Option<Verdict> {
        let prompt = build_prompt(a, b);
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
                response_mime_type: "application/json",
            },
        };

        let started = std::time::Instant::now();
        let resp = self
            .http
            .post(API_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await;
        metrics::JUDGE_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("judge request failed: {e}");
                metrics::JUDGE_REQUESTS_TOTAL
                    .with_label_values(&["network_error"])
                    .inc();
                return None;
            }
        };

        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "judge returned non-success status");
            metrics::JUDGE_REQUESTS_TOTAL
                .with_label_values(&["http_error"])
                .inc();
            return None;
        }

        let data: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("judge response body unreadable: {e}");
                metrics::JUDGE_REQUESTS_TOTAL
                    .with_label_values(&["bad_body"])
                    .inc();
                return None;
            }
        };

        // Safety blocks and empty candidate lists land here too.
        let Some(text) = data
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
        else {
            tracing::warn!("judge returned no candidate text");
            metrics::JUDGE_REQUESTS_TOTAL
                .with_label_values(&["no_candidate"])
                .inc();
            return None;
        };

        match parse_verdict(text, &a.name, &b.name) {
            Some(verdict) => {
                metrics::JUDGE_REQUESTS_TOTAL.with_label_values(&["ok"]).inc();
                Some(verdict)
            }
            None => {
                tracing::warn!(reply = %text, "judge reply failed verdict validation");
                metrics::JUDGE_REQUESTS_TOTAL
                    .with_label_values(&["invalid_verdict"])
                    .inc();
                None
            }
        }
    }
}

/// Fixed prompt template embedding both characters' names and
/// descriptions verbatim.
fn build_prompt(a: &Character, b: &Character) -> String {
    format!(
        "You are the commentator for an imaginary duel between two characters.\n\
         - \"{a_name}\": \"{a_desc}\"\n\
         - \"{b_name}\": \"{b_desc}\"\n\
         \n\
         Rules:\n\
         1) Narrate an exciting battle between them in about 100 words.\n\
         2) Decide the winner: exactly one of \"{a_name}\" or \"{b_name}\".\n\
         3) Judge by creativity, counter-play potential, and the internal logic of each description.\n\
         4) No harmful, illegal, hateful, or sexual content.\n\
         5) Reply with JSON only, no surrounding text:\n\
         {{\n  \"winner\": \"{a_name}\" | \"{b_name}\",\n  \"log\": \"the commentary\"\n}}",
        a_name = a.name,
        a_desc = a.description,
        b_name = b.name,
        b_desc = b.description,
    )
}

/// Validate a raw judge reply into a `Verdict`. The winner must be
/// byte-identical to one of the two character names and both fields must
/// be non-empty.
pub fn parse_verdict(text: &str, name_a: &str, name_b: &str) -> Option<Verdict> {
    let value = extract_json(text)?;
    let verdict: Verdict = serde_json::from_value(value).ok()?;
    if verdict.winner.is_empty() || verdict.log.is_empty() {
        return None;
    }
    if verdict.winner != name_a && verdict.winner != name_b {
        return None;
    }
    Some(verdict)
}

/// Recover a JSON object from model output that may be wrapped in code
/// fences or surrounded by stray prose. Ladder: strict parse, then strip
/// fence markers and retry, then the first balanced brace span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(v) = parse_object(trimmed) {
        return Some(v);
    }

    let cleaned = strip_code_fences(trimmed);
    if let Some(v) = parse_object(&cleaned) {
        return Some(v);
    }

    first_brace_span(&cleaned).and_then(parse_object)
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// The first top-level `{ ... }` span, tracking string literals so braces
/// inside the narrative do not break the balance.
fn first_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
