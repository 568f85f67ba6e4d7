//! Structured extraction of incident fields from report text.
//!
//! A thread is rendered into a plain-text report ([`render_report`]) and sent
//! to an OpenAI-compatible chat completions endpoint with a strict JSON
//! schema response format. The schema is derived from
//! [`ExtractedIncident`] via `schemars`, so the Rust type is the single
//! source of truth for what the model may return.
//!
//! # Failure semantics
//!
//! | Outcome | Result |
//! |---------|--------|
//! | content parses against the schema | `Ok(Some(..))` |
//! | refusal, empty content, or unparseable JSON | `Ok(None)` |
//! | HTTP error status or network failure | `Err` |
//!
//! There is no retry: a thread that fails here is simply picked up again on
//! the next cycle if it still qualifies.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::ExtractionConfig;
use crate::models::{ExtractedIncident, MessageThread};
use crate::traits::Extractor;

pub const SYSTEM_PROMPT: &str = "Extract information from this police incident report/messages. MUST be written in English.
Infer from the report the following:
- Location: The location of the incident in a clear and disambiguated way (will be fed to a map search, so try to infer the best location to present). Format: \"Primary, secondary, [tertiary]\". Example: \"Trafikkontroll på Spongdalsvegen ved Berg (Trondheim municipality)\" -> \"Berg, Spongdalsvegen, Trondheim\"
- Type: The type of incident (short phrase, e.g. \"Traffic obstruction\", \"Fire\", etc.)
- Severity: The severity (LOW/MED/HIGH)
- Summary: A short summary, or \"N/A\" if not applicable.";

/// Render a thread as the report text given to the model.
pub fn render_report(thread: &MessageThread) -> String {
    let mut sb = String::from("Here is the police report:\n");
    sb.push_str(&format!(
        "For {}, in municipality {}",
        thread.district, thread.municipality
    ));
    if !thread.area.trim().is_empty() {
        sb.push_str(&format!(", in area {}", thread.area));
    }
    sb.push_str(&format!("\nMajor category: {}\n", thread.category));
    sb.push_str("\nChronological order of events/messages:\n");
    for msg in &thread.messages {
        sb.push_str(&format!(" > {}\n", msg.text));
    }
    sb
}

/// JSON schema for `T` in the shape strict structured output requires:
/// every object closed with `additionalProperties: false`, every property
/// listed in `required`, and no `$ref`s.
pub fn strict_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_default();

    close_objects(&mut value);
    let definitions = value.get("definitions").cloned();
    if let Some(defs) = definitions {
        inline_refs(&mut value, &defs);
    }

    if let Value::Object(map) = &mut value {
        map.remove("definitions");
        map.remove("$schema");
    }
    value
}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type") == Some(&Value::String("object".to_string())) {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let keys: Vec<Value> = props.keys().map(|k| Value::String(k.clone())).collect();
                    map.insert("required".to_string(), Value::Array(keys));
                }
            }
            for (_, v) in map.iter_mut() {
                close_objects(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                close_objects(item);
            }
        }
        _ => {}
    }
}

fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(path)) = map.get("$ref").cloned() {
                if let Some(name) = path.strip_prefix("#/definitions/") {
                    if let Some(def) = definitions.get(name) {
                        *value = def.clone();
                        inline_refs(value, definitions);
                        return;
                    }
                }
            }
            // schemars wraps documented refs as a single-element allOf
            if let Some(Value::Array(all_of)) = map.get("allOf").cloned() {
                if all_of.len() == 1 {
                    let description = map.get("description").cloned();
                    let mut inner = all_of[0].clone();
                    inline_refs(&mut inner, definitions);
                    if let (Some(desc), Value::Object(inner_map)) = (description, &mut inner) {
                        inner_map.insert("description".to_string(), desc);
                    }
                    *value = inner;
                    return;
                }
            }
            for (_, v) in map.iter_mut() {
                inline_refs(v, definitions);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

// ============ Wire types ============

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Decode the first choice's content into an [`ExtractedIncident`].
fn parse_completion(response: ChatResponse) -> Option<ExtractedIncident> {
    let message = response.choices.into_iter().next()?.message;
    if let Some(refusal) = message.refusal.filter(|r| !r.is_empty()) {
        tracing::warn!(%refusal, "model refused extraction");
        return None;
    }
    let content = message.content.filter(|c| !c.trim().is_empty())?;
    match serde_json::from_str::<ExtractedIncident>(&content) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(error = %e, "model output did not match the incident schema");
            None
        }
    }
}

// ============ OpenAI extractor ============

/// [`Extractor`] backed by an OpenAI-compatible chat completions API.
pub struct OpenAiExtractor {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    schema: Value,
}

impl OpenAiExtractor {
    pub fn new(config: &ExtractionConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            schema: strict_schema::<ExtractedIncident>(),
        })
    }

    /// Build from config, reading `OPENAI_API_KEY` from the environment.
    pub fn from_env(config: &ExtractionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::new(config, api_key)
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract(&self, report: &str) -> Result<Option<ExtractedIncident>> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                WireMessage {
                    role: "user",
                    content: report,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "incident",
                    strict: true,
                    schema: self.schema.clone(),
                },
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("extraction request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Invalid OpenAI response")?;
        Ok(parse_completion(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, ThreadMessage};
    use chrono::Utc;

    fn thread(area: &str) -> MessageThread {
        let now = Utc::now();
        let msg = |id: &str, text: &str| ThreadMessage {
            id: id.into(),
            text: text.into(),
            created_on: now,
            updated_on: now,
            has_image: false,
            previously_included_image: false,
            message_type: "Text".into(),
        };
        MessageThread {
            id: "t1".into(),
            district: "Trøndelag Politidistrikt".into(),
            district_id: 9,
            summary: String::new(),
            category: "Trafikk".into(),
            municipality: "Trondheim".into(),
            area: area.into(),
            created_on: now,
            updated_on: now,
            last_message_on: now,
            is_active: true,
            messages: vec![
                msg("m1", "Trafikkontroll på Spongdalsvegen ved Berg"),
                msg("m2", "Kontrollen er avsluttet"),
            ],
        }
    }

    #[test]
    fn test_render_report_without_area() {
        let text = render_report(&thread(""));
        assert_eq!(
            text,
            "Here is the police report:\n\
             For Trøndelag Politidistrikt, in municipality Trondheim\n\
             Major category: Trafikk\n\
             \n\
             Chronological order of events/messages:\n \
             > Trafikkontroll på Spongdalsvegen ved Berg\n \
             > Kontrollen er avsluttet\n"
        );
    }

    #[test]
    fn test_render_report_with_area() {
        let text = render_report(&thread("Byåsen"));
        assert!(text.contains("in municipality Trondheim, in area Byåsen\n"));
    }

    #[test]
    fn test_strict_schema_shape() {
        let schema = strict_schema::<ExtractedIncident>();
        let obj = schema.as_object().unwrap();
        assert!(!obj.contains_key("definitions"));
        assert!(!obj.contains_key("$schema"));
        assert_eq!(obj["additionalProperties"], Value::Bool(false));

        let required: Vec<&str> = obj["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        for key in ["location", "type", "severity", "summary"] {
            assert!(required.contains(&key), "missing required key {}", key);
        }

        let severity = &obj["properties"]["severity"];
        assert!(severity.get("$ref").is_none());
        let variants: Vec<&str> = severity["enum"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(variants, vec!["LOW", "MED", "HIGH"]);
    }

    #[test]
    fn test_parse_completion_ok() {
        let body: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": "{\"location\":\"Berg, Spongdalsvegen, Trondheim\",\"type\":\"Traffic control\",\"severity\":\"MED\",\"summary\":\"Control finished\"}"}}]
        }))
        .unwrap();
        let parsed = parse_completion(body).unwrap();
        assert_eq!(parsed.severity, Severity::Med);
        assert_eq!(parsed.location, "Berg, Spongdalsvegen, Trondheim");
    }

    #[test]
    fn test_parse_completion_rejects_bad_output() {
        let cases = [
            serde_json::json!({"choices": []}),
            serde_json::json!({"choices": [{"message": {"content": null, "refusal": "I can't"}}]}),
            serde_json::json!({"choices": [{"message": {"content": "   "}}]}),
            serde_json::json!({"choices": [{"message": {"content": "location: Oslo"}}]}),
            serde_json::json!({"choices": [{"message": {"content": "{\"location\":\"Oslo\",\"type\":\"Fire\",\"severity\":\"EXTREME\",\"summary\":\"\"}"}}]}),
        ];
        for case in cases {
            let body: ChatResponse = serde_json::from_value(case.clone()).unwrap();
            assert!(parse_completion(body).is_none(), "accepted {}", case);
        }
    }
}
