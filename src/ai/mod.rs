mod ollama;

pub use ollama::{DEFAULT_ENDPOINT, OllamaClient};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Sampling temperature biased toward deterministic output.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Subject and keywords returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub subject: String,
    pub keywords: Vec<String>,
}

impl Description {
    /// Render as `"subject (kw1, kw2, ...)"`.
    pub fn render(&self) -> String {
        format!("{} ({})", self.subject, self.keywords.join(", "))
    }
}

/// One image to describe. Created per file and dropped after the call.
#[derive(Debug, Clone)]
pub struct DescriptionRequest {
    pub image_base64: String,
    pub model: String,
    pub prompt: String,
    pub temperature: Option<f32>,
}

impl DescriptionRequest {
    pub fn new(image_bytes: &[u8], model: impl Into<String>, temperature: Option<f32>) -> Self {
        Self {
            image_base64: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                image_bytes,
            ),
            model: model.into(),
            prompt: build_prompt(),
            temperature,
        }
    }
}

/// A multimodal completion endpoint.
///
/// Implementations return the raw completion text. Cancellation is done by
/// dropping the returned future, so implementations must not spawn work that
/// outlives it.
///
/// # Example
///
/// ```rust,no_run
/// use exif_describe::ai::{DescriptionRequest, InferenceClient, OllamaClient};
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = OllamaClient::new("http://localhost:11434");
/// let request = DescriptionRequest::new(&std::fs::read("cat.jpg")?, "gemma3:latest", Some(0.3));
/// let text = client.complete(&request).await?;
/// println!("{text}");
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait InferenceClient: Send + Sync {
    /// The display name of this client (e.g. "Ollama").
    fn name(&self) -> &str;

    async fn complete(&self, request: &DescriptionRequest) -> PipelineResult<String>;
}

/// The fixed instruction sent with every image.
pub fn build_prompt() -> String {
    "Describe the photo as a subject and a collection of keywords. \
     Return the response in JSON format. \
     Use the following schema: { subject: string, keywords: string[] }"
        .to_string()
}

/// Parse a completion into a [`Description`].
///
/// Tolerates markdown code fences, prose around the object and trailing
/// commas. Anything else missing `subject` or `keywords` is a
/// [`PipelineError::MalformedResponse`].
pub fn parse_description(text: &str) -> PipelineResult<Description> {
    log::debug!("Raw model response:\n{text}");

    let candidates = extract_json_candidates(text.trim());
    let mut first_error = None;

    for candidate in &candidates {
        match serde_json::from_str::<Description>(candidate) {
            Ok(description) => return Ok(description),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        if let Ok(description) = serde_json::from_str::<Description>(&fix_trailing_commas(candidate)) {
            return Ok(description);
        }
    }

    Err(PipelineError::MalformedResponse(match first_error {
        Some(e) if e.is_data() => format!("missing or invalid `subject`/`keywords`: {e}"),
        Some(e) => format!("not valid JSON: {e}"),
        None => "empty response".to_string(),
    }))
}

/// Extract possible JSON object strings from the response text.
fn extract_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    // Body of a ```json ... ``` fence
    if text.contains("```") {
        let stripped = text
            .lines()
            .skip_while(|l| !l.trim().starts_with("```"))
            .skip(1)
            .take_while(|l| !l.trim().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n");
        if !stripped.trim().is_empty() {
            candidates.push(stripped);
        }
    }

    // Outermost { ... }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            candidates.push(text[start..=end].to_string());
        }
    }

    if !text.is_empty() {
        candidates.push(text.to_string());
    }

    candidates
}

/// Drop commas directly before `}` or `]` outside of strings.
fn fix_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                let rest = chars.clone().find(|n| !n.is_whitespace());
                if matches!(rest, Some('}') | Some(']')) {
                    continue;
                }
            }
            _ => {}
        }
        result.push(c);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_both_fields() {
        let prompt = build_prompt();
        assert!(prompt.contains("subject"));
        assert!(prompt.contains("keywords"));
        assert!(prompt.contains("JSON"));
    }

    #[test]
    fn request_encodes_payload_as_base64() {
        let request = DescriptionRequest::new(b"\xFF\xD8\xFF", "llava", Some(0.3));
        assert_eq!(request.image_base64, "/9j/");
        assert_eq!(request.model, "llava");
        assert_eq!(request.temperature, Some(0.3));
    }

    #[test]
    fn render_joins_keywords() {
        let d = parse_description(r#"{"subject":"a cat","keywords":["orange","sleeping"]}"#).unwrap();
        assert_eq!(d.render(), "a cat (orange, sleeping)");
    }

    #[test]
    fn render_without_keywords() {
        let d = Description {
            subject: "Fog".into(),
            keywords: vec![],
        };
        assert_eq!(d.render(), "Fog ()");
    }

    #[test]
    fn extra_fields_are_ignored() {
        let d = parse_description(r#"{"subject":"Bay","keywords":["ocean"],"mood":"calm"}"#).unwrap();
        assert_eq!(d.subject, "Bay");
    }

    #[test]
    fn markdown_fence_is_stripped() {
        let text = "Here you go:\n```json\n{\"subject\": \"Lake\", \"keywords\": [\"water\"]}\n```";
        assert_eq!(parse_description(text).unwrap().subject, "Lake");
    }

    #[test]
    fn surrounding_prose_is_stripped() {
        let text = "Sure! {\"subject\": \"Dog\", \"keywords\": [\"puppy\"]} Hope that helps.";
        assert_eq!(parse_description(text).unwrap().keywords, vec!["puppy"]);
    }

    #[test]
    fn trailing_commas_tolerated() {
        let text = r#"{"subject": "Bridge", "keywords": ["steel", "river",],}"#;
        assert_eq!(parse_description(text).unwrap().keywords, vec!["steel", "river"]);
    }

    #[test]
    fn missing_keywords_is_malformed() {
        let err = parse_description(r#"{"subject":"a cat"}"#).unwrap_err();
        match err {
            PipelineError::MalformedResponse(msg) => assert!(msg.contains("keywords")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wrong_types_are_malformed() {
        assert!(parse_description(r#"{"subject":"a cat","keywords":"orange"}"#).is_err());
        assert!(parse_description(r#"{"subject":null,"keywords":[]}"#).is_err());
    }

    #[test]
    fn garbage_and_empty_fail() {
        assert!(matches!(
            parse_description("no json here"),
            Err(PipelineError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_description("   "),
            Err(PipelineError::MalformedResponse(_))
        ));
    }

    #[test]
    fn fix_trailing_commas_leaves_strings_alone() {
        assert_eq!(fix_trailing_commas(r#"{"a": 1,}"#), r#"{"a": 1}"#);
        assert_eq!(fix_trailing_commas(r#"["a", ]"#), r#"["a" ]"#);
        let s = r#"{"a": "hello,}"}"#;
        assert_eq!(fix_trailing_commas(s), s);
    }
}
