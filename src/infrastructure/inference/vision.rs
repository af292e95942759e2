//! Visual classifier and judge backed by vision models on the inference service.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ClassifierVerdict, JudgeVerdict};
use crate::domain::ports::{InferenceClient, InferenceRequest, VisualClassifier, VisualJudge};
use crate::services::extract_json_object;

const VISUAL_PROMPT: &str = "\
You are a senior UI quality-assurance engineer. Inspect the attached screenshot \
of a web application for visual defects: overlapping or overflowing elements, \
broken or missing images, illegible or truncated text, inconsistent spacing, \
poor contrast, and empty states that look broken.

Feature under test:
{context}

Respond ONLY with a JSON object:
{\"passed\": true|false, \"confidence\": 0.0-1.0, \"issues\": [\"short description\", ...]}";

const UNPARSEABLE: &str = "vision model returned unparseable output";

/// Structured reply from a vision model.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualReply {
    pub passed: bool,
    /// Certainty of the verdict itself, not of a pass
    pub confidence: f64,
    pub issues: Vec<String>,
}

impl VisualReply {
    /// Probability that the screenshot is acceptable.
    pub fn pass_score(&self) -> f64 {
        let confidence = self.confidence.clamp(0.0, 1.0);
        if self.passed {
            confidence
        } else {
            1.0 - confidence
        }
    }
}

/// Parse a model's free-text answer.
///
/// Missing `passed` defaults to "no issues reported"; missing `confidence`
/// defaults to 0.5, which lands in the ambiguous band.
pub fn parse_visual_reply(text: &str) -> Option<VisualReply> {
    let value = extract_json_object(text)?;
    let issues: Vec<String> = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(issue_text).collect())
        .unwrap_or_default();

    let passed = value
        .get("passed")
        .and_then(Value::as_bool)
        .unwrap_or(issues.is_empty());
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.5);

    Some(VisualReply {
        passed,
        confidence,
        issues,
    })
}

fn issue_text(item: &Value) -> Option<String> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => {
            let description = map.get("description").and_then(Value::as_str)?;
            Some(match map.get("severity").and_then(Value::as_str) {
                Some(severity) => format!("[{severity}] {description}"),
                None => description.to_string(),
            })
        }
        _ => None,
    }
}

async fn ask(
    client: &dyn InferenceClient,
    model: &str,
    screenshot: &Path,
    context: &str,
) -> DomainResult<String> {
    let image = tokio::fs::read(screenshot).await?;
    let response = client
        .generate(InferenceRequest {
            model: model.to_string(),
            prompt: VISUAL_PROMPT.replace("{context}", context),
            images: vec![image],
            stream: false,
        })
        .await?;
    Ok(response.text)
}

/// Fast pass: a small local vision model.
pub struct InferenceVisualClassifier {
    client: Arc<dyn InferenceClient>,
    model: String,
}

impl InferenceVisualClassifier {
    pub fn new(client: Arc<dyn InferenceClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl VisualClassifier for InferenceVisualClassifier {
    #[instrument(skip(self, context), fields(model = %self.model, screenshot = %screenshot.display()))]
    async fn classify(&self, screenshot: &Path, context: &str) -> DomainResult<ClassifierVerdict> {
        let text = ask(self.client.as_ref(), &self.model, screenshot, context).await?;

        let Some(reply) = parse_visual_reply(&text) else {
            warn!("classifier output had no JSON verdict");
            return Ok(ClassifierVerdict {
                confidence: 0.0,
                issues: vec![UNPARSEABLE.to_string()],
            });
        };

        let confidence = reply.pass_score();
        debug!(confidence, issues = reply.issues.len(), "screenshot classified");
        Ok(ClassifierVerdict {
            confidence,
            issues: reply.issues,
        })
    }
}

/// Slow pass for the ambiguous band: a larger vision model.
pub struct InferenceVisualJudge {
    client: Arc<dyn InferenceClient>,
    model: String,
}

impl InferenceVisualJudge {
    pub fn new(client: Arc<dyn InferenceClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl VisualJudge for InferenceVisualJudge {
    #[instrument(skip(self, context), fields(model = %self.model, screenshot = %screenshot.display()))]
    async fn judge(&self, screenshot: &Path, context: &str) -> DomainResult<JudgeVerdict> {
        let text = ask(self.client.as_ref(), &self.model, screenshot, context).await?;

        Ok(match parse_visual_reply(&text) {
            Some(reply) => JudgeVerdict {
                passed: reply.passed,
                issues: reply.issues,
            },
            None => {
                warn!("judge output had no JSON verdict");
                JudgeVerdict {
                    passed: false,
                    issues: vec![UNPARSEABLE.to_string()],
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::InferenceResponse;
    use std::sync::Mutex;

    struct CannedClient {
        reply: String,
        requests: Mutex<Vec<InferenceRequest>>,
    }

    #[async_trait]
    impl InferenceClient for CannedClient {
        async fn generate(&self, request: InferenceRequest) -> DomainResult<InferenceResponse> {
            let model = request.model.clone();
            self.requests.lock().unwrap().push(request);
            Ok(InferenceResponse {
                model,
                text: self.reply.clone(),
            })
        }
    }

    fn canned(reply: &str) -> Arc<CannedClient> {
        Arc::new(CannedClient {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_parse_fenced_reply() {
        let text = "Here you go:\n```json\n{\"passed\": false, \"confidence\": 0.9, \
                    \"issues\": [{\"severity\": \"critical\", \"description\": \"button overlaps header\"}]}\n```";
        let reply = parse_visual_reply(text).unwrap();
        assert!(!reply.passed);
        assert_eq!(reply.issues, vec!["[critical] button overlaps header"]);
        assert!((reply.pass_score() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_parse_defaults() {
        let reply = parse_visual_reply("{\"issues\": []}").unwrap();
        assert!(reply.passed);
        assert!((reply.pass_score() - 0.5).abs() < 1e-9);
        assert!(parse_visual_reply("looks fine to me").is_none());
    }

    #[tokio::test]
    async fn test_classifier_sends_image_and_scores() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("home.png");
        std::fs::write(&shot, [0x89, b'P', b'N', b'G']).unwrap();

        let client = canned("{\"passed\": true, \"confidence\": 0.92, \"issues\": []}");
        let classifier = InferenceVisualClassifier::new(client.clone(), "small-vl");
        let verdict = classifier.classify(&shot, "login page").await.unwrap();

        assert!((verdict.confidence - 0.92).abs() < 1e-9);
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "small-vl");
        assert_eq!(requests[0].images, vec![vec![0x89, b'P', b'N', b'G']]);
        assert!(requests[0].prompt.contains("login page"));
    }

    #[tokio::test]
    async fn test_unparseable_output_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("a.png");
        std::fs::write(&shot, b"img").unwrap();

        let client = canned("I cannot see anything");
        let verdict = InferenceVisualClassifier::new(client.clone(), "m")
            .classify(&shot, "")
            .await
            .unwrap();
        assert!(verdict.confidence.abs() < f64::EPSILON);

        let judged = InferenceVisualJudge::new(client, "big")
            .judge(&shot, "")
            .await
            .unwrap();
        assert!(!judged.passed);
    }

    #[tokio::test]
    async fn test_missing_screenshot_is_an_error() {
        let client = canned("{}");
        let result = InferenceVisualClassifier::new(client, "m")
            .classify(Path::new("/nonexistent/shot.png"), "")
            .await;
        assert!(result.is_err());
    }
}
