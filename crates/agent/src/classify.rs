use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::llm::{extract_json, ChatMessage, CompletionOptions, LlmClient};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifySource {
    Model,
    Fallback,
}

/// Outcome of a classification: the value plus where it came from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Classified<T> {
    pub value: T,
    pub confidence: f64,
    pub source: ClassifySource,
}

impl<T> Classified<T> {
    pub fn fallback(value: T, confidence: f64) -> Self {
        Self { value, confidence, source: ClassifySource::Fallback }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ClassifySource::Fallback
    }
}

/// Asks the model, parses the first JSON object of the reply with `parse`
/// and falls back to the deterministic `rules` on any failure. Never fails.
///
/// `parse` returns the value and the model-reported confidence, or `None`
/// when the reply does not fit the expected shape.
pub async fn classify_with_fallback<T, P, R>(
    llm: &dyn LlmClient,
    component: &'static str,
    messages: &[ChatMessage],
    options: CompletionOptions,
    parse: P,
    rules: R,
) -> Classified<T>
where
    P: FnOnce(&Value) -> Option<(T, f64)>,
    R: FnOnce() -> (T, f64),
{
    let reply = match llm.chat(messages, options).await {
        Ok(reply) => reply,
        Err(error) => {
            warn!(event_name = "agent.classify.fallback", component, reason = %error, "model unavailable, using rules");
            let (value, confidence) = rules();
            return Classified::fallback(value, confidence);
        }
    };

    match extract_json(&reply).as_ref().and_then(parse) {
        Some((value, confidence)) => {
            Classified { value, confidence: confidence.clamp(0.0, 1.0), source: ClassifySource::Model }
        }
        None => {
            warn!(
                event_name = "agent.classify.fallback",
                component,
                reason = "unparsable model output",
                "model reply rejected, using rules"
            );
            let (value, confidence) = rules();
            Classified::fallback(value, confidence)
        }
    }
}

/// Reads `confidence` from a model reply, defaulting when absent.
pub fn reported_confidence(value: &Value, default: f64) -> f64 {
    value.get("confidence").and_then(Value::as_f64).unwrap_or(default).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{classify_with_fallback, reported_confidence, ClassifySource};
    use crate::llm::{ChatMessage, CompletionOptions, DisabledLlm, LlmError, ScriptedLlm};

    fn parse_label(value: &Value) -> Option<(String, f64)> {
        let label = value.get("label")?.as_str()?;
        Some((label.to_owned(), reported_confidence(value, 0.8)))
    }

    #[tokio::test]
    async fn model_answers_are_parsed_and_clamped() {
        let llm = ScriptedLlm::new([Ok(r#"{"label": "alpha", "confidence": 1.7}"#.to_owned())]);
        let result = classify_with_fallback(
            &llm,
            "test",
            &[ChatMessage::user("q")],
            CompletionOptions::classification(100),
            parse_label,
            || ("rules".to_owned(), 0.5),
        )
        .await;

        assert_eq!(result.value, "alpha");
        assert_eq!(result.source, ClassifySource::Model);
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn failures_and_bad_shapes_use_the_rules() {
        let rules = || ("rules".to_owned(), 0.5);

        let unavailable = classify_with_fallback(
            &DisabledLlm,
            "test",
            &[],
            CompletionOptions::default(),
            parse_label,
            rules,
        )
        .await;
        assert!(unavailable.is_fallback());

        let llm = ScriptedLlm::new([Ok(r#"{"other": 1}"#.to_owned()), Err(LlmError::Timeout)]);
        let wrong_shape =
            classify_with_fallback(&llm, "test", &[], CompletionOptions::default(), parse_label, rules).await;
        assert_eq!(wrong_shape.value, "rules");
        assert!(wrong_shape.is_fallback());
        assert!((wrong_shape.confidence - 0.5).abs() < f64::EPSILON);
    }
}
