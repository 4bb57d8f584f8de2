use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::sanitize::{append_within_limit, list_field, text_field};
use super::{require_non_empty, ContentSource, ServiceCore, CRISIS_RESOURCES};
use crate::error::{AppResult, AssessmentError};
use crate::instruments::AssessmentKind;
use crate::llm::{parse_json_completion, CompletionOptions, Message};
use crate::prompts::EXPLANATION_PROMPT;
use crate::risk::SELF_HARM_ITEM;
use crate::scoring::Severity;
use crate::storage::{AssessmentResult, Storage};

/// Which result to explain: a specific id, or the latest of a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainParams {
    pub user_id: String,
    #[serde(default)]
    pub result_id: Option<String>,
    #[serde(default)]
    pub assessment_id: Option<String>,
}

/// Plain-language explanation of one result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentExplanation {
    pub result_id: String,
    pub assessment_id: AssessmentKind,
    pub level: String,
    pub severity: Severity,
    pub summary: String,
    pub interpretation: String,
    pub suggestions: Vec<String>,
    pub when_to_seek_help: String,
    pub source: ContentSource,
}

/// Generates explanations for individual results
#[derive(Clone)]
pub struct ExplanationService {
    core: ServiceCore,
}

impl ExplanationService {
    /// Create a new explanation service
    pub fn new(core: ServiceCore) -> Self {
        Self { core }
    }

    /// Explain a result. Model failures produce the static template.
    pub async fn explain(&self, params: ExplainParams) -> AppResult<AssessmentExplanation> {
        let start = Instant::now();
        require_non_empty("user_id", &params.user_id)?;
        let result = self.resolve(&params).await?;

        let limit = Duration::from_millis(self.core.config().timeouts.explanation_ms);
        let options = CompletionOptions::json().with_temperature(0.4).with_max_tokens(800);
        let completion = self
            .core
            .call_llm("explanation", &result.user_id, build_messages(&result), options, limit)
            .await;

        let explanation = match completion {
            Ok(text) => match parse_json_completion(&text).and_then(|v| from_model(&result, &v)) {
                Some(explanation) => explanation,
                None => {
                    warn!(result_id = %result.id, "Unusable explanation JSON, using fallback");
                    self.core
                        .record_unusable("explanation", &result.user_id, start.elapsed().as_millis() as i64)
                        .await;
                    fallback(&result)
                }
            },
            Err(e) => {
                warn!(result_id = %result.id, error = %e, "Explanation failed, using fallback");
                fallback(&result)
            }
        };

        info!(
            result_id = %result.id,
            source = ?explanation.source,
            latency_ms = start.elapsed().as_millis() as u64,
            "Explanation completed"
        );
        Ok(explanation)
    }

    async fn resolve(&self, params: &ExplainParams) -> AppResult<AssessmentResult> {
        let storage = self.core.storage();

        if let Some(id) = &params.result_id {
            return match storage.get_result(id).await? {
                Some(result) if result.user_id == params.user_id => Ok(result),
                _ => Err(not_found("result_id", id)),
            };
        }

        let Some(assessment_id) = &params.assessment_id else {
            return Err(AssessmentError::Validation {
                field: "result_id".to_string(),
                reason: "either result_id or assessment_id is required".to_string(),
            }
            .into());
        };
        let kind: AssessmentKind = assessment_id.parse()?;
        let mut latest = storage.get_latest_per_type(&params.user_id).await?;
        latest
            .remove(&kind)
            .ok_or_else(|| not_found("assessment_id", assessment_id))
    }
}

fn not_found(field: &str, value: &str) -> crate::error::AppError {
    AssessmentError::Validation {
        field: field.to_string(),
        reason: format!("no assessment result found for {}", value),
    }
    .into()
}

fn build_messages(result: &AssessmentResult) -> Vec<Message> {
    let instrument = result.assessment_id.instrument();
    let mut details = vec![
        format!("Questionnaire: {}", instrument.name),
        format!("Score: {} (range {}-{})", result.score, instrument.score_min(), instrument.score_max()),
        format!("Level: {}", result.level),
        format!("Severity: {}", result.severity),
    ];
    if !crate::scoring::severity_rises_with_score(result.assessment_id) {
        details.push("Higher scores on this questionnaire are healthier.".to_string());
    }
    if self_harm_endorsed(result) {
        details.push("The user endorsed thoughts of self-harm.".to_string());
    }

    vec![
        Message::system(EXPLANATION_PROMPT),
        Message::user(details.join("\n")),
    ]
}

fn self_harm_endorsed(result: &AssessmentResult) -> bool {
    result.responses.get(SELF_HARM_ITEM).is_some_and(|v| *v > 0)
}

/// Merge model output over the template. Returns `None` when the model gave
/// neither a summary nor an interpretation.
fn from_model(result: &AssessmentResult, value: &Value) -> Option<AssessmentExplanation> {
    let summary = text_field(value, "summary");
    let interpretation = text_field(value, "interpretation");
    if summary.is_none() && interpretation.is_none() {
        return None;
    }

    let template = fallback(result);
    let mut when_to_seek_help = text_field(value, "when_to_seek_help").unwrap_or(template.when_to_seek_help);
    if self_harm_endorsed(result) && !when_to_seek_help.contains(CRISIS_RESOURCES) {
        when_to_seek_help = append_within_limit(&when_to_seek_help, CRISIS_RESOURCES);
    }

    Some(AssessmentExplanation {
        summary: summary.unwrap_or(template.summary),
        interpretation: interpretation.unwrap_or(template.interpretation),
        suggestions: list_field(value, "suggestions").unwrap_or(template.suggestions),
        when_to_seek_help,
        source: ContentSource::Ai,
        ..template
    })
}

/// Static explanation built only from the classification.
pub(crate) fn fallback(result: &AssessmentResult) -> AssessmentExplanation {
    let instrument = result.assessment_id.instrument();

    let interpretation = match result.severity {
        Severity::Normal => "This result is in the healthy range. Keep doing what supports you.",
        Severity::Mild => "This result suggests some difficulties that many people experience from time to time.",
        Severity::Moderate => {
            "This result suggests difficulties that are likely affecting daily life and are worth paying attention to."
        }
        Severity::Severe | Severity::Critical => {
            "This result suggests significant difficulties. Talking with a qualified professional is strongly encouraged."
        }
    };

    let suggestions = [
        "Keep a regular sleep and wake schedule",
        "Move your body for a few minutes each day",
        "Stay in touch with someone you trust",
        "Notice and write down what helps on hard days",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let mut when_to_seek_help = if result.severity >= Severity::Severe {
        "Consider contacting a doctor or mental health professional soon to talk about these results.".to_string()
    } else {
        "If these difficulties last more than two weeks or get worse, consider talking with a professional.".to_string()
    };
    if self_harm_endorsed(result) {
        when_to_seek_help = append_within_limit(&when_to_seek_help, CRISIS_RESOURCES);
    }

    AssessmentExplanation {
        result_id: result.id.clone(),
        assessment_id: result.assessment_id,
        level: result.level.clone(),
        severity: result.severity,
        summary: format!(
            "Your {} result is in the \"{}\" range.",
            instrument.name, result.level
        ),
        interpretation: interpretation.to_string(),
        suggestions,
        when_to_seek_help,
        source: ContentSource::Fallback,
    }
}
