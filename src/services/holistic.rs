use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::sanitize::{humanize, list_field, text_field};
use super::{require_non_empty, ContentSource, ServiceCore, CRISIS_RESOURCES};
use crate::error::AppResult;
use crate::llm::{parse_json_completion, CompletionOptions, Message};
use crate::prompts::HOLISTIC_ANALYSIS_PROMPT;
use crate::risk::{build_context, AssessmentContext, LatestResults, RiskLevel};
use crate::scoring::Severity;
use crate::storage::{with_retry, OverallAssessment, Storage};

/// Input for holistic analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolisticParams {
    pub user_id: String,
    /// Skip the cache and ask the model again
    #[serde(default)]
    pub force_refresh: bool,
}

/// Integrated analysis across all latest results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolisticAnalysis {
    pub overview: String,
    pub patterns: Vec<String>,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub recommendations: Vec<String>,
    pub risk_level: RiskLevel,
    pub source: ContentSource,
    #[serde(default)]
    pub cached: bool,
    pub generated_at: DateTime<Utc>,
}

/// Cache key for a set of latest results.
///
/// Changes whenever any contributing result is replaced.
pub fn fingerprint(results: &LatestResults) -> String {
    results
        .values()
        .map(|r| r.id.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Generates and caches the cross-instrument analysis
#[derive(Clone)]
pub struct HolisticService {
    core: ServiceCore,
}

impl HolisticService {
    /// Create a new holistic analysis service
    pub fn new(core: ServiceCore) -> Self {
        Self { core }
    }

    /// Analyze a user's latest results, reusing the cache when it is current.
    pub async fn analyze(&self, params: HolisticParams) -> AppResult<HolisticAnalysis> {
        let start = Instant::now();
        require_non_empty("user_id", &params.user_id)?;
        let user_id = params.user_id.as_str();

        let storage = self.core.storage();
        let latest = storage.get_latest_per_type(user_id).await?;
        let context = build_context(user_id, &latest, &self.core.config().risk);
        if latest.is_empty() {
            return Ok(fallback(&context));
        }

        let key = fingerprint(&latest);
        if !params.force_refresh {
            if let Some(cached) = self.cached(user_id, &key).await {
                debug!(user_id, "Holistic analysis served from cache");
                return Ok(cached);
            }
        }

        let limit = Duration::from_millis(self.core.config().timeouts.holistic_ms);
        let options = CompletionOptions::json().with_temperature(0.5).with_max_tokens(1500);
        let completion = self
            .core
            .call_llm("holistic", user_id, build_messages(&latest, &context), options, limit)
            .await;

        let analysis = match completion {
            Ok(text) => match parse_json_completion(&text).and_then(|v| from_model(&context, &v)) {
                Some(analysis) => {
                    self.store(user_id, &key, &analysis).await;
                    analysis
                }
                None => {
                    warn!(user_id, "Unusable holistic JSON, using fallback");
                    self.core
                        .record_unusable("holistic", user_id, start.elapsed().as_millis() as i64)
                        .await;
                    fallback(&context)
                }
            },
            Err(e) => {
                warn!(user_id, error = %e, "Holistic analysis failed, using fallback");
                fallback(&context)
            }
        };

        info!(
            user_id,
            source = ?analysis.source,
            instruments = latest.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Holistic analysis completed"
        );
        Ok(analysis)
    }

    async fn cached(&self, user_id: &str, key: &str) -> Option<HolisticAnalysis> {
        let stored = match self.core.storage().get_overall_assessment(user_id).await {
            Ok(stored) => stored?,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to read holistic cache");
                return None;
            }
        };
        if stored.fingerprint != key {
            return None;
        }
        let mut analysis: HolisticAnalysis = serde_json::from_value(stored.analysis).ok()?;
        analysis.cached = true;
        Some(analysis)
    }

    async fn store(&self, user_id: &str, key: &str, analysis: &HolisticAnalysis) {
        let overall = OverallAssessment {
            user_id: user_id.to_string(),
            fingerprint: key.to_string(),
            analysis: serde_json::to_value(analysis).unwrap_or(Value::Null),
            created_at: analysis.generated_at,
        };
        let policy = self.core.retry_policy();
        let storage = self.core.storage();
        if let Err(e) = with_retry(&policy, "save_overall_assessment", || {
            storage.save_overall_assessment(&overall)
        })
        .await
        {
            warn!(user_id, error = %e, "Failed to cache holistic analysis");
        }
    }
}

fn build_messages(latest: &LatestResults, context: &AssessmentContext) -> Vec<Message> {
    let mut lines = vec!["Latest self-assessment results:".to_string()];
    for result in latest.values() {
        let instrument = result.assessment_id.instrument();
        lines.push(format!(
            "- {}: score {} of {} ({}, {})",
            instrument.name,
            result.score,
            instrument.score_max(),
            result.level,
            result.severity
        ));
    }
    lines.push(format!("Overall risk level: {}", context.risk_level));
    if !context.profile.risk_factors.is_empty() {
        lines.push(format!("Risk factors: {}", context.profile.risk_factors.join(", ")));
    }
    lines.push(format!(
        "Focus areas: {}",
        context.personalized_approach.focus_areas.join(", ")
    ));

    vec![
        Message::system(HOLISTIC_ANALYSIS_PROMPT),
        Message::user(lines.join("\n")),
    ]
}

fn from_model(context: &AssessmentContext, value: &Value) -> Option<HolisticAnalysis> {
    let overview = text_field(value, "overview")?;
    let template = fallback(context);

    let mut recommendations = list_field(value, "recommendations").unwrap_or(template.recommendations);
    if context.risk_level == RiskLevel::Crisis && !recommendations.iter().any(|r| r == CRISIS_RESOURCES) {
        recommendations.insert(0, CRISIS_RESOURCES.to_string());
        recommendations.truncate(super::MAX_LIST_ITEMS);
    }

    Some(HolisticAnalysis {
        overview,
        patterns: list_field(value, "patterns").unwrap_or(template.patterns),
        strengths: list_field(value, "strengths").unwrap_or(template.strengths),
        concerns: list_field(value, "concerns").unwrap_or(template.concerns),
        recommendations,
        source: ContentSource::Ai,
        ..template
    })
}

/// Static analysis built from the context alone.
pub(crate) fn fallback(context: &AssessmentContext) -> HolisticAnalysis {
    let profile = &context.profile;

    let overview = if !profile.has_assessments() {
        "Complete at least one questionnaire to receive an overview of your wellbeing.".to_string()
    } else {
        let tone = match context.risk_level {
            RiskLevel::Low => "Overall, your results look steady.",
            RiskLevel::Moderate => "Your results point to some areas that deserve attention.",
            RiskLevel::High => "Your results point to significant difficulties in several areas.",
            RiskLevel::Crisis => "Your results suggest you may be going through a very hard time right now.",
        };
        format!("{} This overview covers {} questionnaire(s).", tone, profile.completed_assessments.len())
    };

    let summaries = [
        ("Mood", &profile.depression),
        ("Anxiety", &profile.anxiety),
        ("Resilience", &profile.resilience),
        ("Stress", &profile.stress),
        ("Well-being", &profile.wellbeing),
    ];
    let mut patterns: Vec<String> = summaries
        .iter()
        .filter_map(|(label, s)| s.as_ref().map(|s| format!("{}: {}", label, s.level)))
        .collect();
    if let Some(trauma) = &profile.trauma {
        patterns.push(format!("Trauma exposure: {}", trauma.severity));
    }
    patterns.truncate(super::MAX_LIST_ITEMS);

    let strengths: Vec<String> = summaries
        .iter()
        .filter_map(|(label, s)| {
            s.as_ref()
                .filter(|s| s.severity == Severity::Normal)
                .map(|_| format!("{} is in a healthy range", label))
        })
        .take(super::MAX_LIST_ITEMS)
        .collect();

    let concerns: Vec<String> = profile
        .risk_factors
        .iter()
        .map(|f| humanize(f))
        .take(super::MAX_LIST_ITEMS)
        .collect();

    let mut recommendations: Vec<String> = context.recommendations.iter().map(|r| humanize(r)).collect();
    if context.risk_level == RiskLevel::Crisis {
        recommendations.insert(0, CRISIS_RESOURCES.to_string());
    }
    recommendations.truncate(super::MAX_LIST_ITEMS);

    HolisticAnalysis {
        overview,
        patterns,
        strengths,
        concerns,
        recommendations,
        risk_level: context.risk_level,
        source: ContentSource::Fallback,
        cached: false,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::AssessmentKind;
    use crate::risk::RiskThresholds;
    use crate::storage::AssessmentResult;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn latest(items: &[(AssessmentKind, f64)]) -> LatestResults {
        items
            .iter()
            .map(|(k, s)| (*k, AssessmentResult::new("u", *k, *s, BTreeMap::new())))
            .collect()
    }

    #[test]
    fn test_fingerprint_tracks_result_ids() {
        let mut results = latest(&[(AssessmentKind::Phq9, 5.0), (AssessmentKind::Gad7, 5.0)]);
        let before = fingerprint(&results);
        assert_eq!(before, fingerprint(&results.clone()));

        results.insert(
            AssessmentKind::Gad7,
            AssessmentResult::new("u", AssessmentKind::Gad7, 5.0, BTreeMap::new()),
        );
        assert_ne!(before, fingerprint(&results));
    }

    #[test]
    fn test_fallback_for_crisis_leads_with_resources() {
        let results = latest(&[(AssessmentKind::Phq9, 22.0)]);
        let context = build_context("u", &results, &RiskThresholds::default());
        let analysis = fallback(&context);
        assert_eq!(analysis.source, ContentSource::Fallback);
        assert_eq!(analysis.recommendations[0], CRISIS_RESOURCES);
        assert!(analysis.concerns.contains(&"severe depression".to_string()));
    }

    #[test]
    fn test_fallback_lists_strengths() {
        let results = latest(&[(AssessmentKind::Who5, 20.0), (AssessmentKind::Gad7, 2.0)]);
        let context = build_context("u", &results, &RiskThresholds::default());
        let analysis = fallback(&context);
        assert_eq!(analysis.strengths.len(), 2);
        assert_eq!(analysis.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_from_model_requires_overview() {
        let context = build_context("u", &latest(&[(AssessmentKind::Gad7, 8.0)]), &RiskThresholds::default());
        assert!(from_model(&context, &json!({"patterns": ["x"]})).is_none());

        let analysis = from_model(&context, &json!({"overview": "ok", "patterns": ["x"]})).unwrap();
        assert_eq!(analysis.source, ContentSource::Ai);
        assert_eq!(analysis.patterns, vec!["x"]);
        assert!(!analysis.recommendations.is_empty());
    }
}
