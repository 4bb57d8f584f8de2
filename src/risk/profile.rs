use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LatestResults, RiskThresholds, Signals, TraumaLoad};
use crate::instruments::AssessmentKind;
use crate::scoring::Severity;
use crate::storage::AssessmentResult;

/// Summary of one instrument's latest result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymptomSummary {
    pub assessment_id: AssessmentKind,
    pub score: f64,
    pub level: String,
    pub severity: Severity,
    pub assessed_at: DateTime<Utc>,
}

impl From<&AssessmentResult> for SymptomSummary {
    fn from(result: &AssessmentResult) -> Self {
        Self {
            assessment_id: result.assessment_id,
            score: result.score,
            level: result.level.clone(),
            severity: result.severity,
            assessed_at: result.taken_at,
        }
    }
}

/// Trauma is measured by two instruments; the worse one sets the severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraumaSummary {
    pub ace: Option<SymptomSummary>,
    pub pcl5: Option<SymptomSummary>,
    pub severity: Severity,
}

/// Derived snapshot of a user's latest results.
///
/// Recomputed from scratch whenever results change; it is a cache of
/// [`UserAssessmentProfile::from_results`], never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAssessmentProfile {
    pub user_id: String,
    pub depression: Option<SymptomSummary>,
    pub anxiety: Option<SymptomSummary>,
    pub trauma: Option<TraumaSummary>,
    pub resilience: Option<SymptomSummary>,
    pub stress: Option<SymptomSummary>,
    pub wellbeing: Option<SymptomSummary>,
    pub risk_factors: Vec<String>,
    pub completed_assessments: Vec<AssessmentKind>,
    /// Timestamp of the newest contributing result.
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserAssessmentProfile {
    /// Build the profile for `user_id` from their latest results.
    pub fn from_results(user_id: &str, results: &LatestResults, t: &RiskThresholds) -> Self {
        let summary = |kind: AssessmentKind| results.get(&kind).map(SymptomSummary::from);

        let ace = summary(AssessmentKind::Ace);
        let pcl5 = summary(AssessmentKind::Pcl5);
        let trauma = match (&ace, &pcl5) {
            (None, None) => None,
            _ => {
                let severity = ace
                    .iter()
                    .chain(pcl5.iter())
                    .map(|s| s.severity)
                    .max()
                    .unwrap_or(Severity::Normal);
                Some(TraumaSummary {
                    ace,
                    pcl5,
                    severity,
                })
            }
        };

        Self {
            user_id: user_id.to_string(),
            depression: summary(AssessmentKind::Phq9),
            anxiety: summary(AssessmentKind::Gad7),
            trauma,
            resilience: summary(AssessmentKind::CdRisc),
            stress: summary(AssessmentKind::Pss10),
            wellbeing: summary(AssessmentKind::Who5),
            risk_factors: risk_factors(results, t),
            completed_assessments: results.keys().copied().collect(),
            updated_at: results.values().map(|r| r.taken_at).max(),
        }
    }

    /// Profile for a user with no results yet.
    pub fn empty(user_id: &str) -> Self {
        Self::from_results(user_id, &LatestResults::new(), &RiskThresholds::default())
    }

    pub fn has_assessments(&self) -> bool {
        !self.completed_assessments.is_empty()
    }
}

fn risk_factors(results: &LatestResults, t: &RiskThresholds) -> Vec<String> {
    let signals = Signals::from_results(results);
    let mut factors = Vec::new();

    if signals.self_harm_endorsed {
        factors.push("self_harm_thoughts");
    }
    if signals.depression_at(t.crisis_depression) {
        factors.push("severe_depression");
    }
    if signals.anxiety_at(t.crisis_anxiety) {
        factors.push("severe_anxiety");
    }
    if signals.ace.is_some_and(|s| s >= t.trauma_ace_high) {
        factors.push("high_childhood_adversity");
    }
    if signals.pcl5.is_some_and(|s| s >= t.trauma_pcl5_high) {
        factors.push("probable_ptsd");
    }
    if signals.trauma(t) == TraumaLoad::Severe {
        factors.push("severe_trauma_load");
    }
    if signals.low_resilience(t) {
        factors.push("low_resilience");
    }
    if signals.stress_at(t.moderate_stress) {
        factors.push("high_stress");
    }
    if signals.low_wellbeing(t) {
        factors.push("low_wellbeing");
    }

    factors.into_iter().map(String::from).collect()
}
