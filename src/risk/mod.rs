//! Risk aggregation.
//!
//! Combines the latest result of each assessment type into one risk level and
//! a set of personalization tags. Everything here is a pure function of the
//! input map and a [`RiskThresholds`] table: no clocks, no I/O, no hidden
//! state, so identical input always yields identical output.
//!
//! The overall level is the maximum of every individual-assessment signal and
//! every combination rule. A rule can only raise the level.

mod context;
mod profile;

pub use context::*;
pub use profile::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::instruments::AssessmentKind;
use crate::scoring::{classify, normalize_score, Severity};
use crate::storage::AssessmentResult;

/// Latest result per assessment type.
pub type LatestResults = BTreeMap<AssessmentKind, AssessmentResult>;

/// Overall risk tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Moderate,
    High,
    Crisis,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Moderate => write!(f, "moderate"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Crisis => write!(f, "crisis"),
        }
    }
}

/// Versioned threshold table for risk rules.
///
/// All values are raw instrument scores. `low_*` thresholds apply to
/// higher-is-healthier instruments and match at or below the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub version: String,
    pub crisis_depression: u32,
    pub crisis_anxiety: u32,
    pub moderate_depression: u32,
    pub moderate_anxiety: u32,
    pub joint_depression: u32,
    pub joint_anxiety: u32,
    pub joint_stress: u32,
    pub trauma_ace_high: u32,
    pub trauma_ace_severe: u32,
    pub trauma_pcl5_high: u32,
    pub trauma_pcl5_severe: u32,
    pub moderate_stress: u32,
    pub low_wellbeing: u32,
    pub low_resilience: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            version: "2024-1".to_string(),
            crisis_depression: 15,
            crisis_anxiety: 15,
            moderate_depression: 10,
            moderate_anxiety: 10,
            joint_depression: 5,
            joint_anxiety: 5,
            joint_stress: 14,
            trauma_ace_high: 4,
            trauma_ace_severe: 7,
            trauma_pcl5_high: 33,
            trauma_pcl5_severe: 50,
            moderate_stress: 27,
            low_wellbeing: 7,
            low_resilience: 19,
        }
    }
}

/// Output of [`aggregate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub focus_areas: Vec<String>,
    pub safety_protocols: Vec<String>,
    pub recommended_styles: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Trauma load derived from ACE and PCL-5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TraumaLoad {
    None,
    High,
    Severe,
}

/// Normalized per-domain scores pulled out of the latest results.
#[derive(Debug, Default)]
pub(crate) struct Signals {
    pub depression: Option<u32>,
    pub anxiety: Option<u32>,
    pub ace: Option<u32>,
    pub pcl5: Option<u32>,
    pub resilience: Option<u32>,
    pub stress: Option<u32>,
    pub wellbeing: Option<u32>,
    pub self_harm_endorsed: bool,
}

/// PHQ-9 item asking about thoughts of self-harm.
pub const SELF_HARM_ITEM: &str = "phq9_9";

impl Signals {
    pub(crate) fn from_results(results: &LatestResults) -> Self {
        let mut signals = Signals::default();
        for (kind, result) in results {
            let score = Some(normalize_score(*kind, result.score));
            match kind {
                AssessmentKind::Phq9 => {
                    signals.depression = score;
                    signals.self_harm_endorsed = endorses_self_harm(result);
                }
                AssessmentKind::Gad7 => signals.anxiety = score,
                AssessmentKind::Ace => signals.ace = score,
                AssessmentKind::Pcl5 => signals.pcl5 = score,
                AssessmentKind::CdRisc => signals.resilience = score,
                AssessmentKind::Pss10 => signals.stress = score,
                AssessmentKind::Who5 => signals.wellbeing = score,
            }
        }
        signals
    }

    pub(crate) fn trauma(&self, t: &RiskThresholds) -> TraumaLoad {
        let ace = self.ace.map_or(TraumaLoad::None, |s| {
            if s >= t.trauma_ace_severe {
                TraumaLoad::Severe
            } else if s >= t.trauma_ace_high {
                TraumaLoad::High
            } else {
                TraumaLoad::None
            }
        });
        let pcl5 = self.pcl5.map_or(TraumaLoad::None, |s| {
            if s >= t.trauma_pcl5_severe {
                TraumaLoad::Severe
            } else if s >= t.trauma_pcl5_high {
                TraumaLoad::High
            } else {
                TraumaLoad::None
            }
        });
        ace.max(pcl5)
    }

    fn at_least(value: Option<u32>, threshold: u32) -> bool {
        value.is_some_and(|v| v >= threshold)
    }

    fn at_most(value: Option<u32>, threshold: u32) -> bool {
        value.is_some_and(|v| v <= threshold)
    }

    pub(crate) fn depression_at(&self, threshold: u32) -> bool {
        Self::at_least(self.depression, threshold)
    }

    pub(crate) fn anxiety_at(&self, threshold: u32) -> bool {
        Self::at_least(self.anxiety, threshold)
    }

    pub(crate) fn stress_at(&self, threshold: u32) -> bool {
        Self::at_least(self.stress, threshold)
    }

    pub(crate) fn low_resilience(&self, t: &RiskThresholds) -> bool {
        Self::at_most(self.resilience, t.low_resilience)
    }

    pub(crate) fn low_wellbeing(&self, t: &RiskThresholds) -> bool {
        Self::at_most(self.wellbeing, t.low_wellbeing)
    }
}

fn endorses_self_harm(result: &AssessmentResult) -> bool {
    result
        .responses
        .get(SELF_HARM_ITEM)
        .is_some_and(|value| *value > 0)
}

/// Risk signal carried by one result on its own.
pub fn individual_signal(result: &AssessmentResult, t: &RiskThresholds) -> RiskLevel {
    let kind = result.assessment_id;
    let score = normalize_score(kind, result.score);

    match kind {
        AssessmentKind::Phq9 => {
            if score >= t.crisis_depression || endorses_self_harm(result) {
                RiskLevel::Crisis
            } else if score >= t.moderate_depression {
                RiskLevel::Moderate
            } else {
                RiskLevel::Low
            }
        }
        AssessmentKind::Gad7 => {
            if score >= t.crisis_anxiety {
                RiskLevel::Crisis
            } else if score >= t.moderate_anxiety {
                RiskLevel::Moderate
            } else {
                RiskLevel::Low
            }
        }
        AssessmentKind::Ace => {
            if score >= t.trauma_ace_severe {
                RiskLevel::High
            } else if score >= t.trauma_ace_high {
                RiskLevel::Moderate
            } else {
                RiskLevel::Low
            }
        }
        AssessmentKind::Pcl5 => {
            if score >= t.trauma_pcl5_severe {
                RiskLevel::High
            } else if score >= t.trauma_pcl5_high {
                RiskLevel::Moderate
            } else {
                RiskLevel::Low
            }
        }
        AssessmentKind::CdRisc if score <= t.low_resilience => RiskLevel::Moderate,
        AssessmentKind::Pss10 if score >= t.moderate_stress => RiskLevel::Moderate,
        AssessmentKind::Who5 if score <= t.low_wellbeing => RiskLevel::Moderate,
        _ => RiskLevel::Low,
    }
}

fn combined_signal(signals: &Signals, t: &RiskThresholds) -> RiskLevel {
    let trauma = signals.trauma(t);

    let high = (trauma >= TraumaLoad::High && signals.depression_at(t.moderate_depression))
        || (trauma >= TraumaLoad::High && signals.anxiety_at(t.moderate_anxiety))
        || trauma == TraumaLoad::Severe;
    if high {
        return RiskLevel::High;
    }

    let joint = [
        signals.depression_at(t.joint_depression),
        signals.anxiety_at(t.joint_anxiety),
        signals.stress_at(t.joint_stress),
    ]
    .iter()
    .filter(|hit| **hit)
    .count();
    if joint >= 2 {
        return RiskLevel::Moderate;
    }

    RiskLevel::Low
}

fn push_tag(tags: &mut Vec<String>, tag: &str) {
    if !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
    }
}

/// Compute the overall risk level and personalization tags.
pub fn aggregate(results: &LatestResults, t: &RiskThresholds) -> RiskAssessment {
    let signals = Signals::from_results(results);

    let individual = results
        .values()
        .map(|r| individual_signal(r, t))
        .max()
        .unwrap_or_default();

    // Crisis short-circuits the combination rules.
    let risk_level = if individual == RiskLevel::Crisis {
        RiskLevel::Crisis
    } else {
        individual.max(combined_signal(&signals, t))
    };

    let trauma = signals.trauma(t) >= TraumaLoad::High;
    let resilience_band = results
        .get(&AssessmentKind::CdRisc)
        .map(|r| classify(AssessmentKind::CdRisc, r.score).severity);
    let wellbeing_band = results
        .get(&AssessmentKind::Who5)
        .map(|r| classify(AssessmentKind::Who5, r.score).severity);

    let mut focus_areas = Vec::new();
    if signals.depression_at(t.joint_depression) {
        push_tag(&mut focus_areas, "mood_improvement");
    }
    if signals.depression_at(t.moderate_depression) {
        push_tag(&mut focus_areas, "behavioral_activation");
    }
    if signals.anxiety_at(t.joint_anxiety) {
        push_tag(&mut focus_areas, "anxiety_management");
    }
    if trauma {
        push_tag(&mut focus_areas, "trauma_processing");
        push_tag(&mut focus_areas, "safety_building");
    }
    if signals.low_resilience(t) {
        push_tag(&mut focus_areas, "resilience_building");
    }
    if signals.stress_at(t.joint_stress) {
        push_tag(&mut focus_areas, "stress_management");
    }
    if wellbeing_band.is_some_and(|s| s > Severity::Normal) {
        push_tag(&mut focus_areas, "wellbeing_enhancement");
    }
    if focus_areas.is_empty() {
        push_tag(&mut focus_areas, "general_wellness");
        push_tag(&mut focus_areas, "emotional_awareness");
    }

    let mut safety_protocols = Vec::new();
    match risk_level {
        RiskLevel::Crisis => {
            push_tag(&mut safety_protocols, "suicide_prevention");
            push_tag(&mut safety_protocols, "immediate_professional_help");
            push_tag(&mut safety_protocols, "crisis_resources");
        }
        RiskLevel::High => {
            push_tag(&mut safety_protocols, "professional_referral");
            push_tag(&mut safety_protocols, "regular_check_ins");
        }
        RiskLevel::Moderate => push_tag(&mut safety_protocols, "symptom_monitoring"),
        RiskLevel::Low => {}
    }
    if trauma {
        push_tag(&mut safety_protocols, "trauma_safety_planning");
    }

    let mut recommended_styles = Vec::new();
    if risk_level == RiskLevel::Crisis {
        push_tag(&mut recommended_styles, "crisis_intervention");
    }
    if trauma {
        push_tag(&mut recommended_styles, "trauma_informed_care");
    }
    if signals.depression_at(t.joint_depression) {
        push_tag(&mut recommended_styles, "cognitive_behavioral");
    }
    if signals.anxiety_at(t.joint_anxiety) {
        push_tag(&mut recommended_styles, "mindfulness_based");
    }
    if resilience_band == Some(Severity::Normal) {
        push_tag(&mut recommended_styles, "strengths_based");
    }
    if recommended_styles.is_empty() {
        push_tag(&mut recommended_styles, "supportive_listening");
    }

    let recommendations = match risk_level {
        RiskLevel::Crisis => vec!["contact_crisis_line", "seek_immediate_professional_help"],
        RiskLevel::High => vec!["schedule_professional_consultation", "structured_self_help"],
        RiskLevel::Moderate => vec!["consider_professional_support", "guided_self_help"],
        RiskLevel::Low => vec!["general_self_care", "wellness_resources"],
    }
    .into_iter()
    .map(String::from)
    .collect();

    RiskAssessment {
        risk_level,
        focus_areas,
        safety_protocols,
        recommended_styles,
        recommendations,
    }
}

/// Reduce any number of results to the newest one per type.
///
/// Later submissions supersede earlier ones; ties keep the first seen.
pub fn latest_by_kind(results: impl IntoIterator<Item = AssessmentResult>) -> LatestResults {
    let mut latest = LatestResults::new();
    for result in results {
        match latest.get(&result.assessment_id) {
            Some(existing) if existing.taken_at >= result.taken_at => {}
            _ => {
                latest.insert(result.assessment_id, result);
            }
        }
    }
    latest
}
