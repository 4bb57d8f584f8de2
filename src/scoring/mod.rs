//! Severity classification.
//!
//! Maps a raw questionnaire score to a named level and a severity band using
//! ordered, inclusive threshold tables. Each table covers its instrument's full
//! score range with no gaps or overlaps; for CD-RISC and WHO-5 the table runs
//! from worst to best because higher scores are healthier.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ScoringResult;
use crate::instruments::{AssessmentKind, Polarity};

/// Clinical severity band shared across instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Mild,
    Moderate,
    Severe,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(Severity::Normal),
            "mild" => Ok(Severity::Mild),
            "moderate" => Ok(Severity::Moderate),
            "severe" => Ok(Severity::Severe),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// One inclusive score band.
#[derive(Debug, Clone, Copy)]
pub struct Band {
    pub min: u32,
    pub max: u32,
    pub level: &'static str,
    pub severity: Severity,
}

const fn band(min: u32, max: u32, level: &'static str, severity: Severity) -> Band {
    Band {
        min,
        max,
        level,
        severity,
    }
}

static PHQ9_BANDS: [Band; 5] = [
    band(0, 4, "Minimal", Severity::Normal),
    band(5, 9, "Mild", Severity::Mild),
    band(10, 14, "Moderate", Severity::Moderate),
    band(15, 19, "Moderately severe", Severity::Severe),
    band(20, 27, "Severe", Severity::Severe),
];

static GAD7_BANDS: [Band; 4] = [
    band(0, 4, "Minimal", Severity::Normal),
    band(5, 9, "Mild", Severity::Mild),
    band(10, 14, "Moderate", Severity::Moderate),
    band(15, 21, "Severe", Severity::Severe),
];

static ACE_BANDS: [Band; 4] = [
    band(0, 0, "No reported adversity", Severity::Normal),
    band(1, 3, "Some adversity", Severity::Mild),
    band(4, 6, "High adversity", Severity::Severe),
    band(7, 10, "Very high adversity", Severity::Critical),
];

static CD_RISC_BANDS: [Band; 4] = [
    band(0, 19, "Very low resilience", Severity::Severe),
    band(20, 25, "Low resilience", Severity::Moderate),
    band(26, 31, "Moderate resilience", Severity::Mild),
    band(32, 40, "High resilience", Severity::Normal),
];

static PSS10_BANDS: [Band; 3] = [
    band(0, 13, "Low stress", Severity::Normal),
    band(14, 26, "Moderate stress", Severity::Moderate),
    band(27, 40, "High stress", Severity::Severe),
];

static WHO5_BANDS: [Band; 3] = [
    band(0, 7, "Very low well-being", Severity::Severe),
    band(8, 12, "Low well-being", Severity::Moderate),
    band(13, 25, "Good well-being", Severity::Normal),
];

static PCL5_BANDS: [Band; 4] = [
    band(0, 20, "Minimal", Severity::Normal),
    band(21, 32, "Subthreshold symptoms", Severity::Mild),
    band(33, 49, "Probable PTSD", Severity::Severe),
    band(50, 80, "Severe PTSD symptoms", Severity::Critical),
];

/// Ordered band table for an instrument.
pub fn bands(kind: AssessmentKind) -> &'static [Band] {
    match kind {
        AssessmentKind::Phq9 => &PHQ9_BANDS,
        AssessmentKind::Gad7 => &GAD7_BANDS,
        AssessmentKind::Ace => &ACE_BANDS,
        AssessmentKind::CdRisc => &CD_RISC_BANDS,
        AssessmentKind::Pss10 => &PSS10_BANDS,
        AssessmentKind::Who5 => &WHO5_BANDS,
        AssessmentKind::Pcl5 => &PCL5_BANDS,
    }
}

/// Result of classifying one score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub level: String,
    pub severity: Severity,
}

/// Bring a raw score into the instrument's integral range.
///
/// Out-of-range and non-finite values are a caller bug; they are clamped and
/// logged rather than rejected so downstream aggregation stays total.
pub fn normalize_score(kind: AssessmentKind, raw_score: f64) -> u32 {
    let instrument = kind.instrument();
    let (min, max) = (instrument.score_min(), instrument.score_max());

    if !raw_score.is_finite() {
        warn!(assessment = %kind, score = raw_score, "Non-finite score, clamping to minimum");
        return min;
    }

    let rounded = raw_score.round();
    if rounded < f64::from(min) || rounded > f64::from(max) {
        warn!(
            assessment = %kind,
            score = raw_score,
            min,
            max,
            "Score outside instrument range, clamping"
        );
    }
    rounded.clamp(f64::from(min), f64::from(max)) as u32
}

/// Classify a raw score for the given instrument.
pub fn classify(kind: AssessmentKind, raw_score: f64) -> Classification {
    let score = normalize_score(kind, raw_score);
    let table = bands(kind);
    let matched = table
        .iter()
        .find(|b| score >= b.min && score <= b.max)
        // Tables cover the full range; the last band is unreachable fallback.
        .unwrap_or(&table[table.len() - 1]);

    Classification {
        level: matched.level.to_string(),
        severity: matched.severity,
    }
}

/// Classify using a string identifier such as `"phq9"` or `"GAD-7"`.
pub fn classify_by_id(assessment_id: &str, raw_score: f64) -> ScoringResult<Classification> {
    let kind = assessment_id.parse::<AssessmentKind>()?;
    Ok(classify(kind, raw_score))
}

/// Whether severity must rise with the raw score for this instrument.
pub fn severity_rises_with_score(kind: AssessmentKind) -> bool {
    kind.instrument().polarity == Polarity::HigherIsWorse
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_cover_range_without_gaps() {
        for kind in AssessmentKind::ALL {
            let instrument = kind.instrument();
            let table = bands(kind);
            assert_eq!(table[0].min, instrument.score_min(), "{kind} start");
            assert_eq!(
                table[table.len() - 1].max,
                instrument.score_max(),
                "{kind} end"
            );
            for pair in table.windows(2) {
                assert!(pair[0].min <= pair[0].max, "{kind} band inverted");
                assert_eq!(pair[0].max + 1, pair[1].min, "{kind} gap or overlap");
            }
        }
    }

    #[test]
    fn test_phq9_boundaries() {
        assert_eq!(classify(AssessmentKind::Phq9, 4.0).level, "Minimal");
        assert_eq!(classify(AssessmentKind::Phq9, 5.0).level, "Mild");
        assert_eq!(classify(AssessmentKind::Phq9, 10.0).level, "Moderate");
        assert_eq!(classify(AssessmentKind::Phq9, 15.0).level, "Moderately severe");
        assert_eq!(classify(AssessmentKind::Phq9, 20.0).level, "Severe");
    }

    #[test]
    fn test_phq9_22_is_severe() {
        let c = classify(AssessmentKind::Phq9, 22.0);
        assert_eq!(c.severity, Severity::Severe);
        assert_eq!(c.level, "Severe");
    }

    #[test]
    fn test_inverted_polarity() {
        assert_eq!(classify(AssessmentKind::CdRisc, 38.0).severity, Severity::Normal);
        assert_eq!(classify(AssessmentKind::CdRisc, 10.0).severity, Severity::Severe);
        assert_eq!(classify(AssessmentKind::Who5, 20.0).severity, Severity::Normal);
        assert_eq!(classify(AssessmentKind::Who5, 5.0).severity, Severity::Severe);
        assert!(!severity_rises_with_score(AssessmentKind::Who5));
        assert!(severity_rises_with_score(AssessmentKind::Gad7));
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(normalize_score(AssessmentKind::Gad7, 40.0), 21);
        assert_eq!(normalize_score(AssessmentKind::Gad7, -3.0), 0);
        assert_eq!(normalize_score(AssessmentKind::Gad7, f64::NAN), 0);
        assert_eq!(classify(AssessmentKind::Gad7, 99.0).severity, Severity::Severe);
    }

    #[test]
    fn test_fractional_scores_round() {
        assert_eq!(normalize_score(AssessmentKind::Phq9, 9.6), 10);
        assert_eq!(classify(AssessmentKind::Phq9, 9.4).level, "Mild");
    }

    #[test]
    fn test_classify_by_id() {
        let c = classify_by_id("GAD-7", 12.0).unwrap();
        assert_eq!(c.severity, Severity::Moderate);
        assert!(classify_by_id("hamd", 12.0).is_err());
    }

    #[test]
    fn test_severity_ordering_and_parsing() {
        assert!(Severity::Critical > Severity::Severe);
        assert!(Severity::Normal < Severity::Mild);
        assert_eq!("SEVERE".parse::<Severity>().unwrap(), Severity::Severe);
        assert!("unknown".parse::<Severity>().is_err());
    }
}
