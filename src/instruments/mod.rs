//! Questionnaire definitions.
//!
//! Pure data: item ids, per-item response ranges, reverse-scored items,
//! total score range and polarity for every supported instrument. Used to
//! validate submitted responses and turn them into a raw score before the
//! classifier sees it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AssessmentError, ScoringResult};

/// Supported questionnaire types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssessmentKind {
    /// Patient Health Questionnaire, depression (9 items, 0-3).
    #[serde(rename = "phq9")]
    Phq9,
    /// Generalized Anxiety Disorder scale (7 items, 0-3).
    #[serde(rename = "gad7")]
    Gad7,
    /// Adverse Childhood Experiences (10 yes/no items).
    #[serde(rename = "ace")]
    Ace,
    /// Connor-Davidson Resilience Scale, 10-item form (0-4).
    #[serde(rename = "cd_risc")]
    CdRisc,
    /// Perceived Stress Scale (10 items, 0-4).
    #[serde(rename = "pss10")]
    Pss10,
    /// WHO-5 Well-Being Index (5 items, 0-5).
    #[serde(rename = "who5")]
    Who5,
    /// PTSD Checklist for DSM-5 (20 items, 0-4).
    #[serde(rename = "pcl5")]
    Pcl5,
}

/// Symptom domain an instrument contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Depression,
    Anxiety,
    Trauma,
    Resilience,
    Stress,
    Wellbeing,
}

/// Which direction of the raw score is clinically worse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    HigherIsWorse,
    HigherIsHealthier,
}

impl AssessmentKind {
    /// All supported kinds in catalogue order.
    pub const ALL: [AssessmentKind; 7] = [
        AssessmentKind::Phq9,
        AssessmentKind::Gad7,
        AssessmentKind::Ace,
        AssessmentKind::CdRisc,
        AssessmentKind::Pss10,
        AssessmentKind::Who5,
        AssessmentKind::Pcl5,
    ];

    /// Stable identifier used in storage and tool arguments.
    pub fn id(self) -> &'static str {
        match self {
            AssessmentKind::Phq9 => "phq9",
            AssessmentKind::Gad7 => "gad7",
            AssessmentKind::Ace => "ace",
            AssessmentKind::CdRisc => "cd_risc",
            AssessmentKind::Pss10 => "pss10",
            AssessmentKind::Who5 => "who5",
            AssessmentKind::Pcl5 => "pcl5",
        }
    }

    pub fn instrument(self) -> &'static Instrument {
        match self {
            AssessmentKind::Phq9 => &PHQ9,
            AssessmentKind::Gad7 => &GAD7,
            AssessmentKind::Ace => &ACE,
            AssessmentKind::CdRisc => &CD_RISC,
            AssessmentKind::Pss10 => &PSS10,
            AssessmentKind::Who5 => &WHO5,
            AssessmentKind::Pcl5 => &PCL5,
        }
    }
}

impl fmt::Display for AssessmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AssessmentKind {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "phq9" | "phq_9" => Ok(AssessmentKind::Phq9),
            "gad7" | "gad_7" => Ok(AssessmentKind::Gad7),
            "ace" => Ok(AssessmentKind::Ace),
            "cd_risc" | "cdrisc" | "cd_risc_10" => Ok(AssessmentKind::CdRisc),
            "pss10" | "pss_10" => Ok(AssessmentKind::Pss10),
            "who5" | "who_5" => Ok(AssessmentKind::Who5),
            "pcl5" | "pcl_5" => Ok(AssessmentKind::Pcl5),
            _ => Err(AssessmentError::UnknownInstrument {
                assessment_id: s.to_string(),
            }),
        }
    }
}

/// Static definition of one questionnaire.
#[derive(Debug)]
pub struct Instrument {
    pub kind: AssessmentKind,
    pub name: &'static str,
    pub domain: Domain,
    pub polarity: Polarity,
    pub item_count: u8,
    pub item_min: u8,
    pub item_max: u8,
    /// 1-based item numbers scored as `item_min + item_max - value`.
    pub reverse_scored: &'static [u8],
}

static PHQ9: Instrument = Instrument {
    kind: AssessmentKind::Phq9,
    name: "PHQ-9",
    domain: Domain::Depression,
    polarity: Polarity::HigherIsWorse,
    item_count: 9,
    item_min: 0,
    item_max: 3,
    reverse_scored: &[],
};

static GAD7: Instrument = Instrument {
    kind: AssessmentKind::Gad7,
    name: "GAD-7",
    domain: Domain::Anxiety,
    polarity: Polarity::HigherIsWorse,
    item_count: 7,
    item_min: 0,
    item_max: 3,
    reverse_scored: &[],
};

static ACE: Instrument = Instrument {
    kind: AssessmentKind::Ace,
    name: "ACE",
    domain: Domain::Trauma,
    polarity: Polarity::HigherIsWorse,
    item_count: 10,
    item_min: 0,
    item_max: 1,
    reverse_scored: &[],
};

static CD_RISC: Instrument = Instrument {
    kind: AssessmentKind::CdRisc,
    name: "CD-RISC-10",
    domain: Domain::Resilience,
    polarity: Polarity::HigherIsHealthier,
    item_count: 10,
    item_min: 0,
    item_max: 4,
    reverse_scored: &[],
};

// Items 4, 5, 7 and 8 are positively worded.
static PSS10: Instrument = Instrument {
    kind: AssessmentKind::Pss10,
    name: "PSS-10",
    domain: Domain::Stress,
    polarity: Polarity::HigherIsWorse,
    item_count: 10,
    item_min: 0,
    item_max: 4,
    reverse_scored: &[4, 5, 7, 8],
};

static WHO5: Instrument = Instrument {
    kind: AssessmentKind::Who5,
    name: "WHO-5",
    domain: Domain::Wellbeing,
    polarity: Polarity::HigherIsHealthier,
    item_count: 5,
    item_min: 0,
    item_max: 5,
    reverse_scored: &[],
};

static PCL5: Instrument = Instrument {
    kind: AssessmentKind::Pcl5,
    name: "PCL-5",
    domain: Domain::Trauma,
    polarity: Polarity::HigherIsWorse,
    item_count: 20,
    item_min: 0,
    item_max: 4,
    reverse_scored: &[],
};

impl Instrument {
    /// Lowest possible total score.
    pub fn score_min(&self) -> u32 {
        u32::from(self.item_min) * u32::from(self.item_count)
    }

    /// Highest possible total score.
    pub fn score_max(&self) -> u32 {
        u32::from(self.item_max) * u32::from(self.item_count)
    }

    /// Question id for a 1-based item number, e.g. `phq9_9`.
    pub fn item_id(&self, number: u8) -> String {
        format!("{}_{}", self.kind.id(), number)
    }

    /// All question ids in order.
    pub fn item_ids(&self) -> Vec<String> {
        (1..=self.item_count).map(|n| self.item_id(n)).collect()
    }

    /// Only the canonical spelling matches; `phq9_09` is not item 9.
    fn item_number(&self, question_id: &str) -> Option<u8> {
        (1..=self.item_count).find(|n| self.item_id(*n) == question_id)
    }

    /// Check ids and values without requiring every item to be present.
    pub fn validate_partial(&self, responses: &BTreeMap<String, i64>) -> ScoringResult<()> {
        for (question_id, value) in responses {
            if self.item_number(question_id).is_none() {
                return Err(AssessmentError::Validation {
                    field: question_id.clone(),
                    reason: format!("not a {} question", self.name),
                });
            }
            let (min, max) = (i64::from(self.item_min), i64::from(self.item_max));
            if *value < min || *value > max {
                return Err(AssessmentError::Validation {
                    field: question_id.clone(),
                    reason: format!("value {} outside {}..={}", value, min, max),
                });
            }
        }
        Ok(())
    }

    /// Validate a complete submission and compute its raw total.
    pub fn score(&self, responses: &BTreeMap<String, i64>) -> ScoringResult<u32> {
        self.validate_partial(responses)?;

        let mut total = 0u32;
        for number in 1..=self.item_count {
            let id = self.item_id(number);
            let value = responses
                .get(&id)
                .copied()
                .ok_or_else(|| AssessmentError::Validation {
                    field: id.clone(),
                    reason: "missing response".to_string(),
                })?;
            // validate_partial guarantees item_min <= value <= item_max
            let value = value as u32;
            total += if self.reverse_scored.contains(&number) {
                u32::from(self.item_min) + u32::from(self.item_max) - value
            } else {
                value
            };
        }
        Ok(total)
    }
}

/// Serializable summary of an instrument for tool listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub id: String,
    pub name: String,
    pub domain: Domain,
    pub polarity: Polarity,
    pub question_ids: Vec<String>,
    pub item_range: (u8, u8),
    pub score_range: (u32, u32),
}

impl From<&Instrument> for InstrumentInfo {
    fn from(instrument: &Instrument) -> Self {
        Self {
            id: instrument.kind.id().to_string(),
            name: instrument.name.to_string(),
            domain: instrument.domain,
            polarity: instrument.polarity,
            question_ids: instrument.item_ids(),
            item_range: (instrument.item_min, instrument.item_max),
            score_range: (instrument.score_min(), instrument.score_max()),
        }
    }
}

/// Return all registered instruments.
pub fn all_instruments() -> Vec<&'static Instrument> {
    AssessmentKind::ALL.iter().map(|k| k.instrument()).collect()
}
