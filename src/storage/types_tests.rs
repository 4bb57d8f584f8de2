//! Unit tests for storage record types and builder patterns.

use super::*;
use std::str::FromStr;

// ============================================================================
// AssessmentResult tests
// ============================================================================

#[test]
fn test_result_new_classifies_score() {
    let result = AssessmentResult::new("user-1", AssessmentKind::Phq9, 22.0, BTreeMap::new());
    assert!(!result.id.is_empty());
    assert_eq!(result.user_id, "user-1");
    assert_eq!(result.level, "Severe");
    assert_eq!(result.severity, Severity::Severe);
}

#[test]
fn test_result_ids_are_unique() {
    let a = AssessmentResult::new("u", AssessmentKind::Gad7, 3.0, BTreeMap::new());
    let b = AssessmentResult::new("u", AssessmentKind::Gad7, 3.0, BTreeMap::new());
    assert_ne!(a.id, b.id);
}

#[test]
fn test_result_serializes_wire_ids() {
    let result = AssessmentResult::new("u", AssessmentKind::CdRisc, 30.0, BTreeMap::new());
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["assessment_id"], "cd_risc");
    assert_eq!(json["severity"], "mild");
}

// ============================================================================
// AssessmentSession tests
// ============================================================================

#[test]
fn test_session_new() {
    let session = AssessmentSession::new("user-1", AssessmentKind::Gad7);
    assert_eq!(session.status, SessionStatus::InProgress);
    assert!(session.responses.is_empty());
    assert_eq!(session.remaining(), 7);
}

#[test]
fn test_session_remaining_counts_answers() {
    let mut session = AssessmentSession::new("user-1", AssessmentKind::Who5);
    session.responses.insert("who5_1".to_string(), 3);
    session.responses.insert("who5_2".to_string(), 4);
    assert_eq!(session.remaining(), 3);
}

#[test]
fn test_session_status_round_trip() {
    for status in [SessionStatus::InProgress, SessionStatus::Completed] {
        assert_eq!(SessionStatus::from_str(&status.to_string()).unwrap(), status);
    }
    assert!(SessionStatus::from_str("abandoned").is_err());
}

// ============================================================================
// ConversationMessage tests
// ============================================================================

#[test]
fn test_message_new() {
    let msg = ConversationMessage::new("u", "conv-1", ConversationRole::User, "hello");
    assert_eq!(msg.conversation_id, "conv-1");
    assert_eq!(msg.role, ConversationRole::User);
    assert_eq!(msg.role.to_string(), "user");
    assert_eq!("ASSISTANT".parse::<ConversationRole>().unwrap(), ConversationRole::Assistant);
}

// ============================================================================
// LlmInvocation tests
// ============================================================================

#[test]
fn test_invocation_builders() {
    let ok = LlmInvocation::new("explanation")
        .with_user("u")
        .with_model("gpt-4o-mini")
        .success(120);
    assert!(ok.success);
    assert!(!ok.fallback_used);
    assert_eq!(ok.latency_ms, Some(120));
    assert_eq!(ok.user_id.as_deref(), Some("u"));

    let failed = LlmInvocation::new("chat").fallback("timed out", 60000);
    assert!(!failed.success);
    assert!(failed.fallback_used);
    assert_eq!(failed.error.as_deref(), Some("timed out"));
}
