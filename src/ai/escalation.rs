//! Escalation policy.

use super::intent::Intent;
use crate::repositories::ai::TenantAiSettings;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Reply,
    Escalate { reason: String },
}

impl Decision {
    pub fn is_escalated(&self) -> bool {
        matches!(self, Decision::Escalate { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Reply => None,
            Decision::Escalate { reason } => Some(reason),
        }
    }
}

/// Every rule is evaluated in order; the last matching rule supplies the
/// reason, so a low-confidence reply always reports its confidence.
pub fn decide(settings: &TenantAiSettings, intent: Intent, confidence: f64) -> Decision {
    let mut reason = None;
    if settings.escalate_complaint && intent == Intent::Complaint {
        reason = Some("Complaint detected".to_string());
    }
    if settings.escalate_order && intent == Intent::OrderIntent {
        reason = Some("Order intent detected".to_string());
    }
    if confidence < settings.confidence_threshold {
        reason = Some(format!("Low confidence: {:.0}%", confidence * 100.0));
    }
    match reason {
        Some(reason) => Decision::Escalate { reason },
        None => Decision::Reply,
    }
}
