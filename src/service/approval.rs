use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::model::change_request::ReviewStatus;

/// Reviewer verdict on a change request or portfolio.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewPayload {
    #[schema(example = false)]
    pub approve: bool,
    #[schema(example = "Dates overlap with final assessment")]
    #[serde(default, alias = "rejectionReason")]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { reason: String },
}

impl Decision {
    pub fn from_payload(payload: &ReviewPayload) -> Result<Self, AppError> {
        if payload.approve {
            return Ok(Decision::Approve);
        }

        match payload.rejection_reason.as_deref().map(str::trim) {
            Some(reason) if !reason.is_empty() => Ok(Decision::Reject {
                reason: reason.to_string(),
            }),
            _ => Err(AppError::validation(
                "rejection_reason is required when rejecting",
            )),
        }
    }

    pub fn status(&self) -> ReviewStatus {
        match self {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Reject { .. } => ReviewStatus::Rejected,
        }
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            Decision::Approve => None,
            Decision::Reject { reason } => Some(reason),
        }
    }
}

pub fn ensure_pending(status: ReviewStatus) -> Result<(), AppError> {
    if status == ReviewStatus::Pending {
        Ok(())
    } else {
        Err(AppError::validation(format!("Request already {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejection_needs_a_reason() {
        let payload: ReviewPayload = serde_json::from_value(json!({"approve": false})).unwrap();
        assert!(matches!(
            Decision::from_payload(&payload),
            Err(AppError::Validation(_))
        ));

        let blank: ReviewPayload =
            serde_json::from_value(json!({"approve": false, "rejection_reason": "  "})).unwrap();
        assert!(Decision::from_payload(&blank).is_err());
    }

    #[test]
    fn camel_case_reason_is_accepted() {
        let payload: ReviewPayload =
            serde_json::from_value(json!({"approve": false, "rejectionReason": "Seat unavailable"}))
                .unwrap();
        let decision = Decision::from_payload(&payload).unwrap();
        assert_eq!(decision.status(), ReviewStatus::Rejected);
        assert_eq!(decision.rejection_reason(), Some("Seat unavailable"));
    }

    #[test]
    fn approval_ignores_reason() {
        let payload: ReviewPayload =
            serde_json::from_value(json!({"approve": true, "rejection_reason": "n/a"})).unwrap();
        let decision = Decision::from_payload(&payload).unwrap();
        assert_eq!(decision, Decision::Approve);
        assert_eq!(decision.rejection_reason(), None);
    }

    #[test]
    fn only_pending_can_be_reviewed() {
        assert!(ensure_pending(ReviewStatus::Pending).is_ok());
        let err = ensure_pending(ReviewStatus::Approved).unwrap_err();
        assert_eq!(err.to_string(), "Request already approved");
    }
}
