use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeRequestKind {
    Leave,
    BatchChange,
    Extension,
}

/// Review state shared by change requests and portfolios.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

string_column!(ChangeRequestKind, ReviewStatus);

/// Typed payload of a change request, stored as tagged JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeRequestDetails {
    Leave {
        #[schema(value_type = String, format = "date", example = "2026-02-10")]
        start_date: NaiveDate,
        #[schema(value_type = String, format = "date", example = "2026-02-12")]
        end_date: NaiveDate,
        reason: String,
    },
    BatchChange {
        from_batch_id: u64,
        to_batch_id: u64,
        reason: String,
    },
    Extension {
        batch_id: u64,
        #[schema(value_type = String, format = "date", example = "2026-08-31")]
        requested_until: NaiveDate,
        reason: String,
    },
}

impl ChangeRequestDetails {
    pub fn kind(&self) -> ChangeRequestKind {
        match self {
            ChangeRequestDetails::Leave { .. } => ChangeRequestKind::Leave,
            ChangeRequestDetails::BatchChange { .. } => ChangeRequestKind::BatchChange,
            ChangeRequestDetails::Extension { .. } => ChangeRequestKind::Extension,
        }
    }

    /// Shape checks that need no database access.
    pub fn validate(&self) -> Result<(), AppError> {
        let reason = match self {
            ChangeRequestDetails::Leave {
                start_date,
                end_date,
                reason,
            } => {
                if start_date > end_date {
                    return Err(AppError::validation("start_date cannot be after end_date"));
                }
                reason
            }
            ChangeRequestDetails::BatchChange {
                from_batch_id,
                to_batch_id,
                reason,
            } => {
                if from_batch_id == to_batch_id {
                    return Err(AppError::validation(
                        "from_batch_id and to_batch_id must differ",
                    ));
                }
                reason
            }
            ChangeRequestDetails::Extension { reason, .. } => reason,
        };

        if reason.trim().is_empty() {
            return Err(AppError::validation("reason is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct ChangeRequest {
    pub id: u64,
    pub requester_id: u64,
    #[sqlx(try_from = "String")]
    pub kind: ChangeRequestKind,
    #[schema(value_type = ChangeRequestDetails)]
    pub details: Json<ChangeRequestDetails>,
    #[sqlx(try_from = "String")]
    pub status: ReviewStatus,
    pub reviewed_by: Option<u64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const CHANGE_REQUEST_COLUMNS: &str = "id, requester_id, kind, details, status, reviewed_by, \
     reviewed_at, rejection_reason, created_at";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn details_are_tagged_by_kind() {
        let details: ChangeRequestDetails = serde_json::from_value(json!({
            "kind": "batch_change",
            "from_batch_id": 1,
            "to_batch_id": 2,
            "reason": "Evening timing suits my job"
        }))
        .unwrap();
        assert_eq!(details.kind(), ChangeRequestKind::BatchChange);
        assert!(details.validate().is_ok());
    }

    #[test]
    fn leave_dates_must_be_ordered() {
        let details = ChangeRequestDetails::Leave {
            start_date: NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            reason: "family".into(),
        };
        assert!(matches!(details.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn same_batch_change_and_blank_reason_rejected() {
        let same = ChangeRequestDetails::BatchChange {
            from_batch_id: 4,
            to_batch_id: 4,
            reason: "x".into(),
        };
        assert!(same.validate().is_err());

        let blank = ChangeRequestDetails::Extension {
            batch_id: 4,
            requested_until: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            reason: "   ".into(),
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let parsed = serde_json::from_value::<ChangeRequestDetails>(json!({
            "kind": "refund",
            "reason": "x"
        }));
        assert!(parsed.is_err());
    }
}
