use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Ongoing,
    Completed,
    Cancelled,
}

string_column!(SessionStatus);

/// A scheduled meeting of a batch, taught by one faculty member.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Session {
    pub id: u64,
    pub batch_id: u64,
    pub faculty_id: u64,
    pub topic: String,
    #[schema(value_type = String, format = "date-time")]
    pub scheduled_start: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub scheduled_end: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub actual_start_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub actual_end_at: Option<DateTime<Utc>>,
}

pub const SESSION_COLUMNS: &str = "id, batch_id, faculty_id, topic, scheduled_start, scheduled_end, \
     status, actual_start_at, actual_end_at";
