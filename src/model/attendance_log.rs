use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PunchState {
    CheckIn,
    CheckOut,
    Unknown,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogSource {
    Pull,
    Push,
}

string_column!(PunchState, LogSource);

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceLog {
    pub id: u64,
    pub device_id: u64,
    pub user_id: u64,
    pub employee_code: String,
    #[schema(value_type = String, format = "date-time")]
    pub punch_time: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub punch_state: PunchState,
    pub verify_type: Option<String>,
    #[sqlx(try_from = "String")]
    pub source: LogSource,
}

/// A vendor record resolved to a local user, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttendanceLog {
    pub user_id: u64,
    pub employee_code: String,
    pub punch_time: DateTime<Utc>,
    pub punch_state: PunchState,
    pub verify_type: Option<String>,
}
