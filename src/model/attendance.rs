use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    ManualPresent,
}

string_column!(AttendanceStatus);

impl AttendanceStatus {
    pub fn is_manual(self) -> bool {
        self == AttendanceStatus::ManualPresent
    }

    pub fn counts_present(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::ManualPresent)
    }
}

/// Attendance row joined with the student's name for rosters.
#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceEntry {
    pub student_id: u64,
    pub full_name: String,
    #[sqlx(try_from = "String")]
    pub status: AttendanceStatus,
    pub is_manual: bool,
    pub marked_by: Option<u64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub marked_at: Option<DateTime<Utc>>,
}
