use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 3,
    "name": "FS-2026-JAN",
    "course": "Full Stack Development",
    "faculty_id": 7,
    "start_date": "2026-01-05",
    "end_date": "2026-06-30",
    "fee": 45000.0,
    "is_active": true
}))]
pub struct Batch {
    pub id: u64,
    pub name: String,
    pub course: String,
    pub faculty_id: u64,
    #[schema(value_type = String, format = "date")]
    pub start_date: NaiveDate,
    #[schema(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
    pub fee: f64,
    pub is_active: bool,
}

pub const BATCH_COLUMNS: &str = "id, name, course, faculty_id, start_date, end_date, fee, is_active";

/// Enrolment of a student in a batch, joined with the student's name.
#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct BatchStudent {
    pub student_id: u64,
    pub full_name: String,
    #[schema(value_type = String, format = "date-time")]
    pub joined_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date")]
    pub extended_until: Option<NaiveDate>,
}
