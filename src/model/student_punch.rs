use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use utoipa::ToSchema;

/// One break inside a punch day; `end_time` is `None` while the break is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BreakSegment {
    #[schema(value_type = String, format = "date-time")]
    pub start_time: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub end_time: Option<DateTime<Utc>>,
    #[schema(example = "lunch")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct StudentPunch {
    pub id: u64,
    pub user_id: u64,
    #[schema(value_type = String, format = "date")]
    pub punch_date: NaiveDate,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub punch_in_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub punch_out_at: Option<DateTime<Utc>>,
    pub punch_in_photo: Option<String>,
    pub punch_out_photo: Option<String>,
    pub fingerprint_token: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[schema(value_type = Vec<BreakSegment>)]
    pub breaks: Json<Vec<BreakSegment>>,
    #[schema(example = 8.5)]
    pub effective_working_hours: Option<f64>,
}

pub const PUNCH_COLUMNS: &str = "id, user_id, punch_date, punch_in_at, punch_out_at, punch_in_photo, \
     punch_out_photo, fingerprint_token, latitude, longitude, breaks, effective_working_hours";
