use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use utoipa::ToSchema;

use crate::model::change_request::ReviewStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PortfolioProject {
    #[schema(example = "Library management system")]
    pub title: String,
    #[schema(example = "https://github.com/asha/library")]
    pub url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct Portfolio {
    pub id: u64,
    pub student_id: u64,
    pub title: String,
    pub summary: Option<String>,
    #[schema(value_type = Vec<String>)]
    pub skills: Json<Vec<String>>,
    #[schema(value_type = Vec<PortfolioProject>)]
    pub projects: Json<Vec<PortfolioProject>>,
    #[sqlx(try_from = "String")]
    pub status: ReviewStatus,
    pub reviewed_by: Option<u64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

pub const PORTFOLIO_COLUMNS: &str = "id, student_id, title, summary, skills, projects, status, \
     reviewed_by, reviewed_at, rejection_reason, updated_at";
