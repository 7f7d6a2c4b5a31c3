use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Public view of a `users` row (never carries the password hash).
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 12,
    "username": "asha.k",
    "role_id": 5,
    "full_name": "Asha K",
    "email": "asha@academy.test",
    "phone": "+919800000000",
    "biometric_code": "STU-0012",
    "fingerprint_id": null,
    "is_active": true,
    "last_login_at": null,
    "created_at": "2026-01-01T00:00:00Z"
}))]
pub struct User {
    pub id: u64,
    pub username: String,
    pub role_id: u8,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub biometric_code: Option<String>,
    pub fingerprint_id: Option<String>,
    pub is_active: bool,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const USER_COLUMNS: &str = "id, username, role_id, full_name, email, phone, biometric_code, \
     fingerprint_id, is_active, last_login_at, created_at";
