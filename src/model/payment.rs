use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Upi,
}

string_column!(PaymentMethod);

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 1,
    "student_id": 12,
    "batch_id": 3,
    "amount": 15000.0,
    "method": "upi",
    "reference": "UPI-88812",
    "paid_at": "2026-01-10T10:30:00Z",
    "recorded_by": 2,
    "note": "First instalment"
}))]
pub struct Payment {
    pub id: u64,
    pub student_id: u64,
    pub batch_id: Option<u64>,
    pub amount: f64,
    #[sqlx(try_from = "String")]
    pub method: PaymentMethod,
    pub reference: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub paid_at: DateTime<Utc>,
    pub recorded_by: u64,
    pub note: Option<String>,
}

pub const PAYMENT_COLUMNS: &str =
    "id, student_id, batch_id, amount, method, reference, paid_at, recorded_by, note";
