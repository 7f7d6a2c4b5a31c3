use crate::{
    api::{academy_offset, batches::find_batch, local_day_bounds, users::ensure_role},
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::{
        payment::{PAYMENT_COLUMNS, Payment, PaymentMethod},
        role::Role,
    },
    utils::{
        db_utils::{Filter, SqlValue, fetch_page},
        response::{self, Page},
    },
};
use actix_web::{HttpResponse, web};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePayment {
    #[schema(example = 12)]
    pub student_id: u64,
    #[schema(example = 3)]
    pub batch_id: Option<u64>,
    #[schema(example = 15000.0)]
    pub amount: f64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    /// Defaults to now.
    #[schema(value_type = Option<String>, format = "date-time")]
    pub paid_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl CreatePayment {
    fn validate(&self) -> Result<(), AppError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(AppError::validation("amount must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct PaymentQuery {
    pub student_id: Option<u64>,
    pub batch_id: Option<u64>,
    #[schema(value_type = Option<String>, format = "date")]
    pub from: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = "date")]
    pub to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize, PartialEq, ToSchema)]
pub struct PaymentSummary {
    pub student_id: u64,
    /// Sum of the fees of every batch the student is enrolled in
    pub total_fee: f64,
    pub total_paid: f64,
    pub balance: f64,
}

impl PaymentSummary {
    fn new(student_id: u64, total_fee: f64, total_paid: f64) -> Self {
        let round = |v: f64| (v * 100.0).round() / 100.0;
        Self {
            student_id,
            total_fee: round(total_fee),
            total_paid: round(total_paid),
            balance: round(total_fee - total_paid),
        }
    }
}

async fn find_payment(pool: &MySqlPool, payment_id: u64) -> Result<Payment, AppError> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?");
    sqlx::query_as::<_, Payment>(&sql)
        .bind(payment_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Payment not found"))
}

#[utoipa::path(
    post,
    path = "/api/payments",
    request_body = CreatePayment,
    responses(
        (status = 201, description = "Payment recorded", body = Payment),
        (status = 400, description = "Non-positive amount or user is not a student"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreatePayment>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    payload.validate()?;
    ensure_role(pool.get_ref(), payload.student_id, Role::Student).await?;
    if let Some(batch_id) = payload.batch_id {
        find_batch(pool.get_ref(), batch_id).await?;
    }

    let result = sqlx::query(
        r#"
        INSERT INTO payments (student_id, batch_id, amount, method, reference, paid_at, recorded_by, note)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payload.student_id)
    .bind(payload.batch_id)
    .bind(payload.amount)
    .bind(payload.method.to_string())
    .bind(payload.reference.as_deref())
    .bind(payload.paid_at.unwrap_or_else(Utc::now))
    .bind(auth.user_id)
    .bind(payload.note.as_deref())
    .execute(pool.get_ref())
    .await?;

    let payment_id = result.last_insert_id();
    info!(payment_id, student_id = payload.student_id, amount = payload.amount, "Payment recorded");

    let payment = find_payment(pool.get_ref(), payment_id).await?;
    Ok(response::created("Payment recorded", payment))
}

#[utoipa::path(
    get,
    path = "/api/payments",
    params(PaymentQuery),
    responses(
        (status = 200, description = "Paginated payments; students only see their own", body = Object),
        (status = 403, description = "Faculty and employees have no payments")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn list_payments(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<PaymentQuery>,
) -> Result<HttpResponse, AppError> {
    let mut filter = Filter::new();
    match auth.role {
        Role::SuperAdmin | Role::Admin => {
            filter.eq_opt("student_id", query.student_id);
        }
        Role::Student => {
            filter.eq("student_id", auth.user_id);
        }
        Role::Faculty | Role::Employee => {
            return Err(AppError::forbidden("Payments are visible to admins and students"));
        }
    }
    filter.eq_opt("batch_id", query.batch_id);

    let offset = academy_offset(&config)?;
    if let Some(from) = query.from {
        let (start, _) = local_day_bounds(from, offset);
        filter.and("paid_at >= ?", vec![SqlValue::from(start)]);
    }
    if let Some(to) = query.to {
        let (_, end) = local_day_bounds(to, offset);
        filter.and("paid_at < ?", vec![SqlValue::from(end)]);
    }

    let page = Page::new(query.page, query.per_page);
    let payments = fetch_page::<Payment>(
        pool.get_ref(),
        PAYMENT_COLUMNS,
        "payments",
        &filter,
        "paid_at DESC, id DESC",
        page,
    )
    .await?;

    Ok(response::ok(payments))
}

#[utoipa::path(
    get,
    path = "/api/payments/{payment_id}",
    params(("payment_id" = u64, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment found", body = Payment),
        (status = 403, description = "Not the paying student"),
        (status = 404, description = "Payment not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let payment = find_payment(pool.get_ref(), path.into_inner()).await?;
    auth.require_self_or_admin(payment.student_id)?;
    Ok(response::ok(payment))
}

#[utoipa::path(
    get,
    path = "/api/students/{student_id}/payments/summary",
    params(("student_id" = u64, Path, description = "Student user ID")),
    responses(
        (status = 200, description = "Fees against payments", body = PaymentSummary),
        (status = 403, description = "Not the student or an admin")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn summary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let student_id = path.into_inner();
    auth.require_self_or_admin(student_id)?;

    let total_fee: f64 = sqlx::query_scalar(
        r#"
        SELECT CAST(COALESCE(SUM(b.fee), 0) AS DOUBLE)
        FROM batch_students bs
        JOIN batches b ON b.id = bs.batch_id
        WHERE bs.student_id = ?
        "#,
    )
    .bind(student_id)
    .fetch_one(pool.get_ref())
    .await?;

    let total_paid: f64 = sqlx::query_scalar(
        "SELECT CAST(COALESCE(SUM(amount), 0) AS DOUBLE) FROM payments WHERE student_id = ?",
    )
    .bind(student_id)
    .fetch_one(pool.get_ref())
    .await?;

    Ok(response::ok(PaymentSummary::new(student_id, total_fee, total_paid)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::test_support::bearer;
    use actix_web::test as atest;
    use serde_json::json;

    #[test]
    fn summary_rounds_to_cents() {
        let s = PaymentSummary::new(12, 45000.0, 15000.333);
        assert_eq!(s.total_paid, 15000.33);
        assert_eq!(s.balance, 29999.67);
    }

    #[test]
    fn overpayment_gives_negative_balance() {
        let s = PaymentSummary::new(12, 1000.0, 1200.0);
        assert_eq!(s.balance, -200.0);
    }

    #[actix_web::test]
    async fn zero_amount_is_rejected() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/payments")
            .insert_header(bearer(2, Role::Admin))
            .set_json(json!({"student_id": 12, "amount": 0, "method": "cash"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn students_cannot_see_another_summary() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/students/13/payments/summary")
            .insert_header(bearer(12, Role::Student))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn faculty_cannot_list_payments() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/payments")
            .insert_header(bearer(7, Role::Faculty))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }
}
