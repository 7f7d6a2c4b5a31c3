use actix_web::{HttpResponse, web};
use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::api::{academy_offset, local_date, local_day_bounds};
use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::error::AppError;
use crate::model::attendance::AttendanceStatus;
use crate::model::change_request::ReviewStatus;
use crate::model::role::Role;
use crate::model::session::{SESSION_COLUMNS, Session, SessionStatus};
use crate::model::student_punch::{PUNCH_COLUMNS, StudentPunch};
use crate::utils::response;

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminDashboard {
    pub active_students: i64,
    pub active_faculty: i64,
    pub active_batches: i64,
    pub ongoing_sessions: i64,
    pub pending_change_requests: i64,
    pub pending_portfolios: i64,
    /// Sum of payments since the first of the current academy-local month
    pub collected_this_month: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FacultyDashboard {
    pub batches: i64,
    pub sessions_today: i64,
    pub ongoing_session: Option<Session>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MemberDashboard {
    pub today_punch: Option<StudentPunch>,
    /// Present or manually present over all marked sessions; students only
    pub attendance_percentage: Option<f64>,
    pub pending_requests: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum Dashboard {
    Admin(AdminDashboard),
    Faculty(FacultyDashboard),
    Member(MemberDashboard),
}

/// Percentage with one decimal; `None` before any attendance exists.
fn attendance_percentage(present: i64, total: i64) -> Option<f64> {
    if total <= 0 {
        return None;
    }
    let pct = present as f64 * 100.0 / total as f64;
    Some((pct * 10.0).round() / 10.0)
}

fn month_start(today: NaiveDate) -> NaiveDate {
    today.with_day(1).unwrap_or(today)
}

async fn active_users(pool: &MySqlPool, role: Role) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role_id = ? AND is_active = TRUE")
        .bind(role.id())
        .fetch_one(pool)
        .await
}

async fn admin_view(pool: &MySqlPool, config: &Config) -> Result<AdminDashboard, AppError> {
    let offset = academy_offset(config)?;
    let (month_from, _) = local_day_bounds(month_start(local_date(Utc::now(), offset)), offset);
    let pending = ReviewStatus::Pending.to_string();

    let active_students = active_users(pool, Role::Student).await?;
    let active_faculty = active_users(pool, Role::Faculty).await?;
    let active_batches: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches WHERE is_active = TRUE")
        .fetch_one(pool)
        .await?;
    let ongoing_sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE status = ?")
        .bind(SessionStatus::Ongoing.to_string())
        .fetch_one(pool)
        .await?;
    let pending_change_requests: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM change_requests WHERE status = ?")
            .bind(&pending)
            .fetch_one(pool)
            .await?;
    let pending_portfolios: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM portfolios WHERE status = ?")
        .bind(&pending)
        .fetch_one(pool)
        .await?;

    let collected_this_month: f64 = sqlx::query_scalar(
        "SELECT CAST(COALESCE(SUM(amount), 0) AS DOUBLE) FROM payments WHERE paid_at >= ?",
    )
    .bind(month_from)
    .fetch_one(pool)
    .await?;

    Ok(AdminDashboard {
        active_students,
        active_faculty,
        active_batches,
        ongoing_sessions,
        pending_change_requests,
        pending_portfolios,
        collected_this_month,
    })
}

async fn faculty_view(
    pool: &MySqlPool,
    config: &Config,
    faculty_id: u64,
) -> Result<FacultyDashboard, AppError> {
    let offset = academy_offset(config)?;
    let (day_start, day_end) = local_day_bounds(local_date(Utc::now(), offset), offset);

    let batches: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM batches WHERE faculty_id = ? AND is_active = TRUE",
    )
    .bind(faculty_id)
    .fetch_one(pool)
    .await?;

    let sessions_today: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM sessions
        WHERE faculty_id = ? AND status <> ? AND scheduled_start >= ? AND scheduled_start < ?
        "#,
    )
    .bind(faculty_id)
    .bind(SessionStatus::Cancelled.to_string())
    .bind(day_start)
    .bind(day_end)
    .fetch_one(pool)
    .await?;

    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE faculty_id = ? AND status = ? LIMIT 1");
    let ongoing_session = sqlx::query_as::<_, Session>(&sql)
        .bind(faculty_id)
        .bind(SessionStatus::Ongoing.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(FacultyDashboard {
        batches,
        sessions_today,
        ongoing_session,
    })
}

async fn member_view(
    pool: &MySqlPool,
    config: &Config,
    auth: &AuthUser,
) -> Result<MemberDashboard, AppError> {
    let today = local_date(Utc::now(), academy_offset(config)?);

    let sql = format!("SELECT {PUNCH_COLUMNS} FROM student_punches WHERE user_id = ? AND punch_date = ?");
    let today_punch = sqlx::query_as::<_, StudentPunch>(&sql)
        .bind(auth.user_id)
        .bind(today)
        .fetch_optional(pool)
        .await?;

    let attendance = if auth.role == Role::Student {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendance WHERE student_id = ?")
            .bind(auth.user_id)
            .fetch_one(pool)
            .await?;
        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attendance WHERE student_id = ? AND status IN (?, ?)",
        )
        .bind(auth.user_id)
        .bind(AttendanceStatus::Present.to_string())
        .bind(AttendanceStatus::ManualPresent.to_string())
        .fetch_one(pool)
        .await?;
        attendance_percentage(present, total)
    } else {
        None
    };

    let pending_requests: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM change_requests WHERE requester_id = ? AND status = ?",
    )
    .bind(auth.user_id)
    .bind(ReviewStatus::Pending.to_string())
    .fetch_one(pool)
    .await?;

    Ok(MemberDashboard {
        today_punch,
        attendance_percentage: attendance,
        pending_requests,
    })
}

#[utoipa::path(
    get,
    path = "/api/dashboard",
    responses(
        (status = 200, description = "Counters shaped by the caller's role", body = Dashboard)
    ),
    security(("bearer_auth" = [])),
    tag = "Dashboard"
)]
pub async fn dashboard(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let view = match auth.role {
        Role::SuperAdmin | Role::Admin => Dashboard::Admin(admin_view(pool.get_ref(), &config).await?),
        Role::Faculty => Dashboard::Faculty(faculty_view(pool.get_ref(), &config, auth.user_id).await?),
        Role::Student | Role::Employee => {
            Dashboard::Member(member_view(pool.get_ref(), &config, &auth).await?)
        }
    };
    Ok(response::ok(view))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_to_one_decimal() {
        assert_eq!(attendance_percentage(2, 3), Some(66.7));
        assert_eq!(attendance_percentage(5, 5), Some(100.0));
        assert_eq!(attendance_percentage(0, 0), None);
    }

    #[test]
    fn month_starts_on_the_first() {
        let d = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();
        assert_eq!(month_start(d), NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
    }
}
