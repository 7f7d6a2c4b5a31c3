use crate::{
    api::{academy_offset, batches::find_batch, local_day_bounds, require_non_empty, users::ensure_role},
    auth::auth::AuthUser,
    config::Config,
    db::is_duplicate_key,
    error::AppError,
    model::{
        attendance::{AttendanceEntry, AttendanceStatus},
        role::Role,
        session::{SESSION_COLUMNS, Session, SessionStatus},
    },
    service::session_lifecycle::{SessionAction, ensure_accepts_attendance, transition},
    utils::{
        db_utils::{Filter, SqlValue, fetch_page},
        response::{self, Page},
    },
};
use actix_web::{HttpResponse, web};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{MySql, MySqlConnection, MySqlPool, QueryBuilder};
use std::collections::HashSet;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct CreateSession {
    #[schema(example = 3)]
    pub batch_id: u64,
    /// Defaults to the batch's lead faculty.
    pub faculty_id: Option<u64>,
    #[schema(example = "Ownership and borrowing")]
    pub topic: String,
    #[schema(value_type = String, format = "date-time", example = "2026-03-02T04:00:00Z")]
    pub scheduled_start: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time", example = "2026-03-02T06:00:00Z")]
    pub scheduled_end: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct SessionQuery {
    pub batch_id: Option<u64>,
    pub faculty_id: Option<u64>,
    pub status: Option<SessionStatus>,
    /// Sessions scheduled on this academy-local date
    #[schema(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttendanceMark {
    #[schema(example = 12)]
    pub student_id: u64,
    pub status: AttendanceStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkAttendance {
    pub entries: Vec<AttendanceMark>,
}

impl MarkAttendance {
    /// Non-empty, one entry per student.
    fn validate(&self) -> Result<(), AppError> {
        if self.entries.is_empty() {
            return Err(AppError::validation("entries must not be empty"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.entries.iter().find(|e| !seen.insert(e.student_id)) {
            return Err(AppError::validation(format!(
                "Student {} appears more than once",
                dup.student_id
            )));
        }
        Ok(())
    }
}

pub(crate) async fn find_session(pool: &MySqlPool, session_id: u64) -> Result<Session, AppError> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?");
    sqlx::query_as::<_, Session>(&sql)
        .bind(session_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Session not found"))
}

async fn lock_session(conn: &mut MySqlConnection, session_id: u64) -> Result<Session, AppError> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ? FOR UPDATE");
    sqlx::query_as::<_, Session>(&sql)
        .bind(session_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("Session not found"))
}

/// The assigned faculty member, or an admin.
fn ensure_runs(auth: &AuthUser, session: &Session) -> Result<(), AppError> {
    if auth.is_admin() || (auth.role == Role::Faculty && auth.user_id == session.faculty_id) {
        Ok(())
    } else {
        Err(AppError::forbidden("Only the assigned faculty can run this session"))
    }
}

/// Admins see everything, faculty their own sessions, students their batches' sessions.
async fn ensure_can_view(pool: &MySqlPool, auth: &AuthUser, session: &Session) -> Result<(), AppError> {
    let allowed = match auth.role {
        Role::SuperAdmin | Role::Admin => true,
        Role::Faculty => session.faculty_id == auth.user_id,
        Role::Student => {
            crate::api::batches::is_enrolled(pool, session.batch_id, auth.user_id).await?
        }
        Role::Employee => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden("Not allowed to view this session"))
    }
}

async fn set_status(
    conn: &mut MySqlConnection,
    session_id: u64,
    status: SessionStatus,
    timestamp_column: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut qb = QueryBuilder::<MySql>::new("UPDATE sessions SET status = ");
    qb.push_bind(status.to_string());
    if let Some(column) = timestamp_column {
        qb.push(format!(", {column} = ")).push_bind(at);
    }
    qb.push(" WHERE id = ").push_bind(session_id);
    qb.build().execute(conn).await?;
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/sessions",
    request_body = CreateSession,
    responses(
        (status = 201, description = "Session scheduled", body = Session),
        (status = 400, description = "Invalid times, topic or faculty"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Batch not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn create_session(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateSession>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    require_non_empty("topic", &payload.topic)?;
    if payload.scheduled_end <= payload.scheduled_start {
        return Err(AppError::validation("scheduled_end must be after scheduled_start"));
    }

    let batch = find_batch(pool.get_ref(), payload.batch_id).await?;
    if !batch.is_active {
        return Err(AppError::validation("Batch is inactive"));
    }
    let faculty_id = payload.faculty_id.unwrap_or(batch.faculty_id);
    ensure_role(pool.get_ref(), faculty_id, Role::Faculty).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO sessions (batch_id, faculty_id, topic, scheduled_start, scheduled_end, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id)
    .bind(faculty_id)
    .bind(payload.topic.trim())
    .bind(payload.scheduled_start)
    .bind(payload.scheduled_end)
    .bind(SessionStatus::Scheduled.to_string())
    .execute(pool.get_ref())
    .await?;

    let session_id = result.last_insert_id();
    info!(session_id, batch_id = batch.id, faculty_id, "Session scheduled");

    let session = find_session(pool.get_ref(), session_id).await?;
    Ok(response::created("Session scheduled", session))
}

#[utoipa::path(
    get,
    path = "/api/sessions",
    params(SessionQuery),
    responses(
        (status = 200, description = "Paginated sessions visible to the caller", body = Object),
        (status = 403, description = "Employees have no sessions")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn list_sessions(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<SessionQuery>,
) -> Result<HttpResponse, AppError> {
    let mut filter = Filter::new();

    match auth.role {
        Role::SuperAdmin | Role::Admin => {
            filter.eq_opt("faculty_id", query.faculty_id);
        }
        Role::Faculty => {
            filter.eq("faculty_id", auth.user_id);
        }
        Role::Student => {
            filter.and(
                "batch_id IN (SELECT batch_id FROM batch_students WHERE student_id = ?)",
                vec![auth.user_id.into()],
            );
        }
        Role::Employee => return Err(AppError::forbidden("Employees have no sessions")),
    }

    filter
        .eq_opt("batch_id", query.batch_id)
        .eq_opt("status", query.status.map(|s| s.to_string()));

    if let Some(date) = query.date {
        let (start, end) = local_day_bounds(date, academy_offset(&config)?);
        filter.and(
            "scheduled_start >= ? AND scheduled_start < ?",
            vec![SqlValue::from(start), SqlValue::from(end)],
        );
    }

    let page = Page::new(query.page, query.per_page);
    let sessions = fetch_page::<Session>(
        pool.get_ref(),
        SESSION_COLUMNS,
        "sessions",
        &filter,
        "scheduled_start DESC",
        page,
    )
    .await?;

    Ok(response::ok(sessions))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{session_id}",
    params(("session_id" = u64, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session found", body = Session),
        (status = 403, description = "Not visible to the caller"),
        (status = 404, description = "Session not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn get_session(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(pool.get_ref(), path.into_inner()).await?;
    ensure_can_view(pool.get_ref(), &auth, &session).await?;
    Ok(response::ok(session))
}

/// Starts the session and opens an `absent` row for every enrolled student.
#[utoipa::path(
    post,
    path = "/api/sessions/{session_id}/checkin",
    params(("session_id" = u64, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session is ongoing", body = Session),
        (status = 400, description = "Not scheduled, or the faculty already has an ongoing session"),
        (status = 403, description = "Not the assigned faculty"),
        (status = 404, description = "Session not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn checkin(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let session = lock_session(&mut *tx, session_id).await?;
    ensure_runs(&auth, &session)?;
    let next = transition(session.status, SessionAction::Start)?;

    // serialises check-ins of the same faculty member
    sqlx::query("SELECT id FROM users WHERE id = ? FOR UPDATE")
        .bind(session.faculty_id)
        .execute(&mut *tx)
        .await?;

    let ongoing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sessions WHERE faculty_id = ? AND status = ? AND id <> ?",
    )
    .bind(session.faculty_id)
    .bind(SessionStatus::Ongoing.to_string())
    .bind(session_id)
    .fetch_one(&mut *tx)
    .await?;

    if ongoing > 0 {
        return Err(AppError::validation("Faculty already has an ongoing session"));
    }

    match set_status(&mut *tx, session_id, next, Some("actual_start_at"), Utc::now()).await {
        Ok(()) => {}
        Err(e) if is_duplicate_key(&e) => {
            warn!(session_id, faculty_id = session.faculty_id, "Ongoing guard rejected check-in");
            return Err(AppError::validation("Faculty already has an ongoing session"));
        }
        Err(e) => return Err(e.into()),
    }

    let opened = sqlx::query(
        r#"
        INSERT IGNORE INTO attendance (session_id, student_id, status, is_manual)
        SELECT ?, student_id, ?, FALSE
        FROM batch_students
        WHERE batch_id = ?
        "#,
    )
    .bind(session_id)
    .bind(AttendanceStatus::Absent.to_string())
    .bind(session.batch_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    info!(session_id, faculty_id = session.faculty_id, students = opened, "Session checked in");

    let session = find_session(pool.get_ref(), session_id).await?;
    Ok(response::ok_with_message("Session started", session))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{session_id}/attendance",
    params(("session_id" = u64, Path, description = "Session ID")),
    request_body = MarkAttendance,
    responses(
        (status = 200, description = "Attendance recorded", body = Object, example = json!({
            "status": "success",
            "message": "Attendance recorded",
            "data": {"marked": 2}
        })),
        (status = 400, description = "Session not ongoing, duplicate or unenrolled students"),
        (status = 403, description = "Not the assigned faculty")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn mark_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<MarkAttendance>,
) -> Result<HttpResponse, AppError> {
    payload.validate()?;
    let session_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let session = lock_session(&mut *tx, session_id).await?;
    ensure_runs(&auth, &session)?;
    ensure_accepts_attendance(session.status)?;

    let mut enrolled = QueryBuilder::<MySql>::new(
        "SELECT student_id FROM batch_students WHERE batch_id = ",
    );
    enrolled.push_bind(session.batch_id).push(" AND student_id IN (");
    {
        let mut list = enrolled.separated(", ");
        for entry in &payload.entries {
            list.push_bind(entry.student_id);
        }
    }
    enrolled.push(")");
    let enrolled: Vec<u64> = enrolled.build_query_scalar().fetch_all(&mut *tx).await?;

    if let Some(stranger) = payload
        .entries
        .iter()
        .find(|e| !enrolled.contains(&e.student_id))
    {
        return Err(AppError::validation(format!(
            "Student {} is not enrolled in this batch",
            stranger.student_id
        )));
    }

    let now = Utc::now();
    let mut upsert = QueryBuilder::<MySql>::new(
        "INSERT INTO attendance (session_id, student_id, status, is_manual, marked_by, marked_at) ",
    );
    upsert.push_values(&payload.entries, |mut row, entry| {
        row.push_bind(session_id)
            .push_bind(entry.student_id)
            .push_bind(entry.status.to_string())
            .push_bind(entry.status.is_manual())
            .push_bind(auth.user_id)
            .push_bind(now);
    });
    upsert.push(
        " ON DUPLICATE KEY UPDATE status = VALUES(status), is_manual = VALUES(is_manual), \
         marked_by = VALUES(marked_by), marked_at = VALUES(marked_at)",
    );
    upsert.build().execute(&mut *tx).await?;
    tx.commit().await?;

    let marked = payload.entries.len();
    info!(session_id, marked, marked_by = auth.user_id, "Attendance recorded");
    Ok(response::ok_with_message(
        "Attendance recorded",
        serde_json::json!({ "marked": marked }),
    ))
}

/// Roster with names; students only see their own row.
#[utoipa::path(
    get,
    path = "/api/sessions/{session_id}/attendance",
    params(("session_id" = u64, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Attendance roster", body = [AttendanceEntry]),
        (status = 403, description = "Not visible to the caller"),
        (status = 404, description = "Session not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn get_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(pool.get_ref(), path.into_inner()).await?;
    ensure_can_view(pool.get_ref(), &auth, &session).await?;

    let mut qb = QueryBuilder::<MySql>::new(
        r#"
        SELECT a.student_id, u.full_name, a.status, a.is_manual, a.marked_by, a.marked_at
        FROM attendance a
        JOIN users u ON u.id = a.student_id
        WHERE a.session_id = "#,
    );
    qb.push_bind(session.id);
    if auth.role == Role::Student {
        qb.push(" AND a.student_id = ").push_bind(auth.user_id);
    }
    qb.push(" ORDER BY u.full_name");

    let roster = qb
        .build_query_as::<AttendanceEntry>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::ok(roster))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{session_id}/checkout",
    params(("session_id" = u64, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session completed", body = Session),
        (status = 400, description = "Session is not ongoing"),
        (status = 403, description = "Not the assigned faculty")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn checkout(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let session = lock_session(&mut *tx, session_id).await?;
    ensure_runs(&auth, &session)?;
    let next = transition(session.status, SessionAction::Complete)?;
    set_status(&mut *tx, session_id, next, Some("actual_end_at"), Utc::now()).await?;
    tx.commit().await?;

    info!(session_id, "Session checked out");
    let session = find_session(pool.get_ref(), session_id).await?;
    Ok(response::ok_with_message("Session completed", session))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{session_id}/cancel",
    params(("session_id" = u64, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session cancelled", body = Session),
        (status = 400, description = "Only scheduled sessions can be cancelled"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn cancel(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let session_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let session = lock_session(&mut *tx, session_id).await?;
    let next = transition(session.status, SessionAction::Cancel)?;
    set_status(&mut *tx, session_id, next, None, Utc::now()).await?;
    tx.commit().await?;

    info!(session_id, cancelled_by = auth.user_id, "Session cancelled");
    let session = find_session(pool.get_ref(), session_id).await?;
    Ok(response::ok_with_message("Session cancelled", session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::test_support::bearer;
    use actix_web::test as atest;
    use chrono::TimeZone;
    use serde_json::json;

    fn session(faculty_id: u64) -> Session {
        Session {
            id: 1,
            batch_id: 3,
            faculty_id,
            topic: "Traits".into(),
            scheduled_start: Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap(),
            scheduled_end: Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap(),
            status: SessionStatus::Scheduled,
            actual_start_at: None,
            actual_end_at: None,
        }
    }

    fn user(user_id: u64, role: Role) -> AuthUser {
        AuthUser {
            user_id,
            username: format!("user{user_id}"),
            role,
        }
    }

    #[test]
    fn only_assigned_faculty_or_admin_runs_a_session() {
        let s = session(7);
        assert!(ensure_runs(&user(7, Role::Faculty), &s).is_ok());
        assert!(ensure_runs(&user(8, Role::Faculty), &s).is_err());
        assert!(ensure_runs(&user(2, Role::Admin), &s).is_ok());
        // same id, wrong role
        assert!(ensure_runs(&user(7, Role::Student), &s).is_err());
    }

    #[test]
    fn attendance_payload_must_be_unique_and_non_empty() {
        let empty = MarkAttendance { entries: vec![] };
        assert!(empty.validate().is_err());

        let dup: MarkAttendance = serde_json::from_value(json!({"entries": [
            {"student_id": 12, "status": "present"},
            {"student_id": 12, "status": "absent"}
        ]}))
        .unwrap();
        assert!(dup.validate().is_err());

        let ok: MarkAttendance = serde_json::from_value(json!({"entries": [
            {"student_id": 12, "status": "present"},
            {"student_id": 13, "status": "manual_present"}
        ]}))
        .unwrap();
        assert!(ok.validate().is_ok());
    }

    #[actix_web::test]
    async fn end_before_start_is_rejected() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/sessions")
            .insert_header(bearer(2, Role::Admin))
            .set_json(json!({
                "batch_id": 3,
                "topic": "Lifetimes",
                "scheduled_start": "2026-03-02T06:00:00Z",
                "scheduled_end": "2026-03-02T04:00:00Z"
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn students_cannot_schedule() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/sessions")
            .insert_header(bearer(12, Role::Student))
            .set_json(json!({
                "batch_id": 3,
                "topic": "Lifetimes",
                "scheduled_start": "2026-03-02T04:00:00Z",
                "scheduled_end": "2026-03-02T06:00:00Z"
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn unknown_attendance_status_is_a_client_error() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/sessions/1/attendance")
            .insert_header(bearer(7, Role::Faculty))
            .set_json(json!({"entries": [{"student_id": 12, "status": "late"}]}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = atest::read_body_json(resp).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("late"));
    }

    #[actix_web::test]
    async fn non_numeric_session_id_gets_error_envelope() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/sessions/abc/checkin")
            .insert_header(bearer(7, Role::Faculty))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = atest::read_body_json(resp).await;
        assert_eq!(body["status"], "error");
    }

    #[actix_web::test]
    async fn bad_date_filter_gets_error_envelope() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/sessions?date=02-03-2026")
            .insert_header(bearer(2, Role::Admin))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = atest::read_body_json(resp).await;
        assert_eq!(body["status"], "error");
    }

    #[actix_web::test]
    async fn employees_have_no_session_list() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/sessions")
            .insert_header(bearer(30, Role::Employee))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }
}
