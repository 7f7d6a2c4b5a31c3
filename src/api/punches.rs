//! Daily punch in/out with breaks (`/student-attendance`).
//!
//! Every state change reads the day's row `FOR UPDATE` inside a transaction;
//! the unique (user_id, punch_date) key backstops concurrent first punches.

use crate::{
    api::{academy_offset, local_date},
    auth::auth::AuthUser,
    config::Config,
    db::is_duplicate_key,
    error::AppError,
    model::student_punch::{BreakSegment, PUNCH_COLUMNS, StudentPunch},
    service::{
        punch::{PunchCard, PunchError},
        storage::{UploadReq, UploadStore},
    },
    utils::{
        db_utils::{Filter, fetch_page},
        response::{self, Page},
    },
};
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{MySqlConnection, MySqlPool, types::Json};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PunchReq {
    /// Selfie taken at the punch, stored through the upload store.
    pub photo: Option<UploadReq>,
    pub fingerprint_token: Option<String>,
    #[schema(example = 12.9716)]
    pub latitude: Option<f64>,
    #[schema(example = 77.5946)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PunchOutReq {
    pub photo: Option<UploadReq>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct BreakReq {
    #[schema(example = "lunch")]
    pub reason: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct TodayPunch {
    pub record: Option<StudentPunch>,
    #[schema(example = 30)]
    pub total_break_minutes: i64,
    pub on_break: bool,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct PunchHistoryQuery {
    /// Another user's history (admins only)
    pub user_id: Option<u64>,
    #[schema(value_type = Option<String>, format = "date")]
    pub from: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = "date")]
    pub to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Both coordinates or neither, each within range.
fn validate_location(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), AppError> {
    match (latitude, longitude) {
        (None, None) => Ok(()),
        (Some(lat), Some(lon)) => {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(AppError::validation("latitude must be between -90 and 90"));
            }
            if !(-180.0..=180.0).contains(&lon) {
                return Err(AppError::validation("longitude must be between -180 and 180"));
            }
            Ok(())
        }
        _ => Err(AppError::validation(
            "latitude and longitude must be sent together",
        )),
    }
}

fn ensure_can_punch(auth: &AuthUser) -> Result<(), AppError> {
    if auth.role.punches() {
        Ok(())
    } else {
        Err(AppError::forbidden("Only students, faculty and employees punch in"))
    }
}

fn card_of(record: Option<&StudentPunch>) -> PunchCard {
    match record {
        Some(r) => PunchCard {
            punch_in_at: r.punch_in_at,
            punch_out_at: r.punch_out_at,
            breaks: r.breaks.0.clone(),
        },
        None => PunchCard::default(),
    }
}

async fn lock_day(
    conn: &mut MySqlConnection,
    user_id: u64,
    date: NaiveDate,
) -> Result<Option<StudentPunch>, sqlx::Error> {
    let sql = format!(
        "SELECT {PUNCH_COLUMNS} FROM student_punches WHERE user_id = ? AND punch_date = ? FOR UPDATE"
    );
    sqlx::query_as::<_, StudentPunch>(&sql)
        .bind(user_id)
        .bind(date)
        .fetch_optional(conn)
        .await
}

async fn find_day(
    pool: &MySqlPool,
    user_id: u64,
    date: NaiveDate,
) -> Result<Option<StudentPunch>, sqlx::Error> {
    let sql = format!("SELECT {PUNCH_COLUMNS} FROM student_punches WHERE user_id = ? AND punch_date = ?");
    sqlx::query_as::<_, StudentPunch>(&sql)
        .bind(user_id)
        .bind(date)
        .fetch_optional(pool)
        .await
}

async fn save_breaks(
    conn: &mut MySqlConnection,
    punch_id: u64,
    breaks: &[BreakSegment],
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE student_punches SET breaks = ? WHERE id = ?")
        .bind(Json(breaks))
        .bind(punch_id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn store_photo(store: &UploadStore, photo: Option<&UploadReq>) -> Result<Option<String>, AppError> {
    match photo {
        Some(p) => Ok(Some(store.save(&p.file_name, &p.content_base64).await?.path)),
        None => Ok(None),
    }
}

async fn discard_photo(store: &UploadStore, path: Option<&str>) {
    if let Some(path) = path {
        store.discard(path).await;
    }
}

async fn today_response(
    pool: &MySqlPool,
    user_id: u64,
    date: NaiveDate,
) -> Result<TodayPunch, AppError> {
    let record = find_day(pool, user_id, date).await?;
    let card = card_of(record.as_ref());
    Ok(TodayPunch {
        total_break_minutes: card.total_break_minutes(Utc::now()),
        on_break: card.on_break(),
        record,
    })
}

#[utoipa::path(
    post,
    path = "/api/student-attendance/punch-in",
    request_body = PunchReq,
    responses(
        (status = 200, description = "Punched in", body = TodayPunch),
        (status = 400, description = "Already punched in today or bad location"),
        (status = 403, description = "Role does not punch")
    ),
    security(("bearer_auth" = [])),
    tag = "Punch"
)]
pub async fn punch_in(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    store: web::Data<UploadStore>,
    payload: web::Json<PunchReq>,
) -> Result<HttpResponse, AppError> {
    ensure_can_punch(&auth)?;
    validate_location(payload.latitude, payload.longitude)?;

    let now = Utc::now();
    let today = local_date(now, academy_offset(&config)?);

    let mut tx = pool.begin().await?;
    let existing = lock_day(&mut *tx, auth.user_id, today).await?;
    let mut card = card_of(existing.as_ref());
    card.punch_in(now)?;

    let photo = store_photo(&store, payload.photo.as_ref()).await?;

    let written = match &existing {
        Some(row) => {
            sqlx::query(
                r#"
                UPDATE student_punches
                SET punch_in_at = ?, punch_in_photo = ?, fingerprint_token = ?, latitude = ?, longitude = ?
                WHERE id = ?
                "#,
            )
            .bind(now)
            .bind(&photo)
            .bind(&payload.fingerprint_token)
            .bind(payload.latitude)
            .bind(payload.longitude)
            .bind(row.id)
            .execute(&mut *tx)
            .await
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO student_punches
                    (user_id, punch_date, punch_in_at, punch_in_photo, fingerprint_token, latitude, longitude, breaks)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(auth.user_id)
            .bind(today)
            .bind(now)
            .bind(&photo)
            .bind(&payload.fingerprint_token)
            .bind(payload.latitude)
            .bind(payload.longitude)
            .bind(Json(Vec::<BreakSegment>::new()))
            .execute(&mut *tx)
            .await
        }
    };

    let committed = match written {
        Ok(_) => tx.commit().await.map_err(AppError::from),
        // a concurrent punch-in won the insert
        Err(e) if is_duplicate_key(&e) => Err(PunchError::AlreadyPunchedIn.into()),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = committed {
        discard_photo(&store, photo.as_deref()).await;
        return Err(e);
    }

    info!(user_id = auth.user_id, date = %today, "Punched in");
    let body = today_response(pool.get_ref(), auth.user_id, today).await?;
    Ok(response::ok_with_message("Punched in", body))
}

#[utoipa::path(
    post,
    path = "/api/student-attendance/punch-out",
    request_body = PunchOutReq,
    responses(
        (status = 200, description = "Punched out; effective hours computed", body = TodayPunch),
        (status = 400, description = "Not punched in, already out, or out before in")
    ),
    security(("bearer_auth" = [])),
    tag = "Punch"
)]
pub async fn punch_out(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    store: web::Data<UploadStore>,
    payload: web::Json<PunchOutReq>,
) -> Result<HttpResponse, AppError> {
    ensure_can_punch(&auth)?;

    let now = Utc::now();
    let today = local_date(now, academy_offset(&config)?);

    let mut tx = pool.begin().await?;
    let existing = lock_day(&mut *tx, auth.user_id, today)
        .await?
        .ok_or(PunchError::NotPunchedIn)?;
    let mut card = card_of(Some(&existing));
    let hours = card.punch_out(now)?;

    let photo = store_photo(&store, payload.photo.as_ref()).await?;

    sqlx::query(
        r#"
        UPDATE student_punches
        SET punch_out_at = ?, punch_out_photo = ?, breaks = ?, effective_working_hours = ?
        WHERE id = ?
        "#,
    )
    .bind(now)
    .bind(&photo)
    .bind(Json(&card.breaks))
    .bind(hours)
    .bind(existing.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    info!(user_id = auth.user_id, date = %today, hours, "Punched out");
    let body = today_response(pool.get_ref(), auth.user_id, today).await?;
    Ok(response::ok_with_message("Punched out", body))
}

#[utoipa::path(
    post,
    path = "/api/student-attendance/break-in",
    request_body = BreakReq,
    responses(
        (status = 200, description = "Break started", body = TodayPunch),
        (status = 400, description = "Not on shift or a break is already open")
    ),
    security(("bearer_auth" = [])),
    tag = "Punch"
)]
pub async fn break_in(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: Option<web::Json<BreakReq>>,
) -> Result<HttpResponse, AppError> {
    ensure_can_punch(&auth)?;
    let reason = payload
        .and_then(|p| p.into_inner().reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    let now = Utc::now();
    let today = local_date(now, academy_offset(&config)?);

    let mut tx = pool.begin().await?;
    let existing = lock_day(&mut *tx, auth.user_id, today)
        .await?
        .ok_or(PunchError::NotPunchedIn)?;
    let mut card = card_of(Some(&existing));
    card.start_break(now, reason)?;
    save_breaks(&mut *tx, existing.id, &card.breaks).await?;
    tx.commit().await?;

    info!(user_id = auth.user_id, "Break started");
    let body = today_response(pool.get_ref(), auth.user_id, today).await?;
    Ok(response::ok_with_message("Break started", body))
}

#[utoipa::path(
    post,
    path = "/api/student-attendance/break-out",
    responses(
        (status = 200, description = "Break ended", body = TodayPunch),
        (status = 400, description = "No break in progress")
    ),
    security(("bearer_auth" = [])),
    tag = "Punch"
)]
pub async fn break_out(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    ensure_can_punch(&auth)?;

    let now = Utc::now();
    let today = local_date(now, academy_offset(&config)?);

    let mut tx = pool.begin().await?;
    let existing = lock_day(&mut *tx, auth.user_id, today)
        .await?
        .ok_or(PunchError::NotPunchedIn)?;
    let mut card = card_of(Some(&existing));
    card.end_break(now)?;
    save_breaks(&mut *tx, existing.id, &card.breaks).await?;
    tx.commit().await?;

    info!(user_id = auth.user_id, "Break ended");
    let body = today_response(pool.get_ref(), auth.user_id, today).await?;
    Ok(response::ok_with_message("Break ended", body))
}

#[utoipa::path(
    get,
    path = "/api/student-attendance/today",
    responses((status = 200, description = "Today's record with break totals", body = TodayPunch)),
    security(("bearer_auth" = [])),
    tag = "Punch"
)]
pub async fn today(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let today = local_date(Utc::now(), academy_offset(&config)?);
    let body = today_response(pool.get_ref(), auth.user_id, today).await?;
    Ok(response::ok(body))
}

#[utoipa::path(
    get,
    path = "/api/student-attendance/history",
    params(PunchHistoryQuery),
    responses(
        (status = 200, description = "Paginated punch records, newest first", body = Object),
        (status = 400, description = "from is after to"),
        (status = 403, description = "user_id of someone else without admin role")
    ),
    security(("bearer_auth" = [])),
    tag = "Punch"
)]
pub async fn history(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PunchHistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let user_id = query.user_id.unwrap_or(auth.user_id);
    auth.require_self_or_admin(user_id)?;

    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::validation("from cannot be after to"));
        }
    }

    let mut filter = Filter::new();
    filter.eq("user_id", user_id);
    if let Some(from) = query.from {
        filter.and("punch_date >= ?", vec![from.into()]);
    }
    if let Some(to) = query.to {
        filter.and("punch_date <= ?", vec![to.into()]);
    }

    let page = Page::new(query.page, query.per_page);
    let records = fetch_page::<StudentPunch>(
        pool.get_ref(),
        PUNCH_COLUMNS,
        "student_punches",
        &filter,
        "punch_date DESC",
        page,
    )
    .await?;

    Ok(response::ok(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::test_support::bearer;
    use crate::model::role::Role;
    use actix_web::test as atest;
    use serde_json::json;

    #[test]
    fn location_needs_both_coordinates_in_range() {
        assert!(validate_location(None, None).is_ok());
        assert!(validate_location(Some(12.97), Some(77.59)).is_ok());
        assert!(validate_location(Some(12.97), None).is_err());
        assert!(validate_location(Some(91.0), Some(0.0)).is_err());
        assert!(validate_location(Some(0.0), Some(-180.5)).is_err());
    }

    #[test]
    fn missing_row_is_an_empty_card() {
        let card = card_of(None);
        assert!(card.punch_in_at.is_none());
        assert!(card.breaks.is_empty());
    }

    #[actix_web::test]
    async fn admins_do_not_punch() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/student-attendance/punch-in")
            .insert_header(bearer(2, Role::Admin))
            .set_json(json!({}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn out_of_range_location_is_rejected() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/student-attendance/punch-in")
            .insert_header(bearer(12, Role::Student))
            .set_json(json!({"latitude": 123.0, "longitude": 77.5}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn failed_punch_in_leaves_no_photo_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("photos");
        let app = test_app!(UploadStore::new(&dir, 1024));
        let req = atest::TestRequest::post()
            .uri("/api/student-attendance/punch-in")
            .insert_header(bearer(999_912, Role::Student))
            .set_json(json!({"photo": {"file_name": "selfie.jpg", "content_base64": "aGVsbG8="}}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert!(!resp.status().is_success());

        let left = std::fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(left, 0);
    }

    #[test]
    fn punch_out_body_ignores_location() {
        let req: PunchOutReq =
            serde_json::from_value(json!({"latitude": 123.0, "longitude": 77.5})).unwrap();
        assert!(req.photo.is_none());
    }

    #[actix_web::test]
    async fn history_of_another_user_needs_admin() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/student-attendance/history?user_id=13")
            .insert_header(bearer(12, Role::Student))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn history_range_must_be_ordered() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/student-attendance/history?from=2026-03-10&to=2026-03-01")
            .insert_header(bearer(12, Role::Student))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
