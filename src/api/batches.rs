use crate::{
    api::{require_non_empty, users::ensure_role},
    auth::auth::AuthUser,
    error::AppError,
    model::{
        batch::{BATCH_COLUMNS, Batch, BatchStudent},
        role::Role,
    },
    utils::{
        db_utils::{Filter, build_update_sql, execute_update, fetch_page},
        response::{self, Page},
    },
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const UPDATABLE_FIELDS: &[&str] = &[
    "name",
    "course",
    "faculty_id",
    "start_date",
    "end_date",
    "fee",
    "is_active",
];

#[derive(Deserialize, ToSchema)]
pub struct CreateBatch {
    #[schema(example = "FS-2026-JAN")]
    pub name: String,
    #[schema(example = "Full Stack Development")]
    pub course: String,
    #[schema(example = 7)]
    pub faculty_id: u64,
    #[schema(example = "2026-01-05", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-06-30", format = "date", value_type = Option<String>)]
    pub end_date: Option<NaiveDate>,
    #[schema(example = 45000.0)]
    pub fee: f64,
}

impl CreateBatch {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("name", &self.name)?;
        require_non_empty("course", &self.course)?;
        if matches!(self.end_date, Some(end) if end < self.start_date) {
            return Err(AppError::validation("end_date cannot be before start_date"));
        }
        if !self.fee.is_finite() || self.fee < 0.0 {
            return Err(AppError::validation("fee must be zero or more"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct BatchQuery {
    pub faculty_id: Option<u64>,
    pub is_active: Option<bool>,
    /// Matches name or course
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Deserialize, ToSchema)]
pub struct EnrolStudents {
    #[schema(example = json!([12, 13, 14]))]
    pub student_ids: Vec<u64>,
}

pub(crate) async fn find_batch(pool: &MySqlPool, batch_id: u64) -> Result<Batch, AppError> {
    let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?");
    sqlx::query_as::<_, Batch>(&sql)
        .bind(batch_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Batch not found"))
}

pub(crate) async fn is_enrolled(
    pool: &MySqlPool,
    batch_id: u64,
    student_id: u64,
) -> Result<bool, sqlx::Error> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM batch_students WHERE batch_id = ? AND student_id = ?",
    )
    .bind(batch_id)
    .bind(student_id)
    .fetch_one(pool)
    .await?;
    Ok(n > 0)
}

#[utoipa::path(
    post,
    path = "/api/batches",
    request_body = CreateBatch,
    responses(
        (status = 201, description = "Batch created", body = Batch),
        (status = 400, description = "Invalid payload or faculty"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Batches"
)]
pub async fn create_batch(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateBatch>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    payload.validate()?;
    ensure_role(pool.get_ref(), payload.faculty_id, Role::Faculty).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO batches (name, course, faculty_id, start_date, end_date, fee)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payload.name.trim())
    .bind(payload.course.trim())
    .bind(payload.faculty_id)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(payload.fee)
    .execute(pool.get_ref())
    .await?;

    let batch_id = result.last_insert_id();
    info!(batch_id, created_by = auth.user_id, "Batch created");

    let batch = find_batch(pool.get_ref(), batch_id).await?;
    Ok(response::created("Batch created", batch))
}

#[utoipa::path(
    get,
    path = "/api/batches",
    params(BatchQuery),
    responses((status = 200, description = "Paginated batches", body = Object)),
    security(("bearer_auth" = [])),
    tag = "Batches"
)]
pub async fn list_batches(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<BatchQuery>,
) -> Result<HttpResponse, AppError> {
    let mut filter = Filter::new();
    filter
        .eq_opt("faculty_id", query.faculty_id)
        .eq_opt("is_active", query.is_active)
        .search(&["name", "course"], query.search.as_deref());

    let page = Page::new(query.page, query.per_page);
    let batches =
        fetch_page::<Batch>(pool.get_ref(), BATCH_COLUMNS, "batches", &filter, "start_date DESC, id DESC", page)
            .await?;

    Ok(response::ok(batches))
}

#[utoipa::path(
    get,
    path = "/api/batches/{batch_id}",
    params(("batch_id" = u64, Path, description = "Batch ID")),
    responses(
        (status = 200, description = "Batch found", body = Batch),
        (status = 404, description = "Batch not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Batches"
)]
pub async fn get_batch(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let batch = find_batch(pool.get_ref(), path.into_inner()).await?;
    Ok(response::ok(batch))
}

#[utoipa::path(
    put,
    path = "/api/batches/{batch_id}",
    params(("batch_id" = u64, Path, description = "Batch ID")),
    request_body(content = Object, example = json!({"fee": 48000.0, "end_date": "2026-07-15"})),
    responses(
        (status = 200, description = "Batch updated", body = Batch),
        (status = 400, description = "Unknown or invalid field"),
        (status = 404, description = "Batch not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Batches"
)]
pub async fn update_batch(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let batch_id = path.into_inner();

    let update = build_update_sql("batches", &body, UPDATABLE_FIELDS, "id", batch_id)?;

    if let Some(fee) = body.get("fee") {
        if !fee.as_f64().is_some_and(|f| f >= 0.0) {
            return Err(AppError::validation("fee must be zero or more"));
        }
    }
    if let Some(faculty_id) = body.get("faculty_id") {
        let faculty_id = faculty_id
            .as_u64()
            .ok_or_else(|| AppError::validation("faculty_id must be a user id"))?;
        ensure_role(pool.get_ref(), faculty_id, Role::Faculty).await?;
    }

    let current = find_batch(pool.get_ref(), batch_id).await?;
    let start = match body.get("start_date") {
        Some(v) => serde_json::from_value::<NaiveDate>(v.clone())
            .map_err(|_| AppError::validation("start_date must be YYYY-MM-DD"))?,
        None => current.start_date,
    };
    let end = match body.get("end_date") {
        Some(v) => serde_json::from_value::<Option<NaiveDate>>(v.clone())
            .map_err(|_| AppError::validation("end_date must be YYYY-MM-DD or null"))?,
        None => current.end_date,
    };
    if matches!(end, Some(end) if end < start) {
        return Err(AppError::validation("end_date cannot be before start_date"));
    }

    execute_update(pool.get_ref(), update).await?;
    let batch = find_batch(pool.get_ref(), batch_id).await?;

    info!(batch_id, updated_by = auth.user_id, "Batch updated");
    Ok(response::ok_with_message("Batch updated", batch))
}

/// Deactivates; sessions and payments keep pointing at the batch.
#[utoipa::path(
    delete,
    path = "/api/batches/{batch_id}",
    params(("batch_id" = u64, Path, description = "Batch ID")),
    responses(
        (status = 200, description = "Batch deactivated"),
        (status = 404, description = "Batch not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Batches"
)]
pub async fn delete_batch(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let batch_id = path.into_inner();

    let result = sqlx::query("UPDATE batches SET is_active = FALSE WHERE id = ?")
        .bind(batch_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        find_batch(pool.get_ref(), batch_id).await?;
    }

    info!(batch_id, "Batch deactivated");
    Ok(response::message("Batch deactivated"))
}

#[utoipa::path(
    post,
    path = "/api/batches/{batch_id}/students",
    params(("batch_id" = u64, Path, description = "Batch ID")),
    request_body = EnrolStudents,
    responses(
        (status = 200, description = "Students enrolled", body = Object, example = json!({
            "status": "success",
            "message": "Students enrolled",
            "data": {"enrolled": 3}
        })),
        (status = 400, description = "Empty list or non-student ids"),
        (status = 404, description = "Batch not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Batches"
)]
pub async fn enrol_students(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<EnrolStudents>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let batch_id = path.into_inner();

    let mut ids = payload.student_ids.clone();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Err(AppError::validation("student_ids must not be empty"));
    }

    let batch = find_batch(pool.get_ref(), batch_id).await?;
    if !batch.is_active {
        return Err(AppError::validation("Cannot enrol into an inactive batch"));
    }

    let mut check = sqlx::QueryBuilder::<sqlx::MySql>::new(
        "SELECT id FROM users WHERE is_active = TRUE AND role_id = ",
    );
    check.push_bind(Role::Student.id()).push(" AND id IN (");
    {
        let mut list = check.separated(", ");
        for id in &ids {
            list.push_bind(*id);
        }
    }
    check.push(")");
    let students: Vec<u64> = check.build_query_scalar().fetch_all(pool.get_ref()).await?;

    if let Some(bad) = ids.iter().find(|id| !students.contains(id)) {
        return Err(AppError::validation(format!(
            "User {bad} is not an active student"
        )));
    }

    let mut insert = sqlx::QueryBuilder::<sqlx::MySql>::new(
        "INSERT IGNORE INTO batch_students (batch_id, student_id) ",
    );
    insert.push_values(&ids, |mut row, id| {
        row.push_bind(batch_id).push_bind(*id);
    });
    let enrolled = insert.build().execute(pool.get_ref()).await?.rows_affected();

    info!(batch_id, enrolled, "Students enrolled");
    Ok(response::ok_with_message(
        "Students enrolled",
        serde_json::json!({ "enrolled": enrolled }),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/batches/{batch_id}/students/{student_id}",
    params(
        ("batch_id" = u64, Path, description = "Batch ID"),
        ("student_id" = u64, Path, description = "Student user ID")
    ),
    responses(
        (status = 200, description = "Student removed"),
        (status = 404, description = "Student not enrolled in this batch")
    ),
    security(("bearer_auth" = [])),
    tag = "Batches"
)]
pub async fn remove_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<(u64, u64)>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let (batch_id, student_id) = path.into_inner();

    let result = sqlx::query("DELETE FROM batch_students WHERE batch_id = ? AND student_id = ?")
        .bind(batch_id)
        .bind(student_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Student not enrolled in this batch"));
    }

    info!(batch_id, student_id, "Student removed from batch");
    Ok(response::message("Student removed"))
}

#[utoipa::path(
    get,
    path = "/api/batches/{batch_id}/students",
    params(("batch_id" = u64, Path, description = "Batch ID")),
    responses(
        (status = 200, description = "Enrolled students", body = [BatchStudent]),
        (status = 403, description = "Faculty/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Batches"
)]
pub async fn list_students(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_staff()?;
    let batch_id = path.into_inner();
    find_batch(pool.get_ref(), batch_id).await?;

    let students = sqlx::query_as::<_, BatchStudent>(
        r#"
        SELECT bs.student_id, u.full_name, bs.joined_at, bs.extended_until
        FROM batch_students bs
        JOIN users u ON u.id = bs.student_id
        WHERE bs.batch_id = ?
        ORDER BY u.full_name
        "#,
    )
    .bind(batch_id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(response::ok(students))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::test_support::bearer;
    use actix_web::test as atest;
    use serde_json::json;

    fn batch(start: (i32, u32, u32), end: Option<(i32, u32, u32)>, fee: f64) -> CreateBatch {
        let date = |(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        CreateBatch {
            name: "FS-2026-JAN".into(),
            course: "Full Stack".into(),
            faculty_id: 7,
            start_date: date(start),
            end_date: end.map(date),
            fee,
        }
    }

    #[test]
    fn batch_dates_and_fee_are_checked() {
        assert!(batch((2026, 1, 5), Some((2026, 6, 30)), 45000.0).validate().is_ok());
        assert!(batch((2026, 1, 5), None, 0.0).validate().is_ok());
        assert!(batch((2026, 1, 5), Some((2025, 12, 31)), 1.0).validate().is_err());
        assert!(batch((2026, 1, 5), None, -1.0).validate().is_err());
        assert!(batch((2026, 1, 5), None, f64::NAN).validate().is_err());
    }

    #[actix_web::test]
    async fn faculty_cannot_create_batches() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/batches")
            .insert_header(bearer(7, Role::Faculty))
            .set_json(json!({
                "name": "X", "course": "Y", "faculty_id": 7,
                "start_date": "2026-01-05", "fee": 1000.0
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn empty_enrolment_is_rejected() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/batches/3/students")
            .insert_header(bearer(2, Role::Admin))
            .set_json(json!({"student_ids": []}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn students_cannot_see_rosters() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/batches/3/students")
            .insert_header(bearer(12, Role::Student))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }
}
