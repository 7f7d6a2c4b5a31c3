use crate::{
    api::batches::{find_batch, is_enrolled},
    auth::auth::AuthUser,
    error::AppError,
    model::change_request::{
        CHANGE_REQUEST_COLUMNS, ChangeRequest, ChangeRequestDetails, ChangeRequestKind,
        ReviewStatus,
    },
    service::approval::{Decision, ReviewPayload, ensure_pending},
    utils::{
        db_utils::{Filter, fetch_page},
        response::{self, Page},
    },
};
use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde::Deserialize;
use sqlx::{MySqlConnection, MySqlPool, types::Json};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ChangeRequestQuery {
    pub status: Option<ReviewStatus>,
    pub kind: Option<ChangeRequestKind>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn find_request(pool: &MySqlPool, request_id: u64) -> Result<ChangeRequest, AppError> {
    let sql = format!("SELECT {CHANGE_REQUEST_COLUMNS} FROM change_requests WHERE id = ?");
    sqlx::query_as::<_, ChangeRequest>(&sql)
        .bind(request_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Change request not found"))
}

/// Checks that need the database: enrolment and target batch.
async fn check_against_enrolment(
    pool: &MySqlPool,
    requester_id: u64,
    details: &ChangeRequestDetails,
) -> Result<(), AppError> {
    match details {
        ChangeRequestDetails::Leave { .. } => Ok(()),
        ChangeRequestDetails::BatchChange {
            from_batch_id,
            to_batch_id,
            ..
        } => {
            if !is_enrolled(pool, *from_batch_id, requester_id).await? {
                return Err(AppError::validation("You are not enrolled in the source batch"));
            }
            let target = find_batch(pool, *to_batch_id).await?;
            if !target.is_active {
                return Err(AppError::validation("Target batch is inactive"));
            }
            Ok(())
        }
        ChangeRequestDetails::Extension {
            batch_id,
            requested_until,
            ..
        } => {
            if !is_enrolled(pool, *batch_id, requester_id).await? {
                return Err(AppError::validation("You are not enrolled in this batch"));
            }
            let batch = find_batch(pool, *batch_id).await?;
            if batch.end_date.is_some_and(|end| *requested_until <= end) {
                return Err(AppError::validation(
                    "requested_until must be after the batch end date",
                ));
            }
            Ok(())
        }
    }
}

/// Applies an approved request inside the reviewer's transaction.
async fn apply_effect(
    conn: &mut MySqlConnection,
    requester_id: u64,
    details: &ChangeRequestDetails,
) -> Result<(), AppError> {
    match details {
        ChangeRequestDetails::Leave { .. } => {}
        ChangeRequestDetails::BatchChange {
            from_batch_id,
            to_batch_id,
            ..
        } => {
            let already: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM batch_students WHERE batch_id = ? AND student_id = ?",
            )
            .bind(to_batch_id)
            .bind(requester_id)
            .fetch_one(&mut *conn)
            .await?;

            if already > 0 {
                sqlx::query("DELETE FROM batch_students WHERE batch_id = ? AND student_id = ?")
                    .bind(from_batch_id)
                    .bind(requester_id)
                    .execute(&mut *conn)
                    .await?;
            } else {
                let moved = sqlx::query(
                    "UPDATE batch_students SET batch_id = ?, joined_at = ?, extended_until = NULL \
                     WHERE batch_id = ? AND student_id = ?",
                )
                .bind(to_batch_id)
                .bind(Utc::now())
                .bind(from_batch_id)
                .bind(requester_id)
                .execute(&mut *conn)
                .await?
                .rows_affected();

                if moved == 0 {
                    return Err(AppError::validation(
                        "Student is no longer enrolled in the source batch",
                    ));
                }
            }
        }
        ChangeRequestDetails::Extension {
            batch_id,
            requested_until,
            ..
        } => {
            let updated = sqlx::query(
                "UPDATE batch_students SET extended_until = ? WHERE batch_id = ? AND student_id = ?",
            )
            .bind(requested_until)
            .bind(batch_id)
            .bind(requester_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

            if updated == 0 {
                return Err(AppError::validation("Student is no longer enrolled in the batch"));
            }
        }
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/change-requests",
    request_body = ChangeRequestDetails,
    responses(
        (status = 201, description = "Request filed", body = ChangeRequest),
        (status = 400, description = "Invalid details or not enrolled"),
        (status = 404, description = "Batch not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Change Requests"
)]
pub async fn create_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ChangeRequestDetails>,
) -> Result<HttpResponse, AppError> {
    let details = payload.into_inner();
    details.validate()?;
    check_against_enrolment(pool.get_ref(), auth.user_id, &details).await?;

    let kind = details.kind();
    let result = sqlx::query(
        "INSERT INTO change_requests (requester_id, kind, details, status) VALUES (?, ?, ?, ?)",
    )
    .bind(auth.user_id)
    .bind(kind.to_string())
    .bind(Json(&details))
    .bind(ReviewStatus::Pending.to_string())
    .execute(pool.get_ref())
    .await?;

    let request_id = result.last_insert_id();
    info!(request_id, requester_id = auth.user_id, kind = %kind, "Change request filed");

    let request = find_request(pool.get_ref(), request_id).await?;
    Ok(response::created("Change request submitted", request))
}

#[utoipa::path(
    get,
    path = "/api/change-requests",
    params(ChangeRequestQuery),
    responses(
        (status = 200, description = "Paginated requests; admins see all, others their own", body = Object)
    ),
    security(("bearer_auth" = [])),
    tag = "Change Requests"
)]
pub async fn list_requests(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ChangeRequestQuery>,
) -> Result<HttpResponse, AppError> {
    let mut filter = Filter::new();
    if !auth.is_admin() {
        filter.eq("requester_id", auth.user_id);
    }
    filter
        .eq_opt("status", query.status.map(|s| s.to_string()))
        .eq_opt("kind", query.kind.map(|k| k.to_string()));

    let page = Page::new(query.page, query.per_page);
    let requests = fetch_page::<ChangeRequest>(
        pool.get_ref(),
        CHANGE_REQUEST_COLUMNS,
        "change_requests",
        &filter,
        "created_at DESC, id DESC",
        page,
    )
    .await?;

    Ok(response::ok(requests))
}

#[utoipa::path(
    get,
    path = "/api/change-requests/{request_id}",
    params(("request_id" = u64, Path, description = "Change request ID")),
    responses(
        (status = 200, description = "Request found", body = ChangeRequest),
        (status = 403, description = "Not the requester"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Change Requests"
)]
pub async fn get_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let request = find_request(pool.get_ref(), path.into_inner()).await?;
    auth.require_self_or_admin(request.requester_id)?;
    Ok(response::ok(request))
}

/// Approval applies the request's effect in the same transaction as the status change.
#[utoipa::path(
    post,
    path = "/api/change-requests/{request_id}/approve",
    params(("request_id" = u64, Path, description = "Change request ID")),
    request_body = ReviewPayload,
    responses(
        (status = 200, description = "Request reviewed", body = ChangeRequest),
        (status = 400, description = "Already reviewed, or rejection without reason"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Change Requests"
)]
pub async fn review_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<ReviewPayload>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let decision = Decision::from_payload(&payload)?;
    let request_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let sql = format!("SELECT {CHANGE_REQUEST_COLUMNS} FROM change_requests WHERE id = ? FOR UPDATE");
    let request = sqlx::query_as::<_, ChangeRequest>(&sql)
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Change request not found"))?;
    ensure_pending(request.status)?;

    if decision == Decision::Approve {
        apply_effect(&mut *tx, request.requester_id, &request.details.0).await?;
    }

    sqlx::query(
        "UPDATE change_requests SET status = ?, reviewed_by = ?, reviewed_at = ?, rejection_reason = ? \
         WHERE id = ?",
    )
    .bind(decision.status().to_string())
    .bind(auth.user_id)
    .bind(Utc::now())
    .bind(decision.rejection_reason())
    .bind(request_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    info!(request_id, reviewer = auth.user_id, status = %decision.status(), "Change request reviewed");
    let request = find_request(pool.get_ref(), request_id).await?;
    Ok(response::ok_with_message("Change request reviewed", request))
}

#[cfg(test)]
mod tests {
    use crate::auth::auth::test_support::bearer;
    use crate::model::role::Role;
    use actix_web::test;
    use serde_json::json;

    #[actix_web::test]
    async fn leave_with_reversed_dates_is_rejected() {
        let app = test_app!();
        let req = test::TestRequest::post()
            .uri("/api/change-requests")
            .insert_header(bearer(12, Role::Student))
            .set_json(json!({
                "kind": "leave",
                "start_date": "2026-03-05",
                "end_date": "2026-03-01",
                "reason": "Family function"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn students_cannot_review() {
        let app = test_app!();
        let req = test::TestRequest::post()
            .uri("/api/change-requests/1/approve")
            .insert_header(bearer(12, Role::Student))
            .set_json(json!({"approve": true}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn rejection_needs_reason_before_lookup() {
        let app = test_app!();
        let req = test::TestRequest::post()
            .uri("/api/change-requests/1/approve")
            .insert_header(bearer(2, Role::Admin))
            .set_json(json!({"approve": false, "rejectionReason": ""}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn unauthenticated_is_401() {
        let app = test_app!();
        let req = test::TestRequest::get().uri("/api/change-requests").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }
}
