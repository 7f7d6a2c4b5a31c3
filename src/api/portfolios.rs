use crate::{
    api::{require_non_empty, users::ensure_role},
    auth::auth::AuthUser,
    error::AppError,
    model::{
        change_request::ReviewStatus,
        portfolio::{PORTFOLIO_COLUMNS, Portfolio, PortfolioProject},
        role::Role,
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
use sqlx::{MySqlPool, types::Json};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema)]
pub struct PortfolioReq {
    #[schema(example = "Full stack developer")]
    pub title: String,
    pub summary: Option<String>,
    #[serde(default)]
    #[schema(example = json!(["Rust", "SQL", "React"]))]
    pub skills: Vec<String>,
    #[serde(default)]
    pub projects: Vec<PortfolioProject>,
}

impl PortfolioReq {
    fn validate(&self) -> Result<(), AppError> {
        require_non_empty("title", &self.title)?;
        if self.skills.iter().any(|s| s.trim().is_empty()) {
            return Err(AppError::validation("skills must not contain blank entries"));
        }
        if let Some(i) = self.projects.iter().position(|p| p.title.trim().is_empty()) {
            return Err(AppError::validation(format!("projects[{i}].title is required")));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct PortfolioQuery {
    pub status: Option<ReviewStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn find_by_student(pool: &MySqlPool, student_id: u64) -> Result<Portfolio, AppError> {
    let sql = format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE student_id = ?");
    sqlx::query_as::<_, Portfolio>(&sql)
        .bind(student_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Portfolio not found"))
}

/// Creates or replaces the student's portfolio; any edit sends it back for review.
async fn upsert(pool: &MySqlPool, student_id: u64, req: PortfolioReq) -> Result<Portfolio, AppError> {
    req.validate()?;

    sqlx::query(
        r#"
        INSERT INTO portfolios (student_id, title, summary, skills, projects, status, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            title = VALUES(title),
            summary = VALUES(summary),
            skills = VALUES(skills),
            projects = VALUES(projects),
            status = VALUES(status),
            reviewed_by = NULL,
            reviewed_at = NULL,
            rejection_reason = NULL,
            updated_at = VALUES(updated_at)
        "#,
    )
    .bind(student_id)
    .bind(req.title.trim())
    .bind(req.summary.as_deref())
    .bind(Json(&req.skills))
    .bind(Json(&req.projects))
    .bind(ReviewStatus::Pending.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    find_by_student(pool, student_id).await
}

#[utoipa::path(
    get,
    path = "/api/portfolios",
    params(PortfolioQuery),
    responses(
        (status = 200, description = "Paginated portfolios", body = Object),
        (status = 403, description = "Faculty/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Portfolios"
)]
pub async fn list_portfolios(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PortfolioQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_staff()?;

    let mut filter = Filter::new();
    filter.eq_opt("status", query.status.map(|s| s.to_string()));

    let page = Page::new(query.page, query.per_page);
    let portfolios = fetch_page::<Portfolio>(
        pool.get_ref(),
        PORTFOLIO_COLUMNS,
        "portfolios",
        &filter,
        "updated_at DESC",
        page,
    )
    .await?;

    Ok(response::ok(portfolios))
}

#[utoipa::path(
    post,
    path = "/api/portfolios",
    request_body = PortfolioReq,
    responses(
        (status = 200, description = "Portfolio saved and pending review", body = Portfolio),
        (status = 400, description = "Missing title or blank entries"),
        (status = 403, description = "Students only")
    ),
    security(("bearer_auth" = [])),
    tag = "Portfolios"
)]
pub async fn save_own(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<PortfolioReq>,
) -> Result<HttpResponse, AppError> {
    if auth.role != Role::Student {
        return Err(AppError::forbidden("Only students keep a portfolio"));
    }

    let portfolio = upsert(pool.get_ref(), auth.user_id, payload.into_inner()).await?;
    info!(student_id = auth.user_id, "Portfolio saved");
    Ok(response::ok_with_message("Portfolio saved", portfolio))
}

#[utoipa::path(
    get,
    path = "/api/students/{student_id}/portfolio",
    params(("student_id" = u64, Path, description = "Student user ID")),
    responses(
        (status = 200, description = "Portfolio found", body = Portfolio),
        (status = 403, description = "Not the owner or staff"),
        (status = 404, description = "No portfolio yet")
    ),
    security(("bearer_auth" = [])),
    tag = "Portfolios"
)]
pub async fn get_for_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let student_id = path.into_inner();
    if auth.user_id != student_id {
        auth.require_staff()?;
    }
    let portfolio = find_by_student(pool.get_ref(), student_id).await?;
    Ok(response::ok(portfolio))
}

#[utoipa::path(
    post,
    path = "/api/students/{student_id}/portfolio",
    params(("student_id" = u64, Path, description = "Student user ID")),
    request_body = PortfolioReq,
    responses(
        (status = 200, description = "Portfolio saved and pending review", body = Portfolio),
        (status = 400, description = "Invalid portfolio or user is not a student"),
        (status = 403, description = "Faculty/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Portfolios"
)]
pub async fn save_for_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<PortfolioReq>,
) -> Result<HttpResponse, AppError> {
    auth.require_staff()?;
    let student_id = path.into_inner();
    payload.validate()?;
    ensure_role(pool.get_ref(), student_id, Role::Student).await?;

    let portfolio = upsert(pool.get_ref(), student_id, payload.into_inner()).await?;
    info!(student_id, saved_by = auth.user_id, "Portfolio saved on behalf of student");
    Ok(response::ok_with_message("Portfolio saved", portfolio))
}

#[utoipa::path(
    post,
    path = "/api/portfolio/{portfolio_id}/approve",
    params(("portfolio_id" = u64, Path, description = "Portfolio ID")),
    request_body = ReviewPayload,
    responses(
        (status = 200, description = "Portfolio reviewed", body = Portfolio),
        (status = 400, description = "Already reviewed, or rejection without reason"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Portfolio not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Portfolios"
)]
pub async fn review_portfolio(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<ReviewPayload>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let decision = Decision::from_payload(&payload)?;
    let portfolio_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let sql = format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE id = ? FOR UPDATE");
    let portfolio = sqlx::query_as::<_, Portfolio>(&sql)
        .bind(portfolio_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Portfolio not found"))?;
    ensure_pending(portfolio.status)?;

    sqlx::query(
        "UPDATE portfolios SET status = ?, reviewed_by = ?, reviewed_at = ?, rejection_reason = ? \
         WHERE id = ?",
    )
    .bind(decision.status().to_string())
    .bind(auth.user_id)
    .bind(Utc::now())
    .bind(decision.rejection_reason())
    .bind(portfolio_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    info!(portfolio_id, reviewer = auth.user_id, status = %decision.status(), "Portfolio reviewed");
    let portfolio = find_by_student(pool.get_ref(), portfolio.student_id).await?;
    Ok(response::ok_with_message("Portfolio reviewed", portfolio))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::test_support::bearer;
    use actix_web::test as atest;
    use serde_json::json;

    #[test]
    fn blank_project_title_is_reported_by_index() {
        let req: PortfolioReq = serde_json::from_value(json!({
            "title": "Backend developer",
            "skills": ["Rust"],
            "projects": [
                {"title": "Chat server"},
                {"title": " ", "url": "https://example.test"}
            ]
        }))
        .unwrap();
        let err = req.validate().unwrap_err();
        assert_eq!(err.to_string(), "projects[1].title is required");
    }

    #[actix_web::test]
    async fn faculty_cannot_save_own_portfolio() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/portfolios")
            .insert_header(bearer(7, Role::Faculty))
            .set_json(json!({"title": "Mine"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn students_cannot_read_others_portfolio() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/students/13/portfolio")
            .insert_header(bearer(12, Role::Student))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn student_portfolio_without_title_is_rejected() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/portfolios")
            .insert_header(bearer(12, Role::Student))
            .set_json(json!({"title": "", "skills": ["Rust"]}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
