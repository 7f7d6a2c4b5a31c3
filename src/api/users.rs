use crate::{
    api::require_non_empty,
    auth::{auth::AuthUser, password::hash_password},
    db::is_duplicate_key,
    error::AppError,
    model::{
        role::Role,
        user::{USER_COLUMNS, User},
    },
    utils::{
        code_cache,
        db_utils::{Filter, build_update_sql, execute_update, fetch_page},
        response::{self, Page},
        username_filter,
    },
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

const UPDATABLE_FIELDS: &[&str] = &[
    "full_name",
    "email",
    "phone",
    "biometric_code",
    "fingerprint_id",
    "is_active",
    "role_id",
    "password",
];

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "ravi.faculty")]
    pub username: String,
    #[schema(example = "initial-pass-123")]
    pub password: String,
    #[schema(example = "Ravi Menon")]
    pub full_name: String,
    #[schema(example = "faculty")]
    pub role: Role,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[schema(example = "FAC-0007")]
    pub biometric_code: Option<String>,
    pub fingerprint_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct UserQuery {
    /// Filter by role
    pub role: Option<Role>,
    /// Filter by active flag
    pub is_active: Option<bool>,
    /// Matches username, full name or email
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Only a superadmin may hand out the superadmin role.
fn ensure_may_assign(auth: &AuthUser, role: Role) -> Result<(), AppError> {
    if role == Role::SuperAdmin && auth.role != Role::SuperAdmin {
        return Err(AppError::forbidden("Only a superadmin can create superadmins"));
    }
    Ok(())
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) async fn find_user(pool: &MySqlPool, user_id: u64) -> Result<User, AppError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    sqlx::query_as::<_, User>(&sql)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

/// 400 unless `user_id` is an active user holding `role`.
pub(crate) async fn ensure_role(
    pool: &MySqlPool,
    user_id: u64,
    role: Role,
) -> Result<(), AppError> {
    let found: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM users WHERE id = ? AND role_id = ? AND is_active = TRUE",
    )
    .bind(user_id)
    .bind(role.id())
    .fetch_one(pool)
    .await?;

    if found == 0 {
        return Err(AppError::validation(format!(
            "User {user_id} is not an active {role}"
        )));
    }
    Ok(())
}

/// Superadmin accounts are changed by superadmins only.
fn ensure_may_manage(auth: &AuthUser, target: &User) -> Result<(), AppError> {
    if Role::from_id(target.role_id) == Some(Role::SuperAdmin) {
        auth.require_superadmin()?;
    }
    Ok(())
}

async fn forget_codes(user: &User) {
    code_cache::forget_all(
        [&user.biometric_code, &user.fingerprint_id]
            .into_iter()
            .flatten()
            .map(String::as_str),
    )
    .await;
}

#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Username, email or biometric code taken")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    ensure_may_assign(&auth, payload.role)?;

    let username = payload.username.trim().to_lowercase();
    require_non_empty("username", &username)?;
    require_non_empty("full_name", &payload.full_name)?;
    if payload.password.chars().count() < 8 {
        return Err(AppError::validation("password must be at least 8 characters"));
    }

    if !username_filter::is_username_available(&username, pool.get_ref()).await? {
        return Err(AppError::Conflict("Username already taken".into()));
    }

    let hashed = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Password hashing failed");
        AppError::internal(e.to_string())
    })?;

    let result = sqlx::query(
        r#"
        INSERT INTO users
            (username, password, role_id, full_name, email, phone, biometric_code, fingerprint_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&username)
    .bind(hashed)
    .bind(payload.role.id())
    .bind(payload.full_name.trim())
    .bind(trimmed(&payload.email))
    .bind(trimmed(&payload.phone))
    .bind(trimmed(&payload.biometric_code))
    .bind(trimmed(&payload.fingerprint_id))
    .execute(pool.get_ref())
    .await;

    let user_id = match result {
        Ok(done) => done.last_insert_id(),
        Err(e) if is_duplicate_key(&e) => {
            return Err(AppError::Conflict(
                "Username, email or biometric code already in use".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    username_filter::insert(&username);
    info!(user_id, role = %payload.role, created_by = auth.user_id, "User created");

    let user = find_user(pool.get_ref(), user_id).await?;
    // a code cached for another user's fingerprint must not shadow this one
    forget_codes(&user).await;
    Ok(response::created("User created", user))
}

#[utoipa::path(
    get,
    path = "/api/users",
    params(UserQuery),
    responses(
        (status = 200, description = "Paginated users", body = Object),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let mut filter = Filter::new();
    filter
        .eq_opt("role_id", query.role.map(|r| u64::from(r.id())))
        .eq_opt("is_active", query.is_active)
        .search(&["username", "full_name", "email"], query.search.as_deref());

    let page = Page::new(query.page, query.per_page);
    let users = fetch_page::<User>(pool.get_ref(), USER_COLUMNS, "users", &filter, "id DESC", page)
        .await?;

    Ok(response::ok(users))
}

#[utoipa::path(
    get,
    path = "/api/users/me",
    responses(
        (status = 200, description = "The caller's profile", body = User),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn me(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let user = find_user(pool.get_ref(), auth.user_id).await?;
    Ok(response::ok(user))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = User),
        (status = 403, description = "Not the caller and not an admin"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    auth.require_self_or_admin(user_id)?;

    let user = find_user(pool.get_ref(), user_id).await?;
    Ok(response::ok(user))
}

/// Partial update. `password` is re-hashed; `role_id` 1 needs a superadmin.
#[utoipa::path(
    put,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    request_body(content = Object, example = json!({"phone": "+919811111111", "biometric_code": "STU-0044"})),
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 400, description = "Unknown or invalid field"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let user_id = path.into_inner();
    let mut body = body.into_inner();

    if let Some(obj) = body.as_object_mut() {
        if let Some(role_id) = obj.get("role_id") {
            let role = role_id
                .as_u64()
                .and_then(|id| u8::try_from(id).ok())
                .and_then(Role::from_id)
                .ok_or_else(|| AppError::validation("role_id must be between 1 and 5"))?;
            ensure_may_assign(&auth, role)?;
        }

        if let Some(password) = obj.get("password") {
            let password = password
                .as_str()
                .filter(|p| p.chars().count() >= 8)
                .ok_or_else(|| AppError::validation("password must be at least 8 characters"))?;
            let hashed = hash_password(password).map_err(|e| AppError::internal(e.to_string()))?;
            obj.insert("password".into(), Value::String(hashed));
        }
    }

    let update = build_update_sql("users", &body, UPDATABLE_FIELDS, "id", user_id)?;
    let before = find_user(pool.get_ref(), user_id).await?;
    ensure_may_manage(&auth, &before)?;

    match execute_update(pool.get_ref(), update).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key(&e) => {
            return Err(AppError::Conflict("Email or biometric code already in use".into()));
        }
        Err(e) => return Err(e.into()),
    }

    info!(user_id, updated_by = auth.user_id, "User updated");
    let user = find_user(pool.get_ref(), user_id).await?;

    // old and new vendor codes may both be cached for other users
    forget_codes(&before).await;
    forget_codes(&user).await;
    Ok(response::ok_with_message("User updated", user))
}

/// Soft delete: the account is deactivated and its refresh tokens revoked.
#[utoipa::path(
    delete,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deactivated"),
        (status = 400, description = "Cannot deactivate yourself"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    if user_id == auth.user_id {
        return Err(AppError::validation("You cannot deactivate your own account"));
    }

    let user = find_user(pool.get_ref(), user_id).await?;
    ensure_may_manage(&auth, &user)?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET is_active = FALSE WHERE id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    forget_codes(&user).await;
    info!(user_id, deactivated_by = auth.user_id, "User deactivated");

    Ok(response::message("User deactivated"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::test_support::bearer;
    use actix_web::test as atest;
    use chrono::Utc;
    use serde_json::json;

    fn account(id: u64, role: Role) -> User {
        User {
            id,
            username: format!("user{id}"),
            role_id: role.id(),
            full_name: "Test User".into(),
            email: None,
            phone: None,
            biometric_code: None,
            fingerprint_id: None,
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    fn caller(user_id: u64, role: Role) -> AuthUser {
        AuthUser {
            user_id,
            username: format!("user{user_id}"),
            role,
        }
    }

    #[test]
    fn only_superadmins_manage_superadmin_accounts() {
        let root = account(1, Role::SuperAdmin);
        let err = ensure_may_manage(&caller(2, Role::Admin), &root).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(ensure_may_manage(&caller(3, Role::SuperAdmin), &root).is_ok());

        assert!(ensure_may_manage(&caller(2, Role::Admin), &account(40, Role::Faculty)).is_ok());
    }

    #[actix_web::test]
    async fn listing_users_requires_a_token() {
        let app = test_app!();
        let resp = atest::call_service(&app, atest::TestRequest::get().uri("/api/users").to_request()).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn students_cannot_create_users() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/users")
            .insert_header(bearer(12, Role::Student))
            .set_json(json!({
                "username": "new.faculty",
                "password": "long-enough-pass",
                "full_name": "New Faculty",
                "role": "faculty"
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn admin_cannot_mint_superadmin() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/api/users")
            .insert_header(bearer(2, Role::Admin))
            .set_json(json!({
                "username": "root2",
                "password": "long-enough-pass",
                "full_name": "Root Two",
                "role": "superadmin"
            }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn student_cannot_read_someone_else() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/users/99")
            .insert_header(bearer(12, Role::Student))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn update_rejects_bad_role_before_touching_db() {
        let app = test_app!();
        let req = atest::TestRequest::put()
            .uri("/api/users/40")
            .insert_header(bearer(2, Role::Admin))
            .set_json(json!({"role_id": 9}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let req = atest::TestRequest::put()
            .uri("/api/users/40")
            .insert_header(bearer(2, Role::Admin))
            .set_json(json!({"password": "short"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn admin_cannot_deactivate_self() {
        let app = test_app!();
        let req = atest::TestRequest::delete()
            .uri("/api/users/2")
            .insert_header(bearer(2, Role::Admin))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
