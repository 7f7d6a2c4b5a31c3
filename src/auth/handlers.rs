use crate::{
    auth::{
        auth::bearer_token,
        jwt::{generate_access_token, generate_refresh_token, verify_token},
        password::{hash_password, verify_password},
    },
    config::Config,
    db::is_duplicate_key,
    error::AppError,
    model::role::Role,
    models::{Claims, LoginReqDto, RegisterReq, TokenType, UserSql},
    utils::{response, username_filter},
};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Serialize;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: u64,
    pub username: String,
    pub role: Role,
}

fn token_error(e: jsonwebtoken::errors::Error) -> AppError {
    error!(error = %e, "Failed to sign token");
    AppError::internal(e.to_string())
}

async fn store_refresh_token(pool: &MySqlPool, claims: &Claims) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(claims.user_id)
    .bind(&claims.jti)
    .bind(claims.exp as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Issues an access token and a persisted refresh token.
async fn issue_pair(
    pool: &MySqlPool,
    config: &Config,
    user_id: u64,
    username: &str,
    role: u8,
) -> Result<TokenPair, AppError> {
    let access_token = generate_access_token(
        user_id,
        username.to_string(),
        role,
        &config.jwt_secret,
        config.access_token_ttl,
    )
    .map_err(token_error)?;

    let (refresh_token, refresh_claims) = generate_refresh_token(
        user_id,
        username.to_string(),
        role,
        &config.jwt_secret,
        config.refresh_token_ttl,
    )
    .map_err(token_error)?;

    debug!(user_id, jti = %refresh_claims.jti, "Storing refresh token");
    store_refresh_token(pool, &refresh_claims).await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

fn refresh_claims(req: &HttpRequest, secret: &str) -> Option<Claims> {
    let token = bearer_token(req)?;
    let claims = verify_token(token, secret).ok()?;
    (claims.token_type == TokenType::Refresh).then_some(claims)
}

/// Self-registration; the account is always a student.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterReq,
    responses(
        (status = 201, description = "User registered", body = Object, example = json!({
            "status": "success",
            "message": "User registered successfully",
            "data": {"id": 12}
        })),
        (status = 400, description = "Missing or weak credentials"),
        (status = 409, description = "Username already taken")
    ),
    tag = "Auth"
)]
pub async fn register(
    user: web::Json<RegisterReq>,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, AppError> {
    let username = user.username.trim().to_lowercase();
    let full_name = user.full_name.trim();

    if username.is_empty() || full_name.is_empty() {
        return Err(AppError::validation("username and full_name are required"));
    }
    if user.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if !username_filter::is_username_available(&username, pool.get_ref()).await? {
        return Err(AppError::Conflict("Username already taken".into()));
    }

    let hashed = hash_password(&user.password).map_err(|e| {
        error!(error = %e, "Password hashing failed");
        AppError::internal(e.to_string())
    })?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, password, role_id, full_name, email, phone)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&username)
    .bind(hashed)
    .bind(Role::Student.id())
    .bind(full_name)
    .bind(user.email.as_deref().map(str::trim))
    .bind(user.phone.as_deref().map(str::trim))
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(done) => {
            username_filter::insert(&username);
            info!(username = %username, "User registered");
            Ok(response::created(
                "User registered successfully",
                serde_json::json!({ "id": done.last_insert_id() }),
            ))
        }
        Err(e) if is_duplicate_key(&e) => {
            // the filter may be cold right after startup
            username_filter::insert(&username);
            Err(AppError::Conflict("Username or email already registered".into()))
        }
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Tokens issued", body = LoginResponse),
        (status = 400, description = "Username or password missing"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account deactivated")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(username = %user.username)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    let username = user.username.trim().to_lowercase();
    if username.is_empty() || user.password.is_empty() {
        return Err(AppError::validation("Username or password required"));
    }

    let db_user = sqlx::query_as::<_, UserSql>(
        r#"
        SELECT id, username, password, role_id, is_active
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(&username)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| {
        info!("Invalid credentials: user not found");
        AppError::Unauthorized("Invalid credentials".into())
    })?;

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    if !db_user.is_active {
        return Err(AppError::forbidden("Account is deactivated"));
    }

    let role = Role::from_id(db_user.role_id)
        .ok_or_else(|| AppError::internal(format!("unknown role id {}", db_user.role_id)))?;

    let pair = issue_pair(
        pool.get_ref(),
        &config,
        db_user.id,
        &db_user.username,
        db_user.role_id,
    )
    .await?;

    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        // not fatal for the login itself
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = db_user.id, "Login successful");

    Ok(response::ok(LoginResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user_id: db_user.id,
        username: db_user.username,
        role,
    }))
}

/// Rotates a refresh token (sent as the bearer token).
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Missing, invalid or revoked refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let claims = refresh_claims(&req, &config.jwt_secret)
        .ok_or_else(|| AppError::Unauthorized("Valid refresh token required".into()))?;

    let mut tx = pool.begin().await?;

    let record = sqlx::query_as::<_, (u64, bool)>(
        "SELECT id, revoked FROM refresh_tokens WHERE jti = ? FOR UPDATE",
    )
    .bind(&claims.jti)
    .fetch_optional(&mut *tx)
    .await?;

    let token_id = match record {
        Some((id, false)) => id,
        _ => return Err(AppError::Unauthorized("Refresh token revoked".into())),
    };

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(token_id)
        .execute(&mut *tx)
        .await?;

    // role or activation may have changed since the token was issued
    let (role_id, is_active) =
        sqlx::query_as::<_, (u8, bool)>("SELECT role_id, is_active FROM users WHERE id = ?")
            .bind(claims.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User no longer exists".into()))?;

    if !is_active {
        tx.commit().await?;
        return Err(AppError::forbidden("Account is deactivated"));
    }

    tx.commit().await?;

    let pair = issue_pair(pool.get_ref(), &config, claims.user_id, &claims.sub, role_id).await?;
    debug!(user_id = claims.user_id, "Refresh token rotated");

    Ok(response::ok(pair))
}

/// Revokes the presented refresh token. Always 204.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    if let Some(claims) = refresh_claims(&req, &config.jwt_secret) {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
            .bind(&claims.jti)
            .execute(pool.get_ref())
            .await?;
        info!(user_id = claims.user_id, "Logged out");
    }

    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::test_support::bearer;
    use crate::db::lazy_pool;
    use actix_web::{App, test};
    use serde_json::json;

    macro_rules! auth_app {
        () => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(lazy_pool()))
                    .app_data(web::Data::new(Config::for_tests()))
                    .route("/auth/register", web::post().to(register))
                    .route("/auth/login", web::post().to(login))
                    .route("/auth/refresh", web::post().to(refresh_token))
                    .route("/auth/logout", web::post().to(logout)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn register_rejects_short_password() {
        let app = auth_app!();
        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({"username": "asha", "password": "short", "full_name": "Asha K"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn register_requires_full_name() {
        let app = auth_app!();
        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({"username": "asha", "password": "long-enough", "full_name": " "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn login_requires_credentials() {
        let app = auth_app!();
        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({"username": "", "password": ""}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Username or password required");
    }

    #[actix_web::test]
    async fn refresh_rejects_access_token() {
        let app = auth_app!();
        let req = test::TestRequest::post()
            .uri("/auth/refresh")
            .insert_header(bearer(3, Role::Student))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn logout_without_refresh_token_is_no_content() {
        let app = auth_app!();
        let req = test::TestRequest::post()
            .uri("/auth/logout")
            .insert_header(bearer(3, Role::Student))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 204);
    }
}
