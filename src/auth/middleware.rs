use crate::auth::auth::{authenticate, bearer_token};
use crate::config::Config;
use crate::error::AppError;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};

/// Rejects unauthenticated requests and stores the decoded caller in request extensions.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App config missing"))?
        .clone();

    let outcome = match req.headers().get("Authorization") {
        None => Err(AppError::Unauthorized("Missing Authorization header".into())),
        Some(_) => match bearer_token(req.request()) {
            Some(token) => authenticate(token, &config.jwt_secret),
            None => Err(AppError::Unauthorized(
                "Authorization header must start with Bearer".into(),
            )),
        },
    };

    match outcome {
        Ok(auth_user) => {
            req.extensions_mut().insert(auth_user);
            next.call(req).await
        }
        Err(err) => {
            tracing::debug!(path = %req.path(), error = %err, "Rejected unauthenticated request");
            Ok(req.into_response(err.error_response()))
        }
    }
}
