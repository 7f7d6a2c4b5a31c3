use actix_web::{HttpResponse, web};
use tracing::info;

use crate::auth::auth::AuthUser;
use crate::error::AppError;
use crate::service::storage::{StoredFile, UploadReq, UploadStore};
use crate::utils::response;

#[utoipa::path(
    post,
    path = "/api/upload",
    request_body = UploadReq,
    responses(
        (status = 201, description = "File stored", body = StoredFile),
        (status = 400, description = "Bad extension, invalid base64 or file too large")
    ),
    security(("bearer_auth" = [])),
    tag = "Upload"
)]
pub async fn upload(
    auth: AuthUser,
    store: web::Data<UploadStore>,
    payload: web::Json<UploadReq>,
) -> Result<HttpResponse, AppError> {
    let stored = store.save(&payload.file_name, &payload.content_base64).await?;
    info!(user_id = auth.user_id, path = %stored.path, size = stored.size, "File uploaded");
    Ok(response::created("File uploaded", stored))
}
