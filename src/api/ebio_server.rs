use crate::{
    api::{
        academy_offset,
        biometric::{RegisterDevice, insert_device, keyed_push_device},
    },
    auth::auth::AuthUser,
    config::Config,
    error::AppError,
    model::{
        attendance_log::LogSource,
        biometric_device::{BiometricDevice, DeviceMode, DeviceVendor},
    },
    service::{
        biometric::{BiometricClient, RawLog, SyncReport, find_device, ingest},
        ebio_server::{
            TemplateSyncReport, WebhookPayload, apply_templates, enrollable_employees, ensure_ebio,
            ensure_serial_matches,
        },
    },
    utils::response,
};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterEbioDevice {
    #[schema(example = "Main office eBioServer")]
    pub name: String,
    #[schema(example = "EBS-00231")]
    pub serial_number: String,
    #[schema(example = "10.0.0.20")]
    pub ip_address: String,
    #[serde(default = "default_port")]
    #[schema(example = 8080)]
    pub port: u32,
    pub api_url: Option<String>,
    pub auth_key: Option<String>,
    pub location: Option<String>,
}

fn default_port() -> u32 {
    8080
}

impl From<RegisterEbioDevice> for RegisterDevice {
    fn from(d: RegisterEbioDevice) -> Self {
        RegisterDevice {
            name: d.name,
            serial_number: d.serial_number,
            vendor: DeviceVendor::EbioServer,
            mode: DeviceMode::Push,
            ip_address: d.ip_address,
            port: d.port,
            api_url: d.api_url,
            auth_key: d.auth_key,
            location: d.location,
        }
    }
}

async fn find_ebio_device(pool: &MySqlPool, device_id: u64) -> Result<BiometricDevice, AppError> {
    let device = find_device(pool, device_id).await?;
    ensure_ebio(&device)?;
    Ok(device)
}

/// Push endpoint in eBioServer's payload shape; same key policy as `/biometric/push-log`.
#[utoipa::path(
    post,
    path = "/biometric/eBioServer/webhook",
    request_body = WebhookPayload,
    params(("X-Device-Key" = String, Header, description = "Device auth key")),
    responses(
        (status = 200, description = "Logs stored", body = SyncReport),
        (status = 400, description = "Device inactive, not push, not eBioServer, or serial mismatch"),
        (status = 401, description = "Missing or unknown device key")
    ),
    tag = "eBioServer"
)]
pub async fn webhook(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<WebhookPayload>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let device = keyed_push_device(&req, pool.get_ref()).await?;
    ensure_ebio(&device)?;
    ensure_serial_matches(&device, &payload)?;

    let raw: Vec<RawLog> = payload.logs.into_iter().map(RawLog::from).collect();
    let report = ingest(
        pool.get_ref(),
        &device,
        raw,
        LogSource::Push,
        academy_offset(&config)?,
    )
    .await?;

    Ok(response::ok(report))
}

#[utoipa::path(
    post,
    path = "/api/biometric/eBioServer/device",
    request_body = RegisterEbioDevice,
    responses(
        (status = 201, description = "eBioServer device registered", body = BiometricDevice),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Serial number or key already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "eBioServer"
)]
pub async fn register_device(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<RegisterEbioDevice>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let device = insert_device(pool.get_ref(), payload.into_inner().into()).await?;
    Ok(response::created("eBioServer device registered", device))
}

#[utoipa::path(
    post,
    path = "/api/biometric/eBioServer/device/{device_id}/sync-templates",
    params(("device_id" = u64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Fingerprint ids applied", body = TemplateSyncReport),
        (status = 400, description = "Not an eBioServer device"),
        (status = 500, description = "Vendor API failure")
    ),
    security(("bearer_auth" = [])),
    tag = "eBioServer"
)]
pub async fn sync_templates(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    client: web::Data<BiometricClient>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let device = find_ebio_device(pool.get_ref(), path.into_inner()).await?;

    let templates = client.fetch_templates(&device).await?;
    let report = apply_templates(pool.get_ref(), &templates).await?;

    Ok(response::ok_with_message("Templates synced", report))
}

#[utoipa::path(
    post,
    path = "/api/biometric/eBioServer/device/{device_id}/push-employees",
    params(("device_id" = u64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Employees pushed", body = Object, example = json!({
            "status": "success",
            "data": {"pushed": 42}
        })),
        (status = 400, description = "Not an eBioServer device"),
        (status = 500, description = "Vendor API failure")
    ),
    security(("bearer_auth" = [])),
    tag = "eBioServer"
)]
pub async fn push_employees(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    client: web::Data<BiometricClient>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let device = find_ebio_device(pool.get_ref(), path.into_inner()).await?;

    let employees = enrollable_employees(pool.get_ref()).await?;
    let pushed = client.push_employees(&device, &employees).await?;
    info!(device_id = device.id, pushed, "Employees pushed to eBioServer");

    Ok(response::ok(serde_json::json!({ "pushed": pushed })))
}

#[utoipa::path(
    get,
    path = "/api/biometric/eBioServer/device/{device_id}/employees",
    params(("device_id" = u64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Vendor employee list, as returned by eBioServer", body = Object),
        (status = 400, description = "Not an eBioServer device"),
        (status = 500, description = "Vendor API failure")
    ),
    security(("bearer_auth" = [])),
    tag = "eBioServer"
)]
pub async fn employees(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    client: web::Data<BiometricClient>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let device = find_ebio_device(pool.get_ref(), path.into_inner()).await?;
    let list = client.list_employees(&device).await?;
    Ok(response::ok(list))
}
