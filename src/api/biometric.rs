use crate::{
    api::{academy_offset, local_day_bounds, require_non_empty},
    auth::auth::AuthUser,
    config::Config,
    db::is_duplicate_key,
    error::AppError,
    model::{
        attendance_log::{AttendanceLog, LogSource},
        biometric_device::{BiometricDevice, DeviceMode, DeviceStatus, DeviceVendor},
    },
    service::biometric::{
        BiometricClient, ConnectionReport, PushLogPayload, RawLog, SyncReport, check_push_device,
        ensure_pull_device, find_device, find_device_by_key, ingest, sync_window_start,
    },
    utils::{
        db_utils::{Filter, SqlValue, build_update_sql, execute_update, fetch_page},
        response::{self, Page},
    },
};
use actix_web::{HttpRequest, HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use std::str::FromStr;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

pub(crate) const DEVICE_KEY_HEADER: &str = "X-Device-Key";

const UPDATABLE_FIELDS: &[&str] = &[
    "name",
    "ip_address",
    "port",
    "api_url",
    "auth_key",
    "status",
    "mode",
    "location",
];

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterDevice {
    #[schema(example = "Lab entrance")]
    pub name: String,
    #[schema(example = "CQZ7232460")]
    pub serial_number: String,
    #[serde(default = "default_vendor")]
    pub vendor: DeviceVendor,
    #[serde(default = "default_mode")]
    pub mode: DeviceMode,
    #[schema(example = "192.168.1.201")]
    pub ip_address: String,
    #[serde(default = "default_port")]
    #[schema(example = 8090)]
    pub port: u32,
    pub api_url: Option<String>,
    /// Generated when omitted.
    pub auth_key: Option<String>,
    pub location: Option<String>,
}

fn default_vendor() -> DeviceVendor {
    DeviceVendor::Generic
}

fn default_mode() -> DeviceMode {
    DeviceMode::Pull
}

fn default_port() -> u32 {
    80
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct LogQuery {
    pub device_id: Option<u64>,
    pub user_id: Option<u64>,
    /// First academy-local day, inclusive
    #[schema(value_type = Option<String>, format = "date")]
    pub from: Option<NaiveDate>,
    /// Last academy-local day, inclusive
    #[schema(value_type = Option<String>, format = "date")]
    pub to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

fn generate_auth_key() -> String {
    uuid::Uuid::new_v4().to_simple().to_string()
}

/// Inserts a device and returns it; duplicate serial or key is a 409.
pub(crate) async fn insert_device(
    pool: &MySqlPool,
    payload: RegisterDevice,
) -> Result<BiometricDevice, AppError> {
    require_non_empty("name", &payload.name)?;
    require_non_empty("serial_number", &payload.serial_number)?;
    require_non_empty("ip_address", &payload.ip_address)?;
    if payload.port == 0 || payload.port > u32::from(u16::MAX) {
        return Err(AppError::validation("port must be between 1 and 65535"));
    }

    let auth_key = payload
        .auth_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .unwrap_or_else(generate_auth_key);

    let result = sqlx::query(
        r#"
        INSERT INTO biometric_devices
            (name, serial_number, vendor, mode, ip_address, port, api_url, auth_key, status, location)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payload.name.trim())
    .bind(payload.serial_number.trim())
    .bind(payload.vendor.to_string())
    .bind(payload.mode.to_string())
    .bind(payload.ip_address.trim())
    .bind(payload.port)
    .bind(payload.api_url.as_deref())
    .bind(&auth_key)
    .bind(DeviceStatus::Active.to_string())
    .bind(payload.location.as_deref())
    .execute(pool)
    .await;

    let device_id = match result {
        Ok(r) => r.last_insert_id(),
        Err(e) if is_duplicate_key(&e) => {
            return Err(AppError::Conflict(
                "Serial number or auth key already registered".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    info!(device_id, vendor = %payload.vendor, mode = %payload.mode, "Biometric device registered");
    find_device(pool, device_id).await
}

/// Device named by the `X-Device-Key` header, checked for push ingestion.
pub(crate) async fn keyed_push_device(
    req: &HttpRequest,
    pool: &MySqlPool,
) -> Result<BiometricDevice, AppError> {
    device_for_key(req, |key| async move { find_device_by_key(pool, &key).await }).await
}

async fn device_for_key<F, Fut>(req: &HttpRequest, lookup: F) -> Result<BiometricDevice, AppError>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<Option<BiometricDevice>, AppError>>,
{
    let key = req
        .headers()
        .get(DEVICE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing device key".into()))?;

    check_push_device(lookup(key.to_string()).await?)
}

/// Everything a push must pass before any log is written.
async fn accept_push<F, Fut>(
    req: &HttpRequest,
    payload: PushLogPayload,
    lookup: F,
) -> Result<(BiometricDevice, Vec<RawLog>), AppError>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<Option<BiometricDevice>, AppError>>,
{
    if payload.logs.is_empty() {
        return Err(AppError::validation("logs must not be empty"));
    }
    let device = device_for_key(req, lookup).await?;
    Ok((device, payload.logs.into_iter().map(RawLog::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/biometric/register-device",
    request_body = RegisterDevice,
    responses(
        (status = 201, description = "Device registered", body = BiometricDevice),
        (status = 400, description = "Missing or invalid fields"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Serial number or key already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "Biometric"
)]
pub async fn register_device(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<RegisterDevice>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let device = insert_device(pool.get_ref(), payload.into_inner()).await?;
    Ok(response::created("Device registered", device))
}

#[utoipa::path(
    get,
    path = "/api/biometric/devices",
    responses(
        (status = 200, description = "All devices", body = [BiometricDevice]),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Biometric"
)]
pub async fn list_devices(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let sql = format!(
        "SELECT {} FROM biometric_devices ORDER BY name",
        crate::model::biometric_device::DEVICE_COLUMNS
    );
    let devices = sqlx::query_as::<_, BiometricDevice>(&sql)
        .fetch_all(pool.get_ref())
        .await?;
    Ok(response::ok(devices))
}

#[utoipa::path(
    put,
    path = "/api/biometric/device/{device_id}",
    params(("device_id" = u64, Path, description = "Device ID")),
    request_body(content = Object, description = "Any of: name, ip_address, port, api_url, auth_key, status, mode, location"),
    responses(
        (status = 200, description = "Device updated", body = BiometricDevice),
        (status = 400, description = "Unknown field or invalid value"),
        (status = 404, description = "Device not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Biometric"
)]
pub async fn update_device(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let device_id = path.into_inner();
    let body = body.into_inner();

    if let Some(status) = body.get("status") {
        status
            .as_str()
            .and_then(|s| DeviceStatus::from_str(s).ok())
            .ok_or_else(|| AppError::validation("status must be active or inactive"))?;
    }
    if let Some(mode) = body.get("mode") {
        mode.as_str()
            .and_then(|s| DeviceMode::from_str(s).ok())
            .ok_or_else(|| AppError::validation("mode must be pull or push"))?;
    }

    let update = build_update_sql("biometric_devices", &body, UPDATABLE_FIELDS, "id", device_id)?;
    find_device(pool.get_ref(), device_id).await?;

    match execute_update(pool.get_ref(), update).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key(&e) => {
            return Err(AppError::Conflict("Auth key already in use".into()));
        }
        Err(e) => return Err(e.into()),
    }

    info!(device_id, updated_by = auth.user_id, "Biometric device updated");
    let device = find_device(pool.get_ref(), device_id).await?;
    Ok(response::ok_with_message("Device updated", device))
}

/// Removes a device with no ingested logs; otherwise marks it inactive so history keeps its device.
#[utoipa::path(
    delete,
    path = "/api/biometric/device/{device_id}",
    params(("device_id" = u64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Device removed or deactivated"),
        (status = 404, description = "Device not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Biometric"
)]
pub async fn delete_device(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let device = find_device(pool.get_ref(), path.into_inner()).await?;

    let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendance_logs WHERE device_id = ?")
        .bind(device.id)
        .fetch_one(pool.get_ref())
        .await?;

    if logs == 0 {
        sqlx::query("DELETE FROM biometric_devices WHERE id = ?")
            .bind(device.id)
            .execute(pool.get_ref())
            .await?;
        info!(device_id = device.id, "Biometric device deleted");
        return Ok(response::message("Device deleted"));
    }

    sqlx::query("UPDATE biometric_devices SET status = ? WHERE id = ?")
        .bind(DeviceStatus::Inactive.to_string())
        .bind(device.id)
        .execute(pool.get_ref())
        .await?;
    info!(device_id = device.id, logs, "Biometric device deactivated");
    Ok(response::message("Device has logs; deactivated instead"))
}

#[utoipa::path(
    post,
    path = "/api/biometric/device/{device_id}/test-connection",
    params(("device_id" = u64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Reachability report", body = ConnectionReport),
        (status = 404, description = "Device not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Biometric"
)]
pub async fn test_connection(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    client: web::Data<BiometricClient>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let device = find_device(pool.get_ref(), path.into_inner()).await?;
    let report = client.test_connection(&device).await;

    if !report.reachable {
        warn!(device_id = device.id, status = ?report.http_status, error = ?report.error, "Device unreachable");
    }
    Ok(response::ok(report))
}

#[utoipa::path(
    post,
    path = "/api/biometric/device/{device_id}/sync-now",
    params(("device_id" = u64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Logs pulled", body = SyncReport),
        (status = 400, description = "Inactive or push device"),
        (status = 404, description = "Device not found"),
        (status = 500, description = "Vendor API failure")
    ),
    security(("bearer_auth" = [])),
    tag = "Biometric"
)]
pub async fn sync_now(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    client: web::Data<BiometricClient>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let device = find_device(pool.get_ref(), path.into_inner()).await?;
    ensure_pull_device(&device)?;

    let offset = academy_offset(&config)?;
    let now = Utc::now();
    let raw = client
        .fetch_transactions(&device, sync_window_start(&device, now), now, offset)
        .await?;

    let report = ingest(pool.get_ref(), &device, raw, LogSource::Pull, offset).await?;
    Ok(response::ok_with_message("Sync complete", report))
}

/// Public endpoint for push-mode devices; authenticated by `X-Device-Key`.
#[utoipa::path(
    post,
    path = "/biometric/push-log",
    request_body = PushLogPayload,
    params(("X-Device-Key" = String, Header, description = "Device auth key")),
    responses(
        (status = 200, description = "Logs stored", body = SyncReport),
        (status = 400, description = "Empty payload, or device inactive or not in push mode"),
        (status = 401, description = "Missing or unknown device key")
    ),
    tag = "Biometric"
)]
pub async fn push_log(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<PushLogPayload>,
) -> Result<HttpResponse, AppError> {
    let db = pool.get_ref();
    let (device, raw) = accept_push(&req, payload.into_inner(), |key| async move {
        find_device_by_key(db, &key).await
    })
    .await?;
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
    get,
    path = "/api/biometric/logs",
    params(LogQuery),
    responses(
        (status = 200, description = "Paginated ingested logs", body = Object),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Biometric"
)]
pub async fn list_logs(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<LogQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let offset = academy_offset(&config)?;

    let mut filter = Filter::new();
    filter
        .eq_opt("device_id", query.device_id)
        .eq_opt("user_id", query.user_id);
    if let Some(from) = query.from {
        let (start, _) = local_day_bounds(from, offset);
        filter.and("punch_time >= ?", vec![SqlValue::from(start)]);
    }
    if let Some(to) = query.to {
        let (_, end) = local_day_bounds(to, offset);
        filter.and("punch_time < ?", vec![SqlValue::from(end)]);
    }

    let page = Page::new(query.page, query.per_page);
    let logs = fetch_page::<AttendanceLog>(
        pool.get_ref(),
        "id, device_id, user_id, employee_code, punch_time, punch_state, verify_type, source",
        "attendance_logs",
        &filter,
        "punch_time DESC, id DESC",
        page,
    )
    .await?;

    Ok(response::ok(logs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::test_support::bearer;
    use crate::model::role::Role;
    use crate::service::biometric::test_support::device;
    use actix_web::{ResponseError, test as atest};
    use serde_json::json;

    #[test]
    fn generated_keys_are_dashless_and_unique() {
        let a = generate_auth_key();
        let b = generate_auth_key();
        assert_eq!(a.len(), 32);
        assert!(!a.contains('-'));
        assert_ne!(a, b);
    }

    #[test]
    fn registration_defaults_to_generic_pull() {
        let payload: RegisterDevice = serde_json::from_value(json!({
            "name": "Front gate",
            "serial_number": "CQZ7232460",
            "ip_address": "192.168.1.201"
        }))
        .unwrap();
        assert_eq!(payload.vendor, DeviceVendor::Generic);
        assert_eq!(payload.mode, DeviceMode::Pull);
        assert_eq!(payload.port, 80);
        assert!(payload.auth_key.is_none());
    }

    #[actix_web::test]
    async fn push_without_key_is_unauthorized() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/biometric/push-log")
            .set_json(json!({"logs": [{"employee_code": "STU-1", "punch_time": "2026-03-02 09:00:00"}]}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn empty_push_is_rejected_before_lookup() {
        let app = test_app!();
        let req = atest::TestRequest::post()
            .uri("/biometric/push-log")
            .insert_header((DEVICE_KEY_HEADER, "device-key"))
            .set_json(json!({"logs": []}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    fn one_log() -> PushLogPayload {
        serde_json::from_value(json!({
            "logs": [{"employee_code": "STU-1", "punch_time": "2026-03-02 09:00:00"}]
        }))
        .unwrap()
    }

    fn keyed_request() -> HttpRequest {
        atest::TestRequest::post()
            .uri("/biometric/push-log")
            .insert_header((DEVICE_KEY_HEADER, "device-key"))
            .to_http_request()
    }

    #[actix_web::test]
    async fn inactive_device_push_stops_before_ingest() {
        let mut inactive = device("http://10.0.0.9", DeviceVendor::Generic, DeviceMode::Push);
        inactive.status = DeviceStatus::Inactive;

        let err = accept_push(&keyed_request(), one_log(), |key| async move {
            assert_eq!(key, "device-key");
            Ok(Some(inactive))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[actix_web::test]
    async fn active_push_device_hands_logs_to_ingest() {
        let active = device("http://10.0.0.9", DeviceVendor::Generic, DeviceMode::Push);
        let (accepted, raw) = accept_push(&keyed_request(), one_log(), |_| async move { Ok(Some(active)) })
            .await
            .unwrap();
        assert_eq!(accepted.id, 5);
        assert_eq!(raw.len(), 1);
    }

    #[actix_web::test]
    async fn unknown_key_push_is_unauthorized() {
        let err = accept_push(&keyed_request(), one_log(), |_| async move { Ok(None) })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[actix_web::test]
    async fn device_admin_needs_admin() {
        let app = test_app!();
        let req = atest::TestRequest::get()
            .uri("/api/biometric/devices")
            .insert_header(bearer(7, Role::Faculty))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn invalid_device_status_is_rejected() {
        let app = test_app!();
        let req = atest::TestRequest::put()
            .uri("/api/biometric/device/5")
            .insert_header(bearer(2, Role::Admin))
            .set_json(json!({"status": "broken"}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
