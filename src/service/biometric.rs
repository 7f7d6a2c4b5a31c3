//! Biometric device integration: vendor HTTP calls for pull devices, key
//! checks for push devices, and mapping vendor records onto local users.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::model::attendance_log::{LogSource, NewAttendanceLog, PunchState};
use crate::model::biometric_device::{
    BiometricDevice, DEVICE_COLUMNS, DeviceMode, DeviceStatus, DeviceVendor,
};
use crate::utils::code_cache;

const VENDOR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Upper bound on vendor pages followed in one sync.
const MAX_PAGES: usize = 50;
const PAGE_SIZE: u32 = 500;

/// Vendor-neutral log record, before user resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLog {
    pub employee_code: String,
    pub punch_time: String,
    pub punch_state: String,
    pub verify_type: Option<String>,
}

/// Transaction page returned by the generic (BioTime style) device API.
#[derive(Debug, Deserialize)]
pub struct TransactionPage {
    #[serde(default)]
    pub count: u32,
    pub next: Option<String>,
    #[serde(default)]
    pub data: Vec<VendorTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct VendorTransaction {
    pub emp_code: String,
    pub punch_time: String,
    #[serde(default)]
    pub punch_state: String,
    pub verify_type_display: Option<String>,
}

impl From<VendorTransaction> for RawLog {
    fn from(t: VendorTransaction) -> Self {
        RawLog {
            employee_code: t.emp_code,
            punch_time: t.punch_time,
            punch_state: t.punch_state,
            verify_type: t.verify_type_display,
        }
    }
}

/// Body of `POST /biometric/push-log`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PushLogPayload {
    pub logs: Vec<PushLogEntry>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PushLogEntry {
    #[serde(alias = "emp_code")]
    #[schema(example = "STU-0012")]
    pub employee_code: String,
    #[schema(example = "2026-03-02 09:01:12")]
    pub punch_time: String,
    #[serde(default)]
    #[schema(example = "0")]
    pub punch_state: String,
    pub verify_type: Option<String>,
}

impl From<PushLogEntry> for RawLog {
    fn from(e: PushLogEntry) -> Self {
        RawLog {
            employee_code: e.employee_code,
            punch_time: e.punch_time,
            punch_state: e.punch_state,
            verify_type: e.verify_type,
        }
    }
}

#[derive(Debug, Default, Serialize, PartialEq, ToSchema)]
pub struct SyncReport {
    pub fetched: usize,
    pub inserted: u64,
    pub skipped: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionReport {
    pub reachable: bool,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

/// Vendor punch states: ZK style digits or words.
pub fn punch_state_from_vendor(raw: &str) -> PunchState {
    match raw.trim().to_ascii_lowercase().as_str() {
        "0" | "in" | "checkin" | "check_in" | "check-in" => PunchState::CheckIn,
        "1" | "out" | "checkout" | "check_out" | "check-out" => PunchState::CheckOut,
        _ => PunchState::Unknown,
    }
}

/// Vendor timestamps are either RFC 3339 or naive local time at the academy offset.
pub fn parse_vendor_time(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, VENDOR_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Default, PartialEq)]
pub struct MappedLogs {
    pub logs: Vec<NewAttendanceLog>,
    pub skipped: usize,
}

/// Keeps records whose code resolved to a user and whose time parses; counts the rest.
pub fn map_logs(raw: Vec<RawLog>, resolved: &HashMap<String, u64>, offset: FixedOffset) -> MappedLogs {
    let mut mapped = MappedLogs::default();

    for record in raw {
        let code = record.employee_code.trim();
        let Some(&user_id) = resolved.get(code) else {
            debug!(employee_code = code, "Skipping log for unknown employee");
            mapped.skipped += 1;
            continue;
        };
        let Some(punch_time) = parse_vendor_time(&record.punch_time, offset) else {
            warn!(employee_code = code, punch_time = %record.punch_time, "Skipping log with unreadable time");
            mapped.skipped += 1;
            continue;
        };

        mapped.logs.push(NewAttendanceLog {
            user_id,
            employee_code: code.to_string(),
            punch_time,
            punch_state: punch_state_from_vendor(&record.punch_state),
            verify_type: record.verify_type,
        });
    }

    mapped
}

/// Device presenting `key` must exist, be a push device and be active.
pub fn check_push_device(device: Option<BiometricDevice>) -> Result<BiometricDevice, AppError> {
    let device = device.ok_or_else(|| AppError::Unauthorized("Unknown device key".into()))?;

    if device.status != DeviceStatus::Active {
        return Err(AppError::validation("Device is inactive"));
    }
    if device.mode != DeviceMode::Push {
        return Err(AppError::validation("Device is not configured for push"));
    }
    Ok(device)
}

pub async fn find_device(pool: &MySqlPool, device_id: u64) -> Result<BiometricDevice, AppError> {
    let sql = format!("SELECT {DEVICE_COLUMNS} FROM biometric_devices WHERE id = ?");
    sqlx::query_as::<_, BiometricDevice>(&sql)
        .bind(device_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Device not found"))
}

pub async fn find_device_by_key(
    pool: &MySqlPool,
    auth_key: &str,
) -> Result<Option<BiometricDevice>, AppError> {
    let sql = format!("SELECT {DEVICE_COLUMNS} FROM biometric_devices WHERE auth_key = ?");
    Ok(sqlx::query_as::<_, BiometricDevice>(&sql)
        .bind(auth_key)
        .fetch_optional(pool)
        .await?)
}

/// INSERT IGNORE so a record already seen from this device is not stored twice.
pub async fn insert_logs(
    pool: &MySqlPool,
    device_id: u64,
    source: LogSource,
    logs: &[NewAttendanceLog],
) -> Result<u64, sqlx::Error> {
    if logs.is_empty() {
        return Ok(0);
    }

    let mut qb = sqlx::QueryBuilder::<sqlx::MySql>::new(
        "INSERT IGNORE INTO attendance_logs \
         (device_id, user_id, employee_code, punch_time, punch_state, verify_type, source) ",
    );
    qb.push_values(logs, |mut row, log| {
        row.push_bind(device_id)
            .push_bind(log.user_id)
            .push_bind(log.employee_code.as_str())
            .push_bind(log.punch_time)
            .push_bind(log.punch_state.to_string())
            .push_bind(log.verify_type.as_deref())
            .push_bind(source.to_string());
    });

    Ok(qb.build().execute(pool).await?.rows_affected())
}

/// Resolve, map, store and stamp `last_sync_at`.
pub async fn ingest(
    pool: &MySqlPool,
    device: &BiometricDevice,
    raw: Vec<RawLog>,
    source: LogSource,
    offset: FixedOffset,
) -> Result<SyncReport, AppError> {
    let fetched = raw.len();
    let codes: Vec<String> = raw.iter().map(|r| r.employee_code.trim().to_string()).collect();
    let resolved = code_cache::resolve_codes(pool, &codes).await?;

    let mapped = map_logs(raw, &resolved, offset);
    let inserted = insert_logs(pool, device.id, source, &mapped.logs).await?;

    sqlx::query("UPDATE biometric_devices SET last_sync_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(device.id)
        .execute(pool)
        .await?;

    info!(
        device_id = device.id,
        source = %source,
        fetched,
        inserted,
        skipped = mapped.skipped,
        "Biometric logs ingested"
    );

    Ok(SyncReport {
        fetched,
        inserted,
        skipped: mapped.skipped,
    })
}

/// Shared HTTP client for vendor APIs.
#[derive(Clone)]
pub struct BiometricClient {
    pub(crate) http: reqwest::Client,
}

impl BiometricClient {
    pub fn new(timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { http })
    }

    fn authorized(&self, device: &BiometricDevice, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match device.vendor {
            DeviceVendor::Generic => {
                request.header("Authorization", format!("Token {}", device.auth_key))
            }
            DeviceVendor::EbioServer => request.header("X-Api-Key", device.auth_key.as_str()),
        }
    }

    pub async fn test_connection(&self, device: &BiometricDevice) -> ConnectionReport {
        let path = match device.vendor {
            DeviceVendor::Generic => "/iclock/api/terminals/?page_size=1",
            DeviceVendor::EbioServer => "/api/v1/status",
        };
        let url = format!("{}{}", device.base_url(), path);

        match self.authorized(device, &url).send().await {
            Ok(resp) => ConnectionReport {
                reachable: resp.status().is_success(),
                http_status: Some(resp.status().as_u16()),
                error: None,
            },
            Err(e) => ConnectionReport {
                reachable: false,
                http_status: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Follows `next` links until exhausted or `MAX_PAGES` is reached.
    pub async fn fetch_transactions(
        &self,
        device: &BiometricDevice,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<Vec<RawLog>, AppError> {
        let start = since.with_timezone(&offset).format(VENDOR_TIME_FORMAT).to_string();
        let end = until.with_timezone(&offset).format(VENDOR_TIME_FORMAT).to_string();

        let page_size = PAGE_SIZE.to_string();
        let first = reqwest::Url::parse_with_params(
            &format!("{}/iclock/api/transactions/", device.base_url()),
            &[
                ("start_time", start.as_str()),
                ("end_time", end.as_str()),
                ("page_size", page_size.as_str()),
            ],
        )
        .map_err(|e| AppError::validation(format!("Invalid device URL: {e}")))?;

        let mut logs = Vec::new();
        let mut next = Some(first.to_string());
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages == MAX_PAGES {
                warn!(device_id = device.id, "Stopped following vendor pages at limit");
                break;
            }
            pages += 1;

            let page: TransactionPage = self
                .authorized(device, &url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            debug!(device_id = device.id, count = page.count, "Fetched transaction page");
            logs.extend(page.data.into_iter().map(RawLog::from));
            next = page.next.filter(|n| !n.is_empty());
        }

        Ok(logs)
    }
}

/// Pull-mode sync window start: last sync, else the previous 24 hours.
pub fn sync_window_start(device: &BiometricDevice, now: DateTime<Utc>) -> DateTime<Utc> {
    device
        .last_sync_at
        .unwrap_or_else(|| now - chrono::Duration::hours(24))
}

pub fn ensure_pull_device(device: &BiometricDevice) -> Result<(), AppError> {
    if device.status != DeviceStatus::Active {
        return Err(AppError::validation("Device is inactive"));
    }
    if device.mode != DeviceMode::Pull {
        return Err(AppError::validation(
            "Push devices deliver logs through the webhook",
        ));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::device;
    use super::*;
    use chrono::TimeZone;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    fn raw(code: &str, time: &str, state: &str) -> RawLog {
        RawLog {
            employee_code: code.into(),
            punch_time: time.into(),
            punch_state: state.into(),
            verify_type: Some("Fingerprint".into()),
        }
    }

    #[test]
    fn vendor_states() {
        assert_eq!(punch_state_from_vendor("0"), PunchState::CheckIn);
        assert_eq!(punch_state_from_vendor("OUT"), PunchState::CheckOut);
        assert_eq!(punch_state_from_vendor("5"), PunchState::Unknown);
    }

    #[test]
    fn naive_vendor_time_uses_academy_offset() {
        let parsed = parse_vendor_time("2026-03-02 09:30:00", ist()).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap());

        let rfc = parse_vendor_time("2026-03-02T09:30:00Z", ist()).unwrap();
        assert_eq!(rfc, Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap());

        assert!(parse_vendor_time("yesterday", ist()).is_none());
    }

    #[test]
    fn unresolved_codes_are_skipped_not_stored() {
        let resolved = HashMap::from([("STU-1".to_string(), 11u64)]);
        let mapped = map_logs(
            vec![
                raw("STU-1", "2026-03-02 09:00:00", "0"),
                raw("GHOST", "2026-03-02 09:01:00", "0"),
                raw("STU-1", "not a time", "1"),
            ],
            &resolved,
            ist(),
        );

        assert_eq!(mapped.skipped, 2);
        assert_eq!(mapped.logs.len(), 1);
        assert_eq!(mapped.logs[0].user_id, 11);
        assert_eq!(mapped.logs[0].punch_state, PunchState::CheckIn);
    }

    #[test]
    fn inactive_push_device_is_rejected() {
        let mut d = device("http://x", DeviceVendor::Generic, DeviceMode::Push);
        d.status = DeviceStatus::Inactive;
        assert!(matches!(
            check_push_device(Some(d)),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            check_push_device(None),
            Err(AppError::Unauthorized(_))
        ));

        let pull = device("http://x", DeviceVendor::Generic, DeviceMode::Pull);
        assert!(check_push_device(Some(pull)).is_err());
    }

    #[test]
    fn pull_only_sync() {
        let push = device("http://x", DeviceVendor::Generic, DeviceMode::Push);
        assert!(ensure_pull_device(&push).is_err());
        let pull = device("http://x", DeviceVendor::Generic, DeviceMode::Pull);
        assert!(ensure_pull_device(&pull).is_ok());
    }

    #[test]
    fn window_defaults_to_last_day() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let mut d = device("http://x", DeviceVendor::Generic, DeviceMode::Pull);
        assert_eq!(sync_window_start(&d, now), now - chrono::Duration::hours(24));
        d.last_sync_at = Some(now - chrono::Duration::minutes(5));
        assert_eq!(sync_window_start(&d, now), now - chrono::Duration::minutes(5));
    }

    #[actix_web::test]
    async fn fetches_transactions_from_vendor() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/iclock/api/transactions/")
            .match_query(mockito::Matcher::Any)
            .match_header("authorization", "Token device-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"count":2,"next":null,"previous":null,"msg":"","code":0,"data":[
                    {"id":1,"emp_code":"STU-1","punch_time":"2026-03-02 09:00:00","punch_state":"0","verify_type_display":"Fingerprint","terminal_sn":"AF6A"},
                    {"id":2,"emp_code":"STU-2","punch_time":"2026-03-02 18:00:00","punch_state":"1","verify_type_display":null,"terminal_sn":"AF6A"}
                ]}"#,
            )
            .create_async()
            .await;

        let client = BiometricClient::new(2).unwrap();
        let d = device(&server.url(), DeviceVendor::Generic, DeviceMode::Pull);
        let now = Utc::now();
        let logs = client
            .fetch_transactions(&d, now - chrono::Duration::hours(1), now, ist())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].employee_code, "STU-2");
        assert_eq!(logs[1].punch_state, "1");
    }

    #[actix_web::test]
    async fn vendor_error_status_surfaces_as_internal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/iclock/api/transactions/")
            .match_query(mockito::Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let client = BiometricClient::new(2).unwrap();
        let d = device(&server.url(), DeviceVendor::Generic, DeviceMode::Pull);
        let now = Utc::now();
        let err = client
            .fetch_transactions(&d, now - chrono::Duration::hours(1), now, ist())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[actix_web::test]
    async fn test_connection_reports_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/status")
            .match_header("x-api-key", "device-key")
            .with_status(200)
            .create_async()
            .await;

        let client = BiometricClient::new(2).unwrap();
        let d = device(&server.url(), DeviceVendor::EbioServer, DeviceMode::Push);
        let report = client.test_connection(&d).await;
        assert!(report.reachable);
        assert_eq!(report.http_status, Some(200));

        let dead = device("http://127.0.0.1:9", DeviceVendor::Generic, DeviceMode::Pull);
        let report = client.test_connection(&dead).await;
        assert!(!report.reachable);
        assert!(report.error.is_some());
    }
}
