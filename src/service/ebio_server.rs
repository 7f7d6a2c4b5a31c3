//! eBioServer vendor API: webhook payloads, template sync and employee push.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::model::biometric_device::{BiometricDevice, DeviceVendor};
use crate::service::biometric::{BiometricClient, RawLog};
use crate::utils::code_cache;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[schema(example = "EBS-00231")]
    pub serial_number: String,
    #[serde(default)]
    pub logs: Vec<WebhookLog>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLog {
    #[schema(example = "FAC-0007")]
    pub employee_code: String,
    #[schema(example = "2026-03-02T08:58:40+05:30")]
    pub punch_time: String,
    #[serde(default)]
    #[schema(example = "in")]
    pub direction: String,
    pub verify_mode: Option<String>,
}

impl From<WebhookLog> for RawLog {
    fn from(log: WebhookLog) -> Self {
        RawLog {
            employee_code: log.employee_code,
            punch_time: log.punch_time,
            punch_state: log.direction,
            verify_type: log.verify_mode,
        }
    }
}

/// Enrolled fingerprint as reported by eBioServer.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledTemplate {
    pub employee_code: String,
    pub fingerprint_id: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRecord {
    #[serde(rename = "employeeCode")]
    pub biometric_code: String,
    #[serde(rename = "name")]
    pub full_name: String,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct TemplateSyncReport {
    pub fetched: usize,
    pub updated: u64,
    pub skipped: usize,
}

pub fn ensure_ebio(device: &BiometricDevice) -> Result<(), AppError> {
    if device.vendor == DeviceVendor::EbioServer {
        Ok(())
    } else {
        Err(AppError::validation("Device is not an eBioServer device"))
    }
}

/// The keyed device must be the one named in the payload.
pub fn ensure_serial_matches(device: &BiometricDevice, payload: &WebhookPayload) -> Result<(), AppError> {
    if device.serial_number.eq_ignore_ascii_case(payload.serial_number.trim()) {
        Ok(())
    } else {
        Err(AppError::validation("Serial number does not match device key"))
    }
}

impl BiometricClient {
    fn ebio_get(&self, device: &BiometricDevice, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", device.base_url(), path))
            .header("X-Api-Key", device.auth_key.as_str())
    }

    pub async fn fetch_templates(&self, device: &BiometricDevice) -> Result<Vec<EnrolledTemplate>, AppError> {
        Ok(self
            .ebio_get(device, "/api/v1/templates")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn list_employees(&self, device: &BiometricDevice) -> Result<Value, AppError> {
        Ok(self
            .ebio_get(device, "/api/v1/employees")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn push_employees(
        &self,
        device: &BiometricDevice,
        employees: &[EmployeeRecord],
    ) -> Result<usize, AppError> {
        self.http
            .post(format!("{}/api/v1/employees", device.base_url()))
            .header("X-Api-Key", device.auth_key.as_str())
            .json(&serde_json::json!({ "employees": employees }))
            .send()
            .await?
            .error_for_status()?;
        Ok(employees.len())
    }
}

/// Writes vendor fingerprint ids onto users whose biometric code matches.
pub async fn apply_templates(
    pool: &MySqlPool,
    templates: &[EnrolledTemplate],
) -> Result<TemplateSyncReport, AppError> {
    let mut report = TemplateSyncReport {
        fetched: templates.len(),
        ..Default::default()
    };

    let mut stale: Vec<String> = Vec::new();
    let mut tx = pool.begin().await?;
    for template in templates {
        let previous: Vec<String> = sqlx::query_scalar(
            "SELECT fingerprint_id FROM users WHERE biometric_code = ? AND fingerprint_id IS NOT NULL FOR UPDATE",
        )
        .bind(template.employee_code.trim())
        .fetch_all(&mut *tx)
        .await?;
        stale.extend(previous);

        let result = sqlx::query("UPDATE users SET fingerprint_id = ? WHERE biometric_code = ?")
            .bind(template.fingerprint_id.trim())
            .bind(template.employee_code.trim())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            report.skipped += 1;
        } else {
            report.updated += result.rows_affected();
        }
    }
    tx.commit().await?;

    code_cache::forget_all(stale.iter().map(String::as_str)).await;
    code_cache::forget_all(templates.iter().map(|t| t.fingerprint_id.as_str())).await;

    info!(
        fetched = report.fetched,
        updated = report.updated,
        skipped = report.skipped,
        "Fingerprint templates applied"
    );
    Ok(report)
}

pub async fn enrollable_employees(pool: &MySqlPool) -> Result<Vec<EmployeeRecord>, sqlx::Error> {
    sqlx::query_as::<_, EmployeeRecord>(
        r#"
        SELECT biometric_code, full_name
        FROM users
        WHERE is_active = TRUE AND biometric_code IS NOT NULL
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
}
