use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Inactive,
}

/// How logs reach us: we poll the device, or the device calls our webhook.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceMode {
    Pull,
    Push,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceVendor {
    Generic,
    EbioServer,
}

string_column!(DeviceStatus, DeviceMode, DeviceVendor);

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct BiometricDevice {
    pub id: u64,
    pub name: String,
    pub serial_number: String,
    #[sqlx(try_from = "String")]
    pub vendor: DeviceVendor,
    #[sqlx(try_from = "String")]
    pub mode: DeviceMode,
    pub ip_address: String,
    pub port: u32,
    pub api_url: Option<String>,
    /// Shared key devices present on push; only shown to admins.
    pub auth_key: String,
    #[sqlx(try_from = "String")]
    pub status: DeviceStatus,
    pub location: Option<String>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

pub const DEVICE_COLUMNS: &str = "id, name, serial_number, vendor, mode, ip_address, port, api_url, \
     auth_key, status, location, last_sync_at";

impl BiometricDevice {
    /// Vendor API root: the explicit URL when set, else the device's own address.
    pub fn base_url(&self) -> String {
        match self.api_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("http://{}:{}", self.ip_address, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(api_url: Option<&str>) -> BiometricDevice {
        BiometricDevice {
            id: 1,
            name: "Front gate".into(),
            serial_number: "CQZ7232460".into(),
            vendor: DeviceVendor::Generic,
            mode: DeviceMode::Pull,
            ip_address: "192.168.1.201".into(),
            port: 8090,
            api_url: api_url.map(str::to_string),
            auth_key: "k".into(),
            status: DeviceStatus::Active,
            location: None,
            last_sync_at: None,
        }
    }

    #[test]
    fn base_url_prefers_api_url() {
        assert_eq!(
            device(Some("https://bio.example.test/")).base_url(),
            "https://bio.example.test"
        );
        assert_eq!(device(None).base_url(), "http://192.168.1.201:8090");
        assert_eq!(device(Some("  ")).base_url(), "http://192.168.1.201:8090");
    }

    #[test]
    fn vendor_names() {
        assert_eq!(DeviceVendor::EbioServer.to_string(), "ebioserver");
        assert_eq!(
            DeviceStatus::try_from("inactive".to_string()).unwrap(),
            DeviceStatus::Inactive
        );
    }
}
