use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::config::Config;
use crate::error::AppError;

/// Device hooks plus the protected routes under `/api` behind the auth middleware,
/// without rate limiting. Handler tests only.
#[cfg(test)]
macro_rules! test_app {
    () => {
        test_app!(crate::service::storage::UploadStore::new(
            std::env::temp_dir().join("academy-test-uploads"),
            1024,
        ))
    };
    ($store:expr) => {{
        let store: crate::service::storage::UploadStore = $store;
        let max_upload_bytes = store.max_bytes();
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new(crate::db::lazy_pool()))
                .app_data(actix_web::web::Data::new(crate::config::Config::for_tests()))
                .app_data(actix_web::web::Data::new(
                    crate::service::biometric::BiometricClient::new(2).unwrap(),
                ))
                .app_data(actix_web::web::Data::new(store))
                .configure(|cfg| crate::routes::extractors(cfg, max_upload_bytes))
                .service(
                    actix_web::web::scope("/biometric").configure(crate::routes::device_hooks),
                )
                .service(
                    actix_web::web::scope("/api")
                        .wrap(actix_web::middleware::from_fn(
                            crate::auth::middleware::auth_middleware,
                        ))
                        .configure(crate::routes::protected),
                ),
        )
        .await
    }};
}

pub mod batches;
pub mod biometric;
pub mod change_requests;
pub mod dashboard;
pub mod ebio_server;
pub mod payments;
pub mod portfolios;
pub mod punches;
pub mod sessions;
pub mod upload;
pub mod users;

/// Academy offset from config; validated at startup.
pub(crate) fn academy_offset(config: &Config) -> Result<FixedOffset, AppError> {
    config
        .utc_offset()
        .map_err(|e| AppError::internal(e.to_string()))
}

/// Calendar date at the academy offset.
pub(crate) fn local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// `[start, end)` of a local calendar day, in UTC.
pub(crate) fn local_day_bounds(date: NaiveDate, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = date.and_time(NaiveTime::MIN) - Duration::seconds(i64::from(offset.local_minus_utc()));
    let start = Utc.from_utc_datetime(&midnight);
    (start, start + Duration::days(1))
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        Err(AppError::validation(format!("{field} is required")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_day_is_shifted_by_offset() {
        let ist = FixedOffset::east_opt(330 * 60).unwrap();
        // 20:00 UTC is already the next morning in IST
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap();
        assert_eq!(local_date(at, ist), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());

        let (start, end) = local_day_bounds(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(), ist);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap());
        assert_eq!(end - start, Duration::days(1));
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert!(require_non_empty("topic", "  ").is_err());
        assert!(require_non_empty("topic", "Ownership").is_ok());
    }
}
