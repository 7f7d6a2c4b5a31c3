use crate::{
    api::{
        batches, biometric, change_requests, dashboard, ebio_server, payments, portfolios, punches,
        sessions, upload, users,
    },
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::AppError,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{HttpRequest, middleware::from_fn, web};
use std::sync::Arc;
use tracing::warn;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let burst = requests_per_min.max(1);
    let per_ms = (60_000 / u64::from(burst)).max(1);

    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request(per_ms)
        .burst_size(burst)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(|| {
            warn!(requests_per_min, "Invalid rate limit; using governor defaults");
            GovernorConfig::default()
        });
    Governor::new(&cfg)
}

/// Base64 inflates uploads by 4/3; the rest of the body gets a fixed allowance.
pub fn json_body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes.saturating_mul(4) / 3 + 64 * 1024
}

fn rejected(err: impl std::fmt::Display, req: &HttpRequest) -> actix_web::Error {
    warn!(path = %req.path(), error = %err, "Rejected request input");
    AppError::validation(err.to_string()).into()
}

/// Body, query and path extractor failures answer with the `{status, message}` envelope.
pub fn extractors(cfg: &mut web::ServiceConfig, max_upload_bytes: usize) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(json_body_limit(max_upload_bytes))
            .error_handler(|err, req| rejected(err, req)),
    )
    .app_data(web::QueryConfig::default().error_handler(|err, req| rejected(err, req)))
    .app_data(web::PathConfig::default().error_handler(|err, req| rejected(err, req)));
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    extractors(cfg, config.max_upload_bytes);

    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let register_limiter = Arc::new(build_limiter(config.rate_register_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let device_limiter = Arc::new(build_limiter(config.rate_device_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/register")
                    .wrap(register_limiter.clone())
                    .route(web::post().to(handlers::register)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Devices authenticate with their own key
    cfg.service(
        web::scope("/biometric")
            .wrap(device_limiter)
            .configure(device_hooks),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .configure(protected),
    );
}

/// Push endpoints called by biometric devices, keyed by `X-Device-Key`.
pub fn device_hooks(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/push-log").route(web::post().to(biometric::push_log)))
        .service(
            web::resource("/eBioServer/webhook").route(web::post().to(ebio_server::webhook)),
        );
}

/// Everything behind the bearer token.
pub fn protected(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users")
            // /users
            .service(
                web::resource("")
                    .route(web::post().to(users::create_user))
                    .route(web::get().to(users::list_users)),
            )
            // /users/me must win over /users/{id}
            .service(web::resource("/me").route(web::get().to(users::me)))
            .service(
                web::resource("/{id}")
                    .route(web::get().to(users::get_user))
                    .route(web::put().to(users::update_user))
                    .route(web::delete().to(users::delete_user)),
            ),
    )
    .service(
        web::scope("/batches")
            .service(
                web::resource("")
                    .route(web::post().to(batches::create_batch))
                    .route(web::get().to(batches::list_batches)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(batches::get_batch))
                    .route(web::put().to(batches::update_batch))
                    .route(web::delete().to(batches::delete_batch)),
            )
            // /batches/{id}/students
            .service(
                web::resource("/{id}/students")
                    .route(web::post().to(batches::enrol_students))
                    .route(web::get().to(batches::list_students)),
            )
            .service(
                web::resource("/{id}/students/{student_id}")
                    .route(web::delete().to(batches::remove_student)),
            ),
    )
    .service(
        web::scope("/student-attendance")
            .service(web::resource("/punch-in").route(web::post().to(punches::punch_in)))
            .service(web::resource("/punch-out").route(web::post().to(punches::punch_out)))
            .service(web::resource("/break-in").route(web::post().to(punches::break_in)))
            .service(web::resource("/break-out").route(web::post().to(punches::break_out)))
            .service(web::resource("/today").route(web::get().to(punches::today)))
            .service(web::resource("/history").route(web::get().to(punches::history))),
    )
    .service(
        web::scope("/sessions")
            .service(
                web::resource("")
                    .route(web::post().to(sessions::create_session))
                    .route(web::get().to(sessions::list_sessions)),
            )
            .service(web::resource("/{id}").route(web::get().to(sessions::get_session)))
            .service(web::resource("/{id}/checkin").route(web::post().to(sessions::checkin)))
            .service(
                web::resource("/{id}/attendance")
                    .route(web::post().to(sessions::mark_attendance))
                    .route(web::get().to(sessions::get_attendance)),
            )
            .service(web::resource("/{id}/checkout").route(web::post().to(sessions::checkout)))
            .service(web::resource("/{id}/cancel").route(web::post().to(sessions::cancel))),
    )
    .service(
        web::scope("/biometric")
            .service(
                web::resource("/register-device")
                    .route(web::post().to(biometric::register_device)),
            )
            .service(web::resource("/devices").route(web::get().to(biometric::list_devices)))
            .service(
                web::resource("/device/{id}")
                    .route(web::put().to(biometric::update_device))
                    .route(web::delete().to(biometric::delete_device)),
            )
            .service(
                web::resource("/device/{id}/test-connection")
                    .route(web::post().to(biometric::test_connection)),
            )
            .service(
                web::resource("/device/{id}/sync-now").route(web::post().to(biometric::sync_now)),
            )
            .service(web::resource("/logs").route(web::get().to(biometric::list_logs)))
            // /biometric/eBioServer
            .service(
                web::scope("/eBioServer")
                    .service(
                        web::resource("/device").route(web::post().to(ebio_server::register_device)),
                    )
                    .service(
                        web::resource("/device/{id}/sync-templates")
                            .route(web::post().to(ebio_server::sync_templates)),
                    )
                    .service(
                        web::resource("/device/{id}/push-employees")
                            .route(web::post().to(ebio_server::push_employees)),
                    )
                    .service(
                        web::resource("/device/{id}/employees")
                            .route(web::get().to(ebio_server::employees)),
                    ),
            ),
    )
    .service(
        web::scope("/change-requests")
            .service(
                web::resource("")
                    .route(web::post().to(change_requests::create_request))
                    .route(web::get().to(change_requests::list_requests)),
            )
            .service(web::resource("/{id}").route(web::get().to(change_requests::get_request)))
            .service(
                web::resource("/{id}/approve")
                    .route(web::post().to(change_requests::review_request)),
            ),
    )
    .service(
        web::resource("/portfolios")
            .route(web::get().to(portfolios::list_portfolios))
            .route(web::post().to(portfolios::save_own)),
    )
    .service(
        web::resource("/portfolio/{id}/approve")
            .route(web::post().to(portfolios::review_portfolio)),
    )
    .service(
        web::scope("/students/{student_id}")
            .service(
                web::resource("/portfolio")
                    .route(web::get().to(portfolios::get_for_student))
                    .route(web::post().to(portfolios::save_for_student)),
            )
            .service(web::resource("/payments/summary").route(web::get().to(payments::summary))),
    )
    .service(
        web::scope("/payments")
            .service(
                web::resource("")
                    .route(web::post().to(payments::create_payment))
                    .route(web::get().to(payments::list_payments)),
            )
            .service(web::resource("/{id}").route(web::get().to(payments::get_payment))),
    )
    .service(web::resource("/dashboard").route(web::get().to(dashboard::dashboard)))
    .service(web::resource("/upload").route(web::post().to(upload::upload)));
}


// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new token pair; the old refresh token is revoked
