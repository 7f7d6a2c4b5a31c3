use crate::api::batches::{CreateBatch, EnrolStudents};
use crate::api::biometric::RegisterDevice;
use crate::api::dashboard::{AdminDashboard, Dashboard, FacultyDashboard, MemberDashboard};
use crate::api::ebio_server::RegisterEbioDevice;
use crate::api::payments::{CreatePayment, PaymentSummary};
use crate::api::portfolios::PortfolioReq;
use crate::api::punches::{BreakReq, PunchOutReq, PunchReq, TodayPunch};
use crate::api::sessions::{AttendanceMark, CreateSession, MarkAttendance};
use crate::api::users::CreateUser;
use crate::auth::handlers::{LoginResponse, TokenPair};
use crate::model::attendance::{AttendanceEntry, AttendanceStatus};
use crate::model::attendance_log::{AttendanceLog, LogSource, PunchState};
use crate::model::batch::{Batch, BatchStudent};
use crate::model::biometric_device::{BiometricDevice, DeviceMode, DeviceStatus, DeviceVendor};
use crate::model::change_request::{
    ChangeRequest, ChangeRequestDetails, ChangeRequestKind, ReviewStatus,
};
use crate::model::payment::{Payment, PaymentMethod};
use crate::model::portfolio::{Portfolio, PortfolioProject};
use crate::model::role::Role;
use crate::model::session::{Session, SessionStatus};
use crate::model::student_punch::{BreakSegment, StudentPunch};
use crate::model::user::User;
use crate::models::{LoginReqDto, RegisterReq};
use crate::service::approval::ReviewPayload;
use crate::service::biometric::{ConnectionReport, PushLogEntry, PushLogPayload, SyncReport};
use crate::service::ebio_server::{TemplateSyncReport, WebhookLog, WebhookPayload};
use crate::service::storage::{StoredFile, UploadReq};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Training Academy API",
        version = "1.0.0",
        description = r#"
## Training Academy Management

Backend for a training academy: students, faculty and staff.

### Key Features
- **Punch card**: daily punch in/out with breaks, photo and location
- **Sessions**: scheduling, faculty check-in/check-out and per-student attendance
- **Biometric devices**: pull sync from vendor APIs, push webhooks, eBioServer integration
- **Change requests**: leave, batch change and extension, with admin review
- **Portfolios**, **batches**, **payments** and a role-shaped **dashboard**

### Security
Endpoints under `/api` take a **JWT Bearer** access token.
Device push endpoints under `/biometric` take the device key in `X-Device-Key`.

### Response Format
`{status, message?, data?}`; lists return `{items, page, per_page, total}`.
"#,
    ),
    paths(
        crate::auth::handlers::register,
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::users::create_user,
        crate::api::users::list_users,
        crate::api::users::me,
        crate::api::users::get_user,
        crate::api::users::update_user,
        crate::api::users::delete_user,

        crate::api::batches::create_batch,
        crate::api::batches::list_batches,
        crate::api::batches::get_batch,
        crate::api::batches::update_batch,
        crate::api::batches::delete_batch,
        crate::api::batches::enrol_students,
        crate::api::batches::remove_student,
        crate::api::batches::list_students,

        crate::api::punches::punch_in,
        crate::api::punches::punch_out,
        crate::api::punches::break_in,
        crate::api::punches::break_out,
        crate::api::punches::today,
        crate::api::punches::history,

        crate::api::sessions::create_session,
        crate::api::sessions::list_sessions,
        crate::api::sessions::get_session,
        crate::api::sessions::checkin,
        crate::api::sessions::mark_attendance,
        crate::api::sessions::get_attendance,
        crate::api::sessions::checkout,
        crate::api::sessions::cancel,

        crate::api::biometric::register_device,
        crate::api::biometric::list_devices,
        crate::api::biometric::update_device,
        crate::api::biometric::delete_device,
        crate::api::biometric::test_connection,
        crate::api::biometric::sync_now,
        crate::api::biometric::push_log,
        crate::api::biometric::list_logs,

        crate::api::ebio_server::webhook,
        crate::api::ebio_server::register_device,
        crate::api::ebio_server::sync_templates,
        crate::api::ebio_server::push_employees,
        crate::api::ebio_server::employees,

        crate::api::change_requests::create_request,
        crate::api::change_requests::list_requests,
        crate::api::change_requests::get_request,
        crate::api::change_requests::review_request,

        crate::api::portfolios::list_portfolios,
        crate::api::portfolios::save_own,
        crate::api::portfolios::get_for_student,
        crate::api::portfolios::save_for_student,
        crate::api::portfolios::review_portfolio,

        crate::api::payments::create_payment,
        crate::api::payments::list_payments,
        crate::api::payments::get_payment,
        crate::api::payments::summary,

        crate::api::dashboard::dashboard,
        crate::api::upload::upload
    ),
    components(
        schemas(
            RegisterReq,
            LoginReqDto,
            LoginResponse,
            TokenPair,
            Role,
            User,
            CreateUser,
            Batch,
            BatchStudent,
            CreateBatch,
            EnrolStudents,
            StudentPunch,
            BreakSegment,
            PunchReq,
            PunchOutReq,
            BreakReq,
            TodayPunch,
            Session,
            SessionStatus,
            CreateSession,
            AttendanceMark,
            MarkAttendance,
            AttendanceStatus,
            AttendanceEntry,
            BiometricDevice,
            DeviceVendor,
            DeviceMode,
            DeviceStatus,
            RegisterDevice,
            RegisterEbioDevice,
            AttendanceLog,
            PunchState,
            LogSource,
            PushLogPayload,
            PushLogEntry,
            WebhookPayload,
            WebhookLog,
            SyncReport,
            ConnectionReport,
            TemplateSyncReport,
            ChangeRequest,
            ChangeRequestDetails,
            ChangeRequestKind,
            ReviewStatus,
            ReviewPayload,
            Portfolio,
            PortfolioProject,
            PortfolioReq,
            Payment,
            PaymentMethod,
            CreatePayment,
            PaymentSummary,
            Dashboard,
            AdminDashboard,
            FacultyDashboard,
            MemberDashboard,
            UploadReq,
            StoredFile
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Registration, login and token refresh"),
        (name = "Users", description = "User administration"),
        (name = "Batches", description = "Batches and enrolment"),
        (name = "Punch", description = "Daily punch card with breaks"),
        (name = "Sessions", description = "Class sessions and attendance"),
        (name = "Biometric", description = "Biometric devices and ingested logs"),
        (name = "eBioServer", description = "eBioServer vendor integration"),
        (name = "Change Requests", description = "Leave, batch change and extension requests"),
        (name = "Portfolios", description = "Student portfolios and review"),
        (name = "Payments", description = "Fee payments"),
        (name = "Dashboard", description = "Role-shaped counters"),
        (name = "Upload", description = "Document and photo upload"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_protected_path_is_documented_with_bearer_scheme() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/sessions/{session_id}/checkin"));
        assert!(doc.paths.paths.contains_key("/biometric/push-log"));
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
