/// Lets a strum-backed enum be read from a VARCHAR column via `#[sqlx(try_from = "String")]`.
macro_rules! string_column {
    ($($ty:ty),*) => {$(
        impl TryFrom<String> for $ty {
            type Error = strum::ParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    )*};
}

pub mod attendance;
pub mod attendance_log;
pub mod batch;
pub mod biometric_device;
pub mod change_request;
pub mod payment;
pub mod portfolio;
pub mod role;
pub mod session;
pub mod student_punch;
pub mod user;
