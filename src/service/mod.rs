pub mod approval;
pub mod biometric;
pub mod ebio_server;
pub mod punch;
pub mod session_lifecycle;
pub mod storage;
