use derive_more::Display;

use crate::error::AppError;
use crate::model::session::SessionStatus;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    #[display(fmt = "start")]
    Start,
    #[display(fmt = "complete")]
    Complete,
    #[display(fmt = "cancel")]
    Cancel,
}

/// `scheduled -> ongoing -> completed`, or `scheduled -> cancelled`.
pub fn transition(from: SessionStatus, action: SessionAction) -> Result<SessionStatus, AppError> {
    match (from, action) {
        (SessionStatus::Scheduled, SessionAction::Start) => Ok(SessionStatus::Ongoing),
        (SessionStatus::Ongoing, SessionAction::Complete) => Ok(SessionStatus::Completed),
        (SessionStatus::Scheduled, SessionAction::Cancel) => Ok(SessionStatus::Cancelled),
        (from, action) => Err(AppError::validation(format!(
            "Cannot {action} a session that is {from}"
        ))),
    }
}

/// Attendance may only change while the class is running.
pub fn ensure_accepts_attendance(status: SessionStatus) -> Result<(), AppError> {
    if status == SessionStatus::Ongoing {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Attendance can only be marked while the session is ongoing (session is {status})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let ongoing = transition(SessionStatus::Scheduled, SessionAction::Start).unwrap();
        assert_eq!(ongoing, SessionStatus::Ongoing);
        assert_eq!(
            transition(ongoing, SessionAction::Complete).unwrap(),
            SessionStatus::Completed
        );
    }

    #[test]
    fn cannot_complete_without_starting() {
        let err = transition(SessionStatus::Scheduled, SessionAction::Complete).unwrap_err();
        assert_eq!(err.to_string(), "Cannot complete a session that is scheduled");
    }

    #[test]
    fn terminal_states_reject_everything() {
        for from in [SessionStatus::Completed, SessionStatus::Cancelled] {
            for action in [SessionAction::Start, SessionAction::Complete, SessionAction::Cancel] {
                assert!(transition(from, action).is_err());
            }
        }
    }

    #[test]
    fn ongoing_session_cannot_be_cancelled_or_restarted() {
        assert!(transition(SessionStatus::Ongoing, SessionAction::Cancel).is_err());
        assert!(transition(SessionStatus::Ongoing, SessionAction::Start).is_err());
    }

    #[test]
    fn attendance_only_while_ongoing() {
        assert!(ensure_accepts_attendance(SessionStatus::Ongoing).is_ok());
        assert!(ensure_accepts_attendance(SessionStatus::Scheduled).is_err());
        assert!(ensure_accepts_attendance(SessionStatus::Completed).is_err());
    }
}
