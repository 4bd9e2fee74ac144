use thiserror::Error;
use ulid::Ulid;

/// Booking engine failures.
///
/// Everything except `Storage` is client-correctable and never retried.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("slot not available: {0}")]
    SlotNotAvailable(&'static str),
    #[error("customer {email} already has an appointment for slot {slot_id}")]
    DoubleBooking { slot_id: Ulid, email: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("appointment {0} is already cancelled")]
    AlreadyCancelled(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SlotNotAvailable(_) => "SLOT_NOT_AVAILABLE",
            EngineError::DoubleBooking { .. } => "DOUBLE_BOOKING",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::AlreadyCancelled(_) => "ALREADY_CANCELLED",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::InvalidRequest(_) => "INVALID_REQUEST",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_classes() {
        let e = EngineError::SlotNotAvailable("time slot is fully booked");
        assert_eq!(e.code(), "SLOT_NOT_AVAILABLE");
        assert!(e.is_client_error());
        assert_eq!(e.to_string(), "slot not available: time slot is fully booked");

        let e = EngineError::Storage("WAL writer shut down".into());
        assert_eq!(e.code(), "STORAGE_ERROR");
        assert!(!e.is_client_error());
    }

    #[test]
    fn double_booking_message_names_customer() {
        let slot_id = Ulid::new();
        let e = EngineError::DoubleBooking {
            slot_id,
            email: "a@example.com".into(),
        };
        assert!(e.to_string().contains("a@example.com"));
        assert!(e.to_string().contains(&slot_id.to_string()));
    }
}
