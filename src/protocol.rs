use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// One request line, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateBranch {
        #[serde(default)]
        id: Option<Ulid>,
        name: String,
        address: String,
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        operating_hours: Option<String>,
    },
    CreateSlot {
        #[serde(default)]
        id: Option<Ulid>,
        branch_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        capacity: u32,
    },
    Book(BookingRequest),
    Cancel {
        reference: String,
    },
    Get {
        reference: String,
    },
    ListAppointments {
        customer: CustomerRef,
    },
    AvailableSlots {
        branch_id: Ulid,
        date: NaiveDate,
    },
    ListBranches,
    ListSlots {
        branch_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    Listen {
        slot_id: Ulid,
    },
    Unlisten {
        slot_id: Ulid,
    },
    Ping,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("too many listened slots on this connection")]
    TooManyListens,
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "PROTOCOL_ERROR",
            ProtocolError::TooManyListens => "LIMIT_EXCEEDED",
        }
    }
}

/// Parse a request line. References are handed to the engine as given;
/// an unknown one, whatever its shape, is a `NOT_FOUND` there.
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Response to one request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn data<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self::error("PROTOCOL_ERROR", format!("failed to encode reply: {e}")),
        }
    }

    pub fn empty() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

impl From<&EngineError> for Reply {
    fn from(e: &EngineError) -> Self {
        Reply::error(e.code(), e.to_string())
    }
}

impl From<&ProtocolError> for Reply {
    fn from(e: &ProtocolError) -> Self {
        Reply::error(e.code(), e.to_string())
    }
}

/// Message pushed to a connection for every change on a listened slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Push {
    pub event: String,
    #[serde(flatten)]
    pub change: SlotChange,
}

impl Push {
    pub fn slot_changed(change: SlotChange) -> Self {
        Self {
            event: "slot_changed".into(),
            change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_book() {
        let branch_id = Ulid::new();
        let line = json!({
            "op": "book",
            "customer_name": "Jane Doe",
            "customer_email": "jane@example.com",
            "branch_id": branch_id,
            "date": "2026-03-14",
            "start_time": "09:00:00"
        })
        .to_string();

        match parse_command(&line).unwrap() {
            Command::Book(req) => {
                assert_eq!(req.branch_id, branch_id);
                assert_eq!(req.customer_phone, None);
                assert_eq!(req.start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_unit_and_customer_ops() {
        assert_eq!(parse_command(r#"{"op":"ping"}"#).unwrap(), Command::Ping);
        assert_eq!(parse_command(r#"{"op":"list_branches"}"#).unwrap(), Command::ListBranches);
        assert_eq!(
            parse_command(r#"{"op":"list_appointments","customer":{"email":"a@example.com"}}"#).unwrap(),
            Command::ListAppointments {
                customer: CustomerRef::Email("a@example.com".into())
            }
        );
    }

    #[test]
    fn references_reach_the_engine_unfiltered() {
        assert_eq!(
            parse_command(r#"{"op":"cancel","reference":"APT-20260314-AB12CD"}"#).unwrap(),
            Command::Cancel {
                reference: "APT-20260314-AB12CD".into()
            }
        );
        assert_eq!(
            parse_command(r#"{"op":"get","reference":"front-desk/0042"}"#).unwrap(),
            Command::Get {
                reference: "front-desk/0042".into()
            }
        );
    }

    #[test]
    fn malformed_lines_are_protocol_errors() {
        for line in ["", "{", r#"{"op":"launch"}"#, r#"{"op":"cancel"}"#, r#"{"op":"listen","slot_id":"x"}"#] {
            let err = parse_command(line).unwrap_err();
            assert_eq!(err.code(), "PROTOCOL_ERROR", "{line}");
        }
    }

    #[test]
    fn reply_shapes() {
        let ok = serde_json::to_value(Reply::data(&vec![1, 2])).unwrap();
        assert_eq!(ok, json!({"ok": true, "data": [1, 2]}));

        let err = Reply::from(&EngineError::SlotNotAvailable("time slot is fully booked"));
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(err["ok"], json!(false));
        assert_eq!(err["error"]["code"], json!("SLOT_NOT_AVAILABLE"));
        assert!(err.get("data").is_none());
    }

    #[test]
    fn push_is_flat() {
        let slot_id = Ulid::new();
        let push = Push::slot_changed(SlotChange {
            slot_id,
            capacity: 2,
            booked_count: 2,
            available: false,
        });
        let v = serde_json::to_value(push).unwrap();
        assert_eq!(v["event"], json!("slot_changed"));
        assert_eq!(v["slot_id"], json!(slot_id.to_string()));
        assert_eq!(v["available"], json!(false));
    }
}
