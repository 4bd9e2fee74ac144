use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

fn required(value: &str, max: usize, empty: &'static str, long: &'static str) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::InvalidRequest(empty));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(long));
    }
    Ok(value.to_string())
}

fn optional(value: Option<String>, max: usize, long: &'static str) -> Result<Option<String>, EngineError> {
    let Some(value) = value else { return Ok(None) };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(long));
    }
    Ok(Some(value.to_string()))
}

/// Only the shape `local@domain` is checked; deliverability is the notifier's problem.
fn email(value: &str) -> Result<String, EngineError> {
    let email = normalize_email(value);
    if email.is_empty() {
        return Err(EngineError::InvalidRequest("customer email is required"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("customer email too long"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => Ok(email),
        _ => Err(EngineError::InvalidRequest("customer email is malformed")),
    }
}

/// Trim, normalize and bound a booking request.
pub(crate) fn booking_request(req: BookingRequest) -> Result<BookingRequest, EngineError> {
    Ok(BookingRequest {
        customer_name: required(
            &req.customer_name,
            MAX_NAME_LEN,
            "customer name is required",
            "customer name too long",
        )?,
        customer_email: email(&req.customer_email)?,
        customer_phone: optional(req.customer_phone, MAX_PHONE_LEN, "customer phone too long")?,
        ..req
    })
}

pub(crate) fn branch(branch: Branch) -> Result<Branch, EngineError> {
    let contact_email = match branch.email {
        Some(e) if !e.trim().is_empty() => Some(email(&e)?),
        _ => None,
    };
    Ok(Branch {
        id: branch.id,
        name: required(&branch.name, MAX_NAME_LEN, "branch name is required", "branch name too long")?,
        address: required(
            &branch.address,
            MAX_ADDRESS_LEN,
            "branch address is required",
            "branch address too long",
        )?,
        phone: optional(branch.phone, MAX_PHONE_LEN, "branch phone too long")?,
        email: contact_email,
        operating_hours: optional(
            branch.operating_hours,
            MAX_OPERATING_HOURS_LEN,
            "operating hours too long",
        )?,
    })
}

pub(crate) fn slot(slot: &TimeSlot) -> Result<(), EngineError> {
    if slot.capacity == 0 {
        return Err(EngineError::InvalidRequest("capacity must be at least 1"));
    }
    if slot.capacity > MAX_SLOT_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    if slot.start >= slot.end {
        return Err(EngineError::InvalidRequest("slot start must be before end"));
    }
    Ok(())
}

pub(crate) fn date_range(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if from > to {
        return Err(EngineError::InvalidRequest("range start must not be after end"));
    }
    if (to - from).num_days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use ulid::Ulid;

    fn request(name: &str, email: &str) -> BookingRequest {
        BookingRequest {
            customer_name: name.into(),
            customer_email: email.into(),
            customer_phone: Some("  ".into()),
            branch_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn booking_request_is_normalized() {
        let req = booking_request(request("  Jane Doe ", " Jane@Example.com")).unwrap();
        assert_eq!(req.customer_name, "Jane Doe");
        assert_eq!(req.customer_email, "jane@example.com");
        assert_eq!(req.customer_phone, None);
    }

    #[test]
    fn booking_request_rejects_bad_input() {
        assert!(matches!(
            booking_request(request("   ", "a@example.com")),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            booking_request(request("Jane", "not-an-email")),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            booking_request(request("Jane", "a@b@c")),
            Err(EngineError::InvalidRequest(_))
        ));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            booking_request(request(&long, "a@example.com")),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn slot_bounds() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        assert!(slot(&TimeSlot::new(Ulid::new(), Ulid::new(), d, nine, ten, 1)).is_ok());
        assert!(slot(&TimeSlot::new(Ulid::new(), Ulid::new(), d, nine, ten, 0)).is_err());
        assert!(slot(&TimeSlot::new(Ulid::new(), Ulid::new(), d, ten, nine, 1)).is_err());
        assert!(slot(&TimeSlot::new(Ulid::new(), Ulid::new(), d, nine, nine, 1)).is_err());
        assert!(matches!(
            slot(&TimeSlot::new(Ulid::new(), Ulid::new(), d, nine, ten, MAX_SLOT_CAPACITY + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn range_bounds() {
        let a = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert!(date_range(a, b).is_ok());
        assert!(date_range(a, a).is_ok());
        assert!(date_range(b, a).is_err());
        let far = NaiveDate::from_ymd_opt(2028, 1, 1).unwrap();
        assert!(matches!(date_range(a, far), Err(EngineError::LimitExceeded(_))));
    }
}
