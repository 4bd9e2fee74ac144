use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: Ulid,
    pub name: String,
    pub address: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub operating_hours: Option<String>,
}

/// A bookable `(branch, date, start..end)` unit with finite capacity.
///
/// `booked_count` and `available` are a cache of the confirmed appointment
/// count. Only the booking engine writes them, and only through `apply_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Ulid,
    pub branch_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub capacity: u32,
    pub booked_count: u32,
    pub available: bool,
}

impl TimeSlot {
    /// A fresh slot with nothing booked.
    pub fn new(
        id: Ulid,
        branch_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        capacity: u32,
    ) -> Self {
        Self {
            id,
            branch_id,
            date,
            start,
            end,
            capacity,
            booked_count: 0,
            available: capacity > 0,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey {
            branch_id: self.branch_id,
            date: self.date,
            start: self.start,
        }
    }

    /// Overwrite the cached counters from an authoritative confirmed count.
    pub fn apply_count(&mut self, count: u32) {
        self.booked_count = count;
        self.available = count < self.capacity;
    }

    /// True when the cached pair agrees with itself.
    pub fn is_consistent(&self) -> bool {
        self.available == (self.booked_count < self.capacity)
    }
}

/// Unique lookup key of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub branch_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub reference: String,
    pub customer_name: String,
    /// Stored normalized (see `normalize_email`).
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: Ms,
}

impl Appointment {
    pub fn is_confirmed(&self) -> bool {
        self.status == AppointmentStatus::Confirmed
    }
}

/// Emails are matched case-insensitively and without surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Create intent for the booking engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    pub branch_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
}

/// How a customer's appointments are looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerRef {
    Email(String),
    Name(String),
}

/// WAL record format. Flat, no nesting.
///
/// Each booking engine transaction produces exactly one event, carrying the
/// slot counters it committed alongside the appointment change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BranchCreated {
        branch: Branch,
    },
    SlotCreated {
        slot: TimeSlot,
    },
    SlotCorrected {
        slot_id: Ulid,
        booked_count: u32,
        available: bool,
    },
    AppointmentBooked {
        appointment: Appointment,
        booked_count: u32,
        available: bool,
    },
    AppointmentCancelled {
        id: Ulid,
        slot_id: Ulid,
        booked_count: u32,
        available: bool,
    },
}

impl Event {
    /// The slot this event touches, if any.
    pub fn slot_id(&self) -> Option<Ulid> {
        match self {
            Event::BranchCreated { .. } => None,
            Event::SlotCreated { slot } => Some(slot.id),
            Event::SlotCorrected { slot_id, .. } | Event::AppointmentCancelled { slot_id, .. } => {
                Some(*slot_id)
            }
            Event::AppointmentBooked { appointment, .. } => Some(appointment.slot_id),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Appointment projected together with its slot and branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub id: Ulid,
    pub reference: String,
    pub status: AppointmentStatus,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub slot_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub branch_id: Ulid,
    pub branch_name: String,
    pub branch_address: String,
}

impl AppointmentRecord {
    pub fn project(appointment: &Appointment, slot: &TimeSlot, branch: &Branch) -> Self {
        Self {
            id: appointment.id,
            reference: appointment.reference.clone(),
            status: appointment.status,
            customer_name: appointment.customer_name.clone(),
            customer_email: appointment.customer_email.clone(),
            customer_phone: appointment.customer_phone.clone(),
            slot_id: slot.id,
            date: slot.date,
            start_time: slot.start,
            end_time: slot.end,
            branch_id: branch.id,
            branch_name: branch.name.clone(),
            branch_address: branch.address.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub id: Ulid,
    pub branch_id: Ulid,
    pub branch_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: u32,
    pub booked_count: u32,
    pub available: bool,
}

impl SlotInfo {
    pub fn project(slot: &TimeSlot, branch_name: &str) -> Self {
        Self {
            id: slot.id,
            branch_id: slot.branch_id,
            branch_name: branch_name.to_string(),
            date: slot.date,
            start_time: slot.start,
            end_time: slot.end,
            capacity: slot.capacity,
            booked_count: slot.booked_count,
            available: slot.available,
        }
    }
}

/// Broadcast to listeners after a committed slot mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotChange {
    pub slot_id: Ulid,
    pub capacity: u32,
    pub booked_count: u32,
    pub available: bool,
}

impl From<&TimeSlot> for SlotChange {
    fn from(slot: &TimeSlot) -> Self {
        Self {
            slot_id: slot.id,
            capacity: slot.capacity,
            booked_count: slot.booked_count,
            available: slot.available,
        }
    }
}
