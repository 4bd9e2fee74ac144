use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedSlot = Arc<RwLock<TimeSlot>>;

/// Time slots, each behind its own lock. The write guard of a slot is the
/// transaction scope for that slot and every appointment referencing it.
pub struct SlotStore {
    slots: DashMap<Ulid, SharedSlot>,
    by_key: DashMap<SlotKey, Ulid>,
    by_branch_date: DashMap<(Ulid, NaiveDate), Vec<Ulid>>,
}

impl Default for SlotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            by_key: DashMap::new(),
            by_branch_date: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains_key(&self, key: &SlotKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn get(&self, id: &Ulid) -> Option<SharedSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn ids(&self) -> Vec<Ulid> {
        self.slots.iter().map(|e| *e.key()).collect()
    }

    /// Register a new slot. The caller has checked the key is free.
    pub fn insert(&self, slot: TimeSlot) {
        let key = slot.key();
        let id = slot.id;
        self.by_key.insert(key, id);
        self.by_branch_date
            .entry((slot.branch_id, slot.date))
            .or_default()
            .push(id);
        self.slots.insert(id, Arc::new(RwLock::new(slot)));
    }

    /// Exact `(branch, date, start)` lookup, regardless of availability.
    pub fn find_slot(&self, branch_id: Ulid, date: NaiveDate, start: NaiveTime) -> Option<SharedSlot> {
        let key = SlotKey {
            branch_id,
            date,
            start,
        };
        let id = *self.by_key.get(&key)?.value();
        self.get(&id)
    }

    async fn snapshot(&self, ids: &[Ulid]) -> Vec<TimeSlot> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(shared) = self.get(id) {
                out.push(shared.read().await.clone());
            }
        }
        out
    }

    /// Available slots of one branch on one date, by start time.
    pub async fn find_slots_for_branch_and_date(&self, branch_id: Ulid, date: NaiveDate) -> Vec<TimeSlot> {
        let ids = self
            .by_branch_date
            .get(&(branch_id, date))
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut slots: Vec<TimeSlot> = self
            .snapshot(&ids)
            .await
            .into_iter()
            .filter(|s| s.available)
            .collect();
        slots.sort_by_key(|s| s.start);
        slots
    }

    /// Every slot of a branch within `[from, to]`, by date then start time.
    pub async fn slots_for_branch_between(&self, branch_id: Ulid, from: NaiveDate, to: NaiveDate) -> Vec<TimeSlot> {
        let ids: Vec<Ulid> = self
            .by_branch_date
            .iter()
            .filter(|e| e.key().0 == branch_id && e.key().1 >= from && e.key().1 <= to)
            .flat_map(|e| e.value().clone())
            .collect();
        let mut slots = self.snapshot(&ids).await;
        slots.sort_by_key(|s| (s.date, s.start));
        slots
    }
}

/// Appointment records plus the lookup indexes the engine needs.
///
/// Rows for a slot are only written while that slot's write lock is held,
/// which keeps `count_confirmed_for_slot` stable inside a transaction.
pub struct AppointmentStore {
    appointments: DashMap<Ulid, Appointment>,
    by_reference: DashMap<String, Ulid>,
    by_slot: DashMap<Ulid, Vec<Ulid>>,
    by_email: DashMap<String, Vec<Ulid>>,
    by_name: DashMap<String, Vec<Ulid>>,
}

impl Default for AppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentStore {
    pub fn new() -> Self {
        Self {
            appointments: DashMap::new(),
            by_reference: DashMap::new(),
            by_slot: DashMap::new(),
            by_email: DashMap::new(),
            by_name: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn find_by_reference(&self, reference: &str) -> Option<Appointment> {
        let id = *self.by_reference.get(reference)?.value();
        self.get(&id)
    }

    pub fn reference_exists(&self, reference: &str) -> bool {
        self.by_reference.contains_key(reference)
    }

    /// All appointments of a customer, any status, unordered.
    pub fn find_by_customer(&self, customer: &CustomerRef) -> Vec<Appointment> {
        let ids = match customer {
            CustomerRef::Email(email) => self.by_email.get(&normalize_email(email)),
            CustomerRef::Name(name) => self.by_name.get(name.trim()),
        }
        .map(|e| e.value().clone())
        .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn for_slot(&self, slot_id: &Ulid) -> Vec<Appointment> {
        let ids = self
            .by_slot
            .get(slot_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Authoritative count of non-cancelled appointments on a slot.
    pub fn count_confirmed_for_slot(&self, slot_id: &Ulid) -> u32 {
        let Some(ids) = self.by_slot.get(slot_id) else {
            return 0;
        };
        ids.iter()
            .filter(|id| {
                self.appointments
                    .get(id)
                    .is_some_and(|a| a.status != AppointmentStatus::Cancelled)
            })
            .count() as u32
    }

    pub fn exists_confirmed_for_slot_and_customer(&self, slot_id: &Ulid, email: &str) -> bool {
        let email = normalize_email(email);
        let Some(ids) = self.by_slot.get(slot_id) else {
            return false;
        };
        ids.iter().any(|id| {
            self.appointments
                .get(id)
                .is_some_and(|a| a.is_confirmed() && a.customer_email == email)
        })
    }

    /// Insert a new appointment or replace an existing one by id.
    pub fn save(&self, appointment: Appointment) {
        if !self.appointments.contains_key(&appointment.id) {
            self.by_reference
                .insert(appointment.reference.clone(), appointment.id);
            self.by_slot
                .entry(appointment.slot_id)
                .or_default()
                .push(appointment.id);
            self.by_email
                .entry(normalize_email(&appointment.customer_email))
                .or_default()
                .push(appointment.id);
            self.by_name
                .entry(appointment.customer_name.trim().to_string())
                .or_default()
                .push(appointment.id);
        }
        self.appointments.insert(appointment.id, appointment);
    }

    /// Flip a stored appointment to cancelled. Returns false if unknown.
    pub fn mark_cancelled(&self, id: &Ulid) -> bool {
        match self.appointments.get_mut(id) {
            Some(mut a) => {
                a.status = AppointmentStatus::Cancelled;
                true
            }
            None => false,
        }
    }
}
