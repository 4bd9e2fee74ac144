use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{APPOINTMENTS_BOOKED_TOTAL, APPOINTMENTS_CANCELLED_TOTAL, BOOKINGS_REJECTED_TOTAL};

use super::validate::{self, now_ms};
use super::{Engine, EngineError, Notice, WalCommand};

impl Engine {
    pub async fn create_branch(&self, branch: Branch) -> Result<Branch, EngineError> {
        let branch = validate::branch(branch)?;
        let catalog = self.catalog.clone().lock_owned().await;
        if self.branches.len() >= MAX_BRANCHES {
            return Err(EngineError::LimitExceeded("too many branches"));
        }
        if self.branches.contains_key(&branch.id) {
            return Err(EngineError::AlreadyExists(format!("branch {}", branch.id)));
        }

        let event = Event::BranchCreated { branch: branch.clone() };
        let branches = self.branches.clone();
        let stored = branch.clone();
        self.commit(event, move || {
            branches.insert(stored.id, stored);
            drop(catalog);
        })
        .await?;
        info!(branch_id = %branch.id, name = %branch.name, "branch created");
        Ok(branch)
    }

    /// Register a slot. Counters always start at zero booked, available.
    pub async fn create_slot(&self, slot: TimeSlot) -> Result<TimeSlot, EngineError> {
        validate::slot(&slot)?;
        let slot = TimeSlot::new(slot.id, slot.branch_id, slot.date, slot.start, slot.end, slot.capacity);
        let catalog = self.catalog.clone().lock_owned().await;
        if !self.branches.contains_key(&slot.branch_id) {
            return Err(EngineError::NotFound(format!("branch {}", slot.branch_id)));
        }
        if self.slots.len() >= MAX_SLOTS {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        if self.slots.get(&slot.id).is_some() || self.slots.contains_key(&slot.key()) {
            return Err(EngineError::AlreadyExists(format!(
                "slot {} {} at branch {}",
                slot.date, slot.start, slot.branch_id
            )));
        }

        let event = Event::SlotCreated { slot: slot.clone() };
        let slots = self.slots.clone();
        let stored = slot.clone();
        self.commit(event, move || {
            slots.insert(stored);
            drop(catalog);
        })
        .await?;
        info!(slot_id = %slot.id, branch_id = %slot.branch_id, date = %slot.date, start = %slot.start, capacity = slot.capacity, "slot created");
        Ok(slot)
    }

    /// Draw references until one is unused.
    fn unique_reference(&self) -> Result<String, EngineError> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let reference = self.references.generate();
            if !self.appointments.reference_exists(&reference) {
                return Ok(reference);
            }
            debug!(%reference, "booking reference collision, drawing again");
        }
        Err(EngineError::Storage("could not generate a unique booking reference".into()))
    }

    /// Book a customer into the slot at `(branch, date, start)`.
    ///
    /// Everything from the duplicate check to the counter update runs under
    /// the slot's write lock, so at most `capacity` confirmed appointments can
    /// ever reference the slot. The capacity decision uses the live confirmed
    /// count; the cached `available` flag is rewritten on both outcomes.
    /// Once the event is handed to the WAL the lock stays held until it is
    /// applied, even if this future is dropped.
    pub async fn book_appointment(&self, req: BookingRequest) -> Result<AppointmentRecord, EngineError> {
        let req = validate::booking_request(req)?;
        let shared = self
            .slots
            .find_slot(req.branch_id, req.date, req.start_time)
            .ok_or_else(|| {
                metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => "no_slot").increment(1);
                EngineError::SlotNotAvailable("time slot not available")
            })?;
        let mut slot = shared.write_owned().await;

        if self
            .appointments
            .exists_confirmed_for_slot_and_customer(&slot.id, &req.customer_email)
        {
            metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => "double_booking").increment(1);
            warn!(slot_id = %slot.id, email = %req.customer_email, "double booking rejected");
            return Err(EngineError::DoubleBooking {
                slot_id: slot.id,
                email: req.customer_email,
            });
        }

        let confirmed = self.appointments.count_confirmed_for_slot(&slot.id);
        if confirmed >= slot.capacity {
            if slot.booked_count != confirmed || slot.available {
                let event = Event::SlotCorrected {
                    slot_id: slot.id,
                    booked_count: confirmed,
                    available: false,
                };
                slot = self.persist_and_apply(slot, event).await?;
                info!(slot_id = %slot.id, booked_count = confirmed, "slot counters corrected");
            }
            metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => "full").increment(1);
            warn!(slot_id = %slot.id, capacity = slot.capacity, "slot fully booked");
            return Err(EngineError::SlotNotAvailable("time slot is fully booked"));
        }

        let appointment = Appointment {
            id: Ulid::new(),
            slot_id: slot.id,
            reference: self.unique_reference()?,
            customer_name: req.customer_name,
            customer_email: req.customer_email,
            customer_phone: req.customer_phone,
            status: AppointmentStatus::Confirmed,
            created_at: now_ms(),
        };
        let booked_count = confirmed + 1;
        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
            booked_count,
            available: booked_count < slot.capacity,
        };
        let slot = self.persist_and_apply(slot, event).await?;
        let record = self.project(&appointment, &slot)?;
        drop(slot);

        metrics::counter!(APPOINTMENTS_BOOKED_TOTAL).increment(1);
        info!(
            reference = %record.reference,
            slot_id = %record.slot_id,
            booked_count,
            "appointment booked"
        );
        self.dispatch(Notice::Confirmation, record.clone());
        Ok(record)
    }

    /// Cancel a confirmed appointment and release its seat.
    pub async fn cancel_appointment(&self, reference: &str) -> Result<AppointmentRecord, EngineError> {
        let reference = reference.trim();
        let found = self
            .appointments
            .find_by_reference(reference)
            .ok_or_else(|| EngineError::NotFound(format!("appointment {reference}")))?;
        let shared = self
            .slots
            .get(&found.slot_id)
            .ok_or_else(|| EngineError::Storage(format!("slot {} missing", found.slot_id)))?;
        let slot = shared.write_owned().await;

        // Re-read under the lock: a concurrent cancel may have won.
        let mut appointment = self
            .appointments
            .get(&found.id)
            .ok_or_else(|| EngineError::NotFound(format!("appointment {reference}")))?;
        if appointment.status == AppointmentStatus::Cancelled {
            return Err(EngineError::AlreadyCancelled(appointment.reference));
        }

        let remaining = self
            .appointments
            .count_confirmed_for_slot(&slot.id)
            .saturating_sub(1);
        let event = Event::AppointmentCancelled {
            id: appointment.id,
            slot_id: slot.id,
            booked_count: remaining,
            available: remaining < slot.capacity,
        };
        let slot = self.persist_and_apply(slot, event).await?;
        appointment.status = AppointmentStatus::Cancelled;
        let record = self.project(&appointment, &slot)?;
        drop(slot);

        metrics::counter!(APPOINTMENTS_CANCELLED_TOTAL).increment(1);
        info!(reference = %record.reference, slot_id = %record.slot_id, booked_count = remaining, "appointment cancelled");
        self.dispatch(Notice::Cancellation, record.clone());
        Ok(record)
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    ///
    /// Every slot stays read-locked until the rewrite lands, so no booking can
    /// commit to the old file after its slot was captured.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut events: Vec<Event> = self
            .branches
            .iter()
            .map(|e| Event::BranchCreated { branch: e.value().clone() })
            .collect();

        let mut held = Vec::with_capacity(self.slots.len());
        for slot_id in self.slots.ids() {
            let Some(shared) = self.slots.get(&slot_id) else {
                continue;
            };
            let slot = shared.read_owned().await;
            events.push(Event::SlotCreated { slot: slot.clone() });
            let mut appointments = self.appointments.for_slot(&slot.id);
            appointments.sort_by_key(|a| a.id);
            for appointment in appointments {
                events.push(Event::AppointmentBooked {
                    appointment,
                    booked_count: slot.booked_count,
                    available: slot.available,
                });
            }
            held.push(slot);
        }

        let count = events.len();
        self.wal_request(|response| WalCommand::Compact { events, response })
            .await?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        drop(held);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal_request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}
