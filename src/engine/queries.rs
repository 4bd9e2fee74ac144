use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::validate;
use super::{Engine, EngineError};

impl Engine {
    /// Exact lookup by booking reference.
    pub async fn get_by_reference(&self, reference: &str) -> Result<AppointmentRecord, EngineError> {
        let reference = reference.trim();
        let appointment = self
            .appointments
            .find_by_reference(reference)
            .ok_or_else(|| EngineError::NotFound(format!("appointment {reference}")))?;
        let shared = self
            .slots
            .get(&appointment.slot_id)
            .ok_or_else(|| EngineError::Storage(format!("slot {} missing", appointment.slot_id)))?;
        let slot = shared.read().await;
        self.project(&appointment, &slot)
    }

    /// All of a customer's appointments, any status, by slot date then start time.
    pub async fn list_by_customer(&self, customer: &CustomerRef) -> Result<Vec<AppointmentRecord>, EngineError> {
        let appointments = self.appointments.find_by_customer(customer);
        let mut records = Vec::with_capacity(appointments.len());
        for appointment in &appointments {
            let Some(shared) = self.slots.get(&appointment.slot_id) else {
                continue;
            };
            let slot = shared.read().await;
            records.push(self.project(appointment, &slot)?);
        }
        records.sort_by(|a, b| {
            (a.date, a.start_time, a.id).cmp(&(b.date, b.start_time, b.id))
        });
        debug!(?customer, count = records.len(), "listed customer appointments");
        Ok(records)
    }

    /// Slots of a branch on a date that are currently flagged available.
    pub async fn available_slots(&self, branch_id: Ulid, date: NaiveDate) -> Result<Vec<SlotInfo>, EngineError> {
        let branch = self
            .get_branch(&branch_id)
            .ok_or_else(|| EngineError::NotFound(format!("branch {branch_id}")))?;
        let slots = self.slots.find_slots_for_branch_and_date(branch_id, date).await;
        Ok(slots.iter().map(|s| SlotInfo::project(s, &branch.name)).collect())
    }

    /// Every slot of a branch in `[from, to]`, full ones included.
    pub async fn slots_between(
        &self,
        branch_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        validate::date_range(from, to)?;
        let branch = self
            .get_branch(&branch_id)
            .ok_or_else(|| EngineError::NotFound(format!("branch {branch_id}")))?;
        let slots = self.slots.slots_for_branch_between(branch_id, from, to).await;
        Ok(slots.iter().map(|s| SlotInfo::project(s, &branch.name)).collect())
    }

    /// All branches by name.
    pub fn list_branches(&self) -> Vec<Branch> {
        let mut branches: Vec<Branch> = self.branches.iter().map(|e| e.value().clone()).collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        branches
    }
}
