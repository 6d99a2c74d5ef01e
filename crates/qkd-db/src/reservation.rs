use crate::slot::Slot;
use qkd_core::types::KeyId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// RAII guard returned by [`crate::store::KeyStore::reserve`]. Dropping it —
/// whether by falling out of scope normally or being unwound by a cancelled
/// future — always releases the reservation, so a tag exchange that gets
/// cancelled mid-flight can never leave slots permanently excluded from
/// [`crate::store::KeyStore::count`].
pub struct ReservationGuard {
    slots: Arc<Mutex<BTreeMap<u32, Slot>>>,
    ids: Vec<KeyId>,
    released: bool,
}

impl ReservationGuard {
    pub(crate) fn new(slots: Arc<Mutex<BTreeMap<u32, Slot>>>, ids: Vec<KeyId>) -> Self {
        ReservationGuard {
            slots,
            ids,
            released: false,
        }
    }

    pub fn ids(&self) -> &[KeyId] {
        &self.ids
    }

    /// Release the reservation early, before the guard would otherwise drop.
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut slots = self.slots.lock().unwrap();
        for id in &self.ids {
            if let Some(slot) = slots.get_mut(&id.0) {
                slot.reserved_count = slot.reserved_count.saturating_sub(1);
            }
        }
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        self.do_release();
    }
}
