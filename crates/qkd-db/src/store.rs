use crate::reservation::ReservationGuard;
use crate::slot::{Slot, SlotFlags};
use qkd_core::error::{QkdError, Result};
use qkd_core::types::KeyId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use zeroize::Zeroize;

/// The authentication link keystore: a fixed-quantum, id-indexed slot table
/// shared by both peers' authentication stages.
///
/// Unlike the rest of this workspace's ancestry, this store is intentionally
/// in-memory only — authentication key material must not outlive the
/// process holding it, so there is no `file://` backing, only the `ram://`
/// and `null://` schemes `open` recognizes.
pub struct KeyStore {
    min_id: u32,
    max_id: u32,
    quantum: usize,
    slots: Arc<Mutex<BTreeMap<u32, Slot>>>,
    opened: bool,
}

impl KeyStore {
    /// Open a store directly from its parameters. `[min_id, max_id)` bounds
    /// the id space; `quantum` is the fixed byte size of every slot.
    pub fn open_ram(min_id: u32, max_id: u32, quantum: usize) -> Result<Self> {
        if min_id >= max_id {
            return Err(QkdError::Other(
                "key database id range must be non-empty".to_string(),
            ));
        }
        Ok(KeyStore {
            min_id,
            max_id,
            quantum,
            slots: Arc::new(Mutex::new(BTreeMap::new())),
            opened: true,
        })
    }

    /// Open from a `ram://min-max/quantum` or `null://` URL, mirroring the
    /// scheme-dispatched `open()` entry point stages use for every external
    /// resource.
    pub fn open(url: &str) -> Result<Self> {
        if let Some(rest) = url.strip_prefix("null://") {
            let _ = rest;
            return Ok(KeyStore {
                min_id: 0,
                max_id: 0,
                quantum: 0,
                slots: Arc::new(Mutex::new(BTreeMap::new())),
                opened: false,
            });
        }
        if let Some(rest) = url.strip_prefix("ram://") {
            let mut parts = rest.splitn(2, '/');
            let range = parts.next().unwrap_or_default();
            let quantum_str = parts.next().unwrap_or("256");
            let mut range_parts = range.splitn(2, '-');
            let min_id: u32 = range_parts
                .next()
                .unwrap_or_default()
                .parse()
                .map_err(|_| QkdError::Other(format!("malformed key database url: {url}")))?;
            let max_id: u32 = range_parts
                .next()
                .unwrap_or_default()
                .parse()
                .map_err(|_| QkdError::Other(format!("malformed key database url: {url}")))?;
            let quantum: usize = quantum_str
                .parse()
                .map_err(|_| QkdError::Other(format!("malformed key database url: {url}")))?;
            return Self::open_ram(min_id, max_id, quantum);
        }
        Err(QkdError::UnsupportedScheme(url.to_string()))
    }

    pub fn opened(&self) -> bool {
        self.opened
    }

    pub fn valid(&self) -> bool {
        self.opened && self.min_id < self.max_id
    }

    pub fn min_id(&self) -> u32 {
        self.min_id
    }

    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    pub fn amount(&self) -> u32 {
        self.max_id - self.min_id
    }

    fn require_open(&self) -> Result<()> {
        if !self.opened {
            return Err(QkdError::DbNotOpen);
        }
        Ok(())
    }

    fn require_in_range(&self, id: KeyId) -> Result<()> {
        if id.0 < self.min_id || id.0 >= self.max_id {
            return Err(QkdError::IdOutOfRange(id.0));
        }
        Ok(())
    }

    pub fn insert(&self, id: KeyId, data: Vec<u8>) -> Result<()> {
        self.require_open()?;
        self.require_in_range(id)?;
        if data.len() != self.quantum {
            return Err(QkdError::Other(format!(
                "key database slot expects {} bytes, got {}",
                self.quantum,
                data.len()
            )));
        }
        let mut slots = self.slots.lock().unwrap();
        if slots.get(&id.0).map(Slot::is_valid).unwrap_or(false) {
            return Err(QkdError::DuplicateId(id.0));
        }
        slots.insert(
            id.0,
            Slot {
                data: Some(data),
                flags: SlotFlags::default(),
                reserved_count: 0,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: KeyId) -> Result<Vec<u8>> {
        self.require_open()?;
        let slots = self.slots.lock().unwrap();
        slots
            .get(&id.0)
            .and_then(|s| s.data.clone())
            .ok_or(QkdError::NotFound(id.0))
    }

    pub fn delete(&self, id: KeyId) -> Result<()> {
        self.require_open()?;
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(&id.0) {
            if let Some(mut data) = slot.data.take() {
                data.zeroize();
            }
            slot.flags = SlotFlags::default();
        }
        Ok(())
    }

    pub fn delete_many(&self, ids: &[KeyId]) -> Result<()> {
        for &id in ids {
            self.delete(id)?;
        }
        Ok(())
    }

    pub fn set_flags(&self, id: KeyId, f: impl FnOnce(&mut SlotFlags)) -> Result<()> {
        self.require_open()?;
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(&id.0).ok_or(QkdError::NotFound(id.0))?;
        f(&mut slot.flags);
        Ok(())
    }

    pub fn flags(&self, id: KeyId) -> Result<SlotFlags> {
        self.require_open()?;
        let slots = self.slots.lock().unwrap();
        slots
            .get(&id.0)
            .map(|s| s.flags)
            .ok_or(QkdError::NotFound(id.0))
    }

    /// Number of slots currently holding valid, unreserved key material.
    pub fn count(&self) -> usize {
        let slots = self.slots.lock().unwrap();
        slots
            .values()
            .filter(|s| s.is_valid() && s.reserved_count == 0)
            .count()
    }

    pub fn count_max(&self) -> usize {
        self.amount() as usize
    }

    /// Find a contiguous run of ids with valid, unreserved material whose
    /// combined byte length is at least `min_bytes`. Returns the ids in
    /// ascending order. Tag exchanges pull a two-quantum run this way so
    /// both peers slice the identical byte range.
    pub fn find_contiguous(&self, min_bytes: usize) -> Result<Vec<KeyId>> {
        self.require_open()?;
        let need = (min_bytes + self.quantum - 1) / self.quantum.max(1);
        let slots = self.slots.lock().unwrap();
        let mut run: Vec<KeyId> = Vec::new();
        for id in self.min_id..self.max_id {
            let usable = slots
                .get(&id)
                .map(|s| s.is_valid() && s.reserved_count == 0)
                .unwrap_or(false);
            if usable {
                run.push(KeyId(id));
                if run.len() >= need {
                    return Ok(run);
                }
            } else {
                run.clear();
            }
        }
        Err(QkdError::NoContiguousRun(need))
    }

    /// Find `count` free (invalid) slot ids, used to nibble fresh amplified
    /// key material into the store.
    pub fn find_spare(&self, count: usize) -> Result<Vec<KeyId>> {
        self.require_open()?;
        let slots = self.slots.lock().unwrap();
        let mut spare = Vec::new();
        for id in self.min_id..self.max_id {
            let free = slots.get(&id).map(|s| !s.is_valid()).unwrap_or(true);
            if free {
                spare.push(KeyId(id));
                if spare.len() == count {
                    return Ok(spare);
                }
            }
        }
        Err(QkdError::Exhausted)
    }

    /// Reserve a set of ids for an in-flight operation. Reserved slots are
    /// excluded from [`count`]/[`find_contiguous`] until the guard is
    /// dropped or explicitly released, so a cancelled tag exchange can never
    /// double-spend the same key bytes.
    pub fn reserve(&self, ids: &[KeyId]) -> Result<ReservationGuard> {
        self.require_open()?;
        let mut slots = self.slots.lock().unwrap();
        for &id in ids {
            let slot = slots.get_mut(&id.0).ok_or(QkdError::NotFound(id.0))?;
            slot.reserved_count += 1;
        }
        drop(slots);
        Ok(ReservationGuard::new(self.slots.clone(), ids.to_vec()))
    }

    pub fn reset(&self) -> Result<()> {
        self.require_open()?;
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.values_mut() {
            if let Some(mut data) = slot.data.take() {
                data.zeroize();
            }
        }
        slots.clear();
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "keystore[{}, {}) quantum={} count={}/{}",
            self.min_id,
            self.max_id,
            self.quantum,
            self.count(),
            self.count_max()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_ram_url_parses() {
        let db = KeyStore::open("ram://0-100/64").unwrap();
        assert_eq!(db.min_id(), 0);
        assert_eq!(db.max_id(), 100);
        assert_eq!(db.quantum(), 64);
        assert!(db.valid());
    }

    #[test]
    fn null_url_is_unopened() {
        let db = KeyStore::open("null://").unwrap();
        assert!(!db.opened());
        assert!(matches!(db.insert(KeyId(1), vec![]), Err(QkdError::DbNotOpen)));
    }

    #[test]
    fn insert_get_delete_round_trip() {
        let db = KeyStore::open_ram(0, 10, 4).unwrap();
        db.insert(KeyId(3), vec![1, 2, 3, 4]).unwrap();
        assert_eq!(db.get(KeyId(3)).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(db.count(), 1);
        db.delete(KeyId(3)).unwrap();
        assert!(matches!(db.get(KeyId(3)), Err(QkdError::NotFound(3))));
        assert_eq!(db.count(), 0);
    }

    #[test]
    fn insert_out_of_range_fails() {
        let db = KeyStore::open_ram(0, 10, 4).unwrap();
        assert!(matches!(
            db.insert(KeyId(20), vec![0; 4]),
            Err(QkdError::IdOutOfRange(20))
        ));
    }

    #[test]
    fn find_contiguous_requires_adjacency() {
        let db = KeyStore::open_ram(0, 10, 4).unwrap();
        db.insert(KeyId(0), vec![0; 4]).unwrap();
        db.insert(KeyId(1), vec![0; 4]).unwrap();
        db.insert(KeyId(3), vec![0; 4]).unwrap();
        let run = db.find_contiguous(8).unwrap();
        assert_eq!(run, vec![KeyId(0), KeyId(1)]);
    }

    #[test]
    fn reservation_excludes_from_count() {
        let db = KeyStore::open_ram(0, 10, 4).unwrap();
        db.insert(KeyId(0), vec![0; 4]).unwrap();
        assert_eq!(db.count(), 1);
        {
            let _guard = db.reserve(&[KeyId(0)]).unwrap();
            assert_eq!(db.count(), 0);
        }
        assert_eq!(db.count(), 1);
    }

    #[test]
    fn find_spare_skips_valid_slots() {
        let db = KeyStore::open_ram(0, 4, 4).unwrap();
        db.insert(KeyId(1), vec![0; 4]).unwrap();
        let spare = db.find_spare(3).unwrap();
        assert_eq!(spare, vec![KeyId(0), KeyId(2), KeyId(3)]);
    }
}
