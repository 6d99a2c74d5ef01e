use qkd_core::error::{QkdError, Result};
use qkd_core::types::KeyId;
use std::collections::HashMap;

/// Per-key reorder parking queue for peer messages.
///
/// A stage processes keys in ascending id order, but the peer's messages
/// about those keys can arrive out of order (a later key's mask set can
/// race ahead of an earlier key's). [`offer`](ReorderQueue::offer) parks
/// anything newer than the current cursor, hands back anything that matches
/// it immediately, and silently drops anything older — the sender has
/// already moved past that key and a stale reply can't be useful.
pub struct ReorderQueue<T> {
    capacity: usize,
    current: KeyId,
    pending: HashMap<u32, T>,
}

impl<T> ReorderQueue<T> {
    pub fn new(capacity: usize) -> Self {
        ReorderQueue {
            capacity,
            current: KeyId::NULL,
            pending: HashMap::new(),
        }
    }

    /// Advance the cursor to `id`, discarding any parked entries that are
    /// now stale.
    pub fn set_current(&mut self, id: KeyId) {
        self.current = id;
        self.pending.retain(|&k, _| k >= id.0);
    }

    pub fn current(&self) -> KeyId {
        self.current
    }

    /// Offer an incoming item tagged with `id`. Returns `Ok(Some(item))` if
    /// it matches the current cursor and can be processed right away,
    /// `Ok(None)` if it was parked (or discarded as stale) for later, and
    /// `Err` if the queue is already full of unrelated, newer entries —
    /// a sign the peer has drifted out of sync.
    pub fn offer(&mut self, id: KeyId, item: T) -> Result<Option<T>> {
        if id.0 < self.current.0 {
            return Ok(None);
        }
        if id == self.current {
            return Ok(Some(item));
        }
        if self.pending.len() >= self.capacity {
            return Err(QkdError::ReorderQueueFull(id.0));
        }
        self.pending.insert(id.0, item);
        Ok(None)
    }

    /// Take the entry parked for the current cursor, if any arrived ahead
    /// of the cursor reaching it.
    pub fn take_current(&mut self) -> Option<T> {
        self.pending.remove(&self.current.0)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_current_is_returned_immediately() {
        let mut q: ReorderQueue<u32> = ReorderQueue::new(4);
        q.set_current(KeyId(5));
        assert_eq!(q.offer(KeyId(5), 100).unwrap(), Some(100));
        assert!(q.is_empty());
    }

    #[test]
    fn newer_items_are_parked_then_retrieved() {
        let mut q: ReorderQueue<u32> = ReorderQueue::new(4);
        q.set_current(KeyId(5));
        assert_eq!(q.offer(KeyId(6), 200).unwrap(), None);
        assert_eq!(q.len(), 1);
        q.set_current(KeyId(6));
        assert_eq!(q.take_current(), Some(200));
    }

    #[test]
    fn stale_items_are_dropped_silently() {
        let mut q: ReorderQueue<u32> = ReorderQueue::new(4);
        q.set_current(KeyId(10));
        assert_eq!(q.offer(KeyId(3), 1).unwrap(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn full_queue_of_newer_items_errors() {
        let mut q: ReorderQueue<u32> = ReorderQueue::new(2);
        q.set_current(KeyId(1));
        q.offer(KeyId(2), 1).unwrap();
        q.offer(KeyId(3), 1).unwrap();
        assert!(matches!(
            q.offer(KeyId(4), 1),
            Err(QkdError::ReorderQueueFull(4))
        ));
    }

    #[test]
    fn advancing_drops_entries_left_behind() {
        let mut q: ReorderQueue<u32> = ReorderQueue::new(4);
        q.set_current(KeyId(1));
        q.offer(KeyId(2), 1).unwrap();
        q.offer(KeyId(3), 1).unwrap();
        q.set_current(KeyId(3));
        assert_eq!(q.len(), 1);
        assert_eq!(q.take_current(), Some(1));
    }
}
