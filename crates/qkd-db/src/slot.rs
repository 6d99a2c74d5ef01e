/// Synchronization/provenance flags tracked per slot, independent of whether
/// the slot currently holds valid key material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotFlags {
    /// Both peers agree this slot holds usable key material.
    pub real_sync: bool,
    /// This peer believes the slot is synced but has not yet had that
    /// confirmed by the other side.
    pub eventual_sync: bool,
    /// Key material was injected out-of-band (e.g. for testing) rather than
    /// nibbled from an amplified key.
    pub injected: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) data: Option<Vec<u8>>,
    pub(crate) flags: SlotFlags,
    pub(crate) reserved_count: u32,
}

impl Slot {
    pub(crate) fn empty() -> Self {
        Slot {
            data: None,
            flags: SlotFlags::default(),
            reserved_count: 0,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.data.is_some()
    }
}
