// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The hardware flow table.
//!
//! The table is a fixed array of slots in memory the engine reads and
//! writes by DMA. Hardware picks the slot for a flow by hashing its
//! tuple, learns the tuple into it, and ages it; software only fills
//! in the rest of a learned slot and flips its state.
//!
//! Software mutation of a slot is serialized by a single lock taken
//! with local interrupts masked. The [`FoeSlotGuard`] returned by
//! [`FoeTable::lock()`] is the only way to write a slot, and every
//! write that hardware must act on goes through
//! [`FoeSlotGuard::publish()`], which follows the write with the
//! cache/DMA barrier that makes it visible to the engine.
use super::foe::FoeEntry;
use crate::api::FOE_ENTRY_SIZE;
use crate::ddi::sync::KSpinLock;
use crate::ddi::sync::KSpinLockGuard;
use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;
use ppe_api::DumpFoeResp;
use ppe_api::ENOMEM;
use ppe_api::FoeState;
use ppe_api::PpeError;
use ppe_api::TableSize;

type Slot = [u8; FOE_ENTRY_SIZE];

/// The view of the engine the flow table needs.
pub trait FoeHw: Send + Sync {
    /// The engine's free-running timestamp, as stamped into info
    /// block 1.
    fn timestamp(&self) -> u16;

    /// Make the CPU's write of slot `idx` visible to the engine.
    fn sync_for_device(&self, idx: u32, slot: &[u8]);
}

pub struct FoeTable {
    slots: KSpinLock<Box<[Slot]>>,
    hw: Arc<dyn FoeHw>,
    size: TableSize,
}

impl core::fmt::Debug for FoeTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FoeTable").field("size", &self.size).finish()
    }
}

impl FoeTable {
    pub fn new(size: TableSize, hw: Arc<dyn FoeHw>) -> Result<Self, PpeError> {
        let n = size.entries() as usize;
        let mut slots = Vec::new();
        slots.try_reserve_exact(n).map_err(|_| PpeError::System {
            errno: ENOMEM,
            msg: "flow table allocation".to_string(),
        })?;
        slots.resize(n, [0u8; FOE_ENTRY_SIZE]);

        Ok(Self {
            slots: KSpinLock::new(slots.into_boxed_slice()),
            hw,
            size,
        })
    }

    /// Take the table lock.
    pub fn lock(&self) -> FoeSlotGuard<'_> {
        FoeSlotGuard {
            slots: self.slots.lock_irqsave(),
            hw: self.hw.as_ref(),
            size: self.size.entries(),
        }
    }

    /// Read one slot. The result is a snapshot: hardware may change
    /// the slot's state at any point after the lock is dropped.
    pub fn peek(&self, idx: u32) -> Result<FoeEntry, PpeError> {
        self.lock().read(idx)
    }

    /// Zero every slot, leaving the table as the engine expects it at
    /// start.
    pub fn reset(&self) {
        let mut slots = self.slots.lock_irqsave();
        for (idx, slot) in slots.iter_mut().enumerate() {
            *slot = [0u8; FOE_ENTRY_SIZE];
            // The table never exceeds `u32` entries.
            self.hw.sync_for_device(idx as u32, slot);
        }
    }

    /// Summarize every bound slot.
    pub fn dump(&self) -> DumpFoeResp {
        let slots = self.slots.lock_irqsave();
        let entries = slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let entry = FoeEntry::decode(slot).ok()?;
                entry.state().is_bound().then(|| entry.to_dump(idx as u32))
            })
            .collect();

        DumpFoeResp {
            entry_size: FOE_ENTRY_SIZE,
            num_slots: self.size.entries(),
            entries,
        }
    }

    pub fn entry_size(&self) -> usize {
        FOE_ENTRY_SIZE
    }

    pub fn size(&self) -> TableSize {
        self.size
    }

    pub fn num_slots(&self) -> u32 {
        self.size.entries()
    }

    pub fn timestamp(&self) -> u16 {
        self.hw.timestamp()
    }
}

/// Exclusive access to the flow table. Dropping the guard releases
/// the lock and restores the interrupt state.
pub struct FoeSlotGuard<'a> {
    slots: KSpinLockGuard<'a, Box<[Slot]>>,
    hw: &'a dyn FoeHw,
    size: u32,
}

impl FoeSlotGuard<'_> {
    fn slot(&self, idx: u32) -> Result<&Slot, PpeError> {
        self.slots
            .get(idx as usize)
            .ok_or(PpeError::BadTableIndex { index: idx, size: self.size })
    }

    fn slot_mut(&mut self, idx: u32) -> Result<&mut Slot, PpeError> {
        let size = self.size;
        self.slots
            .get_mut(idx as usize)
            .ok_or(PpeError::BadTableIndex { index: idx, size })
    }

    pub fn read(&self, idx: u32) -> Result<FoeEntry, PpeError> {
        FoeEntry::decode(self.slot(idx)?).map_err(|e| PpeError::BadEntry {
            index: idx,
            msg: e.to_string(),
        })
    }

    /// Write the slot without making it visible to hardware.
    pub fn write(
        &mut self,
        idx: u32,
        entry: &FoeEntry,
    ) -> Result<(), PpeError> {
        let slot = self.slot_mut(idx)?;
        entry.encode(slot).map_err(|e| PpeError::BadEntry {
            index: idx,
            msg: e.to_string(),
        })
    }

    /// Write the slot and make it visible to hardware.
    pub fn publish(
        &mut self,
        idx: u32,
        entry: &FoeEntry,
    ) -> Result<(), PpeError> {
        self.write(idx, entry)?;
        let slot = self.slot(idx)?;
        self.hw.sync_for_device(idx, slot);
        Ok(())
    }

    /// Move the slot to `state`, stamping the current time.
    pub fn set_state(
        &mut self,
        idx: u32,
        state: FoeState,
    ) -> Result<FoeEntry, PpeError> {
        let mut entry = self.read(idx)?;
        entry.ib1.state = state;
        entry.ib1.ts = self.hw.timestamp();
        self.publish(idx, &entry)?;
        Ok(entry)
    }

    pub fn timestamp(&self) -> u16 {
        self.hw.timestamp()
    }
}

// Hardware's side of the table, for driving the engine in tests.
#[cfg(any(feature = "test-help", test))]
impl FoeTable {
    /// Learn `flow` into slot `idx` as hardware does on first sight of
    /// a flow: UNBIND, nothing but the tuple filled in.
    pub fn hw_learn(
        &self,
        idx: u32,
        flow: super::foe::FoeFlow,
    ) -> Result<(), PpeError> {
        let entry = FoeEntry::learned(flow, self.hw.timestamp());
        self.hw_write(idx, &entry)
    }

    /// Age the slot back to UNBIND.
    pub fn hw_age(&self, idx: u32) -> Result<(), PpeError> {
        let mut entry = self.peek(idx)?;
        entry.ib1.state = FoeState::Unbind;
        self.hw_write(idx, &entry)
    }

    /// Write the slot the way the engine does, with no barrier.
    pub fn hw_write(
        &self,
        idx: u32,
        entry: &FoeEntry,
    ) -> Result<(), PpeError> {
        self.lock().write(idx, entry)
    }

    /// The raw bytes of a slot.
    pub fn hw_read_raw(&self, idx: u32) -> Option<Vec<u8>> {
        let slots = self.slots.lock_irqsave();
        slots.get(idx as usize).map(|s| s.to_vec())
    }
}
