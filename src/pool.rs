//! Ownership bookkeeping for the driver's buffer pool.
//!
//! The memory itself stays with the driver backend; the pool records, per
//! driver index, which side may touch it.

use std::time::Duration;

use crate::error::{CaptureError, Result};
use crate::traits::FrameMetadata;

/// Who owns a buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Handed to the driver; it may write, the session must not read.
    QueuedToDriver,
    /// Held by the session; readable, the driver will not write.
    OwnedByReader,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    length: usize,
    state: SlotState,
}

/// Fixed set of buffer slots matching the driver's indices.
#[derive(Debug, Default)]
pub struct BufferPool {
    slots: Vec<Slot>,
}

impl BufferPool {
    /// Create a pool for freshly mapped buffers of the given lengths.
    ///
    /// Mapped buffers start out owned by the session.
    pub fn new<I: IntoIterator<Item = usize>>(lengths: I) -> Self {
        Self {
            slots: lengths
                .into_iter()
                .map(|length| Slot {
                    length,
                    state: SlotState::OwnedByReader,
                })
                .collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool has no slots (nothing mapped).
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// State of one slot.
    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    /// Mapped length of one slot.
    pub fn length(&self, index: usize) -> Option<usize> {
        self.slots.get(index).map(|slot| slot.length)
    }

    /// Slots currently queued to the driver.
    pub fn queued(&self) -> usize {
        self.count(SlotState::QueuedToDriver)
    }

    /// Slots currently held by the session.
    pub fn owned(&self) -> usize {
        self.count(SlotState::OwnedByReader)
    }

    fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|slot| slot.state == state).count()
    }

    /// Move a slot from `from` to `to`; any other starting state is a protocol
    /// violation and leaves the slot untouched.
    pub fn transition(&mut self, index: usize, from: SlotState, to: SlotState) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            CaptureError::BufferProtocolViolation(format!("buffer index {index} out of range"))
        })?;
        if slot.state != from {
            return Err(CaptureError::BufferProtocolViolation(format!(
                "buffer {index} is {:?}, expected {from:?}",
                slot.state
            )));
        }
        slot.state = to;
        Ok(())
    }

    /// Record that the session handed `index` to the driver.
    pub fn enqueue(&mut self, index: usize) -> Result<()> {
        self.transition(index, SlotState::OwnedByReader, SlotState::QueuedToDriver)
    }

    /// Record that the driver handed `index` back to the session.
    pub fn dequeue(&mut self, index: usize) -> Result<()> {
        self.transition(index, SlotState::QueuedToDriver, SlotState::OwnedByReader)
    }

    /// Stream-off returns every buffer to the session.
    pub fn reclaim_all(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::OwnedByReader;
        }
    }

    /// Forget every slot; called once the buffers are unmapped.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Borrowed view of one dequeued buffer.
///
/// Only exists inside a frame callback; the buffer is re-queued as soon as
/// the callback returns.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// Bytes filled by the driver.
    pub data: &'a [u8],
    /// Buffer metadata.
    pub metadata: FrameMetadata,
}

impl RawFrame<'_> {
    /// Frame sequence number.
    pub const fn sequence(&self) -> u32 {
        self.metadata.sequence
    }

    /// Capture timestamp.
    pub const fn timestamp(&self) -> Duration {
        self.metadata.timestamp
    }
}
