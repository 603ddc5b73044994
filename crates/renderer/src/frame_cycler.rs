//! Frame slot rotation.
//!
//! The cycler implements a "frames in flight" pattern over a fixed number of
//! slots:
//!
//! 1. While the GPU renders frame N, the CPU records frame N+1
//! 2. Each slot remembers the completion signal of the last frame it carried
//! 3. Reusing a slot first waits for that signal
//!
//! ```text
//! draw 1 -> slot 0    draw 2 -> slot 1    draw 3 -> slot 0 (waits on draw 1)
//! ```
//!
//! Waiting when a slot is reused is the only stall in steady state, so at
//! most N submissions are ever unacknowledged.

use std::sync::Arc;

use tracing::{debug, info, warn};

use ferry_rhi::RhiResult;
use ferry_rhi::device::GpuDevice;

/// Rotates over N frame slots, each holding at most one pending signal.
///
/// The cycler is not thread-safe; it is driven from the render thread.
pub struct FrameCycler<D: GpuDevice> {
    device: Arc<D>,
    slots: Vec<Option<D::Fence>>,
    /// Slot the next frame will use
    next: usize,
    /// Slot of the frame being recorded
    current: usize,
}

impl<D: GpuDevice> FrameCycler<D> {
    /// Creates a cycler with `frames_in_flight` empty slots (at least one).
    pub fn new(device: Arc<D>, frames_in_flight: usize) -> Self {
        let count = frames_in_flight.max(1);
        info!("Frame cycler created with {} frames in flight", count);
        Self {
            device,
            slots: (0..count).map(|_| None).collect(),
            next: 0,
            current: 0,
        }
    }

    /// Advances to the next slot and waits for the frame it last carried.
    ///
    /// Returns the index of the slot now current.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on the previous signal fails. The cursor
    /// does not move and the signal stays in the slot, so the next call
    /// waits on it again.
    pub fn begin_slot(&mut self) -> RhiResult<usize> {
        let slot = self.next;
        if let Some(fence) = self.slots[slot].take() {
            debug!("Waiting for frame slot {}", slot);
            if let Err(e) = self.device.wait_fence(&fence) {
                self.slots[slot] = Some(fence);
                return Err(e);
            }
            self.device.release_fence(fence);
        }

        self.current = slot;
        self.next = (slot + 1) % self.slots.len();
        Ok(slot)
    }

    /// Stores the completion signal of the frame recorded in the current slot.
    pub fn store(&mut self, fence: D::Fence) {
        let stale = self.slots[self.current].replace(fence);
        debug_assert!(stale.is_none(), "frame slot {} stored twice", self.current);
        if let Some(stale) = stale {
            if self.device.wait_fence(&stale).is_ok() {
                self.device.release_fence(stale);
            }
        }
    }

    /// Index of the slot the last `begin_slot` selected.
    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a cycler has at least one slot.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots whose frame has not been waited on.
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Waits for every pending frame and releases its signal.
    ///
    /// If a wait fails the device is idled instead, so every signal is
    /// released either way.
    pub fn drain(&mut self) {
        for index in 0..self.slots.len() {
            let Some(fence) = self.slots[index].take() else {
                continue;
            };
            if let Err(e) = self.device.wait_fence(&fence) {
                warn!("Waiting for frame slot {} failed, idling device: {}", index, e);
                if let Err(e) = self.device.wait_idle() {
                    warn!("Device idle wait failed: {}", e);
                }
            }
            self.device.release_fence(fence);
        }
    }
}

impl<D: GpuDevice> Drop for FrameCycler<D> {
    fn drop(&mut self) {
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_rhi::headless::{Fault, HeadlessDevice};

    fn submit(device: &HeadlessDevice) -> <HeadlessDevice as GpuDevice>::Fence {
        let cmd = device.begin_commands().unwrap();
        device.submit(cmd).unwrap()
    }

    #[test]
    fn test_slots_rotate_from_zero() {
        let device = Arc::new(HeadlessDevice::default());
        let mut cycler = FrameCycler::new(device.clone(), 2);
        let order: Vec<usize> = (0..5).map(|_| cycler.begin_slot().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_failed_wait_retries_same_slot() {
        let device = Arc::new(HeadlessDevice::default());
        let mut cycler = FrameCycler::new(device.clone(), 2);
        for _ in 0..2 {
            cycler.begin_slot().unwrap();
            cycler.store(submit(&device));
        }
        assert_eq!(cycler.current(), 1);

        device.inject(Fault::WaitFence);
        assert!(cycler.begin_slot().is_err());
        assert_eq!(cycler.current(), 1);
        assert_eq!(cycler.pending(), 2);

        assert_eq!(cycler.begin_slot().unwrap(), 0);
        assert_eq!(cycler.pending(), 1);
        assert_eq!(cycler.begin_slot().unwrap(), 1);
        assert_eq!(cycler.pending(), 0);
        assert_eq!(device.stats().fences, 0);
    }

    #[test]
    fn test_zero_slots_is_clamped() {
        let device = Arc::new(HeadlessDevice::default());
        let cycler = FrameCycler::new(device, 0);
        assert_eq!(cycler.len(), 1);
    }

    #[test]
    fn test_reuse_releases_previous_signal() {
        let device = Arc::new(HeadlessDevice::default());
        let mut cycler = FrameCycler::new(device.clone(), 2);
        for _ in 0..6 {
            cycler.begin_slot().unwrap();
            cycler.store(submit(&device));
            assert!(cycler.pending() <= 2);
        }
        assert_eq!(cycler.pending(), 2);
        assert_eq!(device.stats().fences, 2);

        cycler.drain();
        assert_eq!(cycler.pending(), 0);
        assert_eq!(device.stats().fences, 0);
    }
}
