//! In-flight frame slots.
//!
//! The renderer keeps [`MAX_FRAMES_IN_FLIGHT`] synchronization triples and
//! cycles through them. [`FrameRing`] tracks which slot is current and what
//! that slot is doing:
//!
//! ```text
//! Idle ──begin_acquire──▶ Acquiring ──begin_recording──▶ Recording
//!   ▲                                                        │
//!   └───────fence_signaled─────── Submitted ◀──mark_submitted┘
//! ```
//!
//! A slot only leaves `Submitted` once its fence has been observed signaled,
//! so its command buffer and uniform data are never rewritten while the GPU
//! may still read them. Slots are independent of swapchain image indices.

use thiserror::Error;

use crate::MAX_FRAMES_IN_FLIGHT;

/// Lifecycle of one in-flight slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled; nothing of this slot is pending on the GPU.
    Idle,
    /// Fence reset, waiting for the swapchain to hand out an image.
    Acquiring,
    /// Image acquired; the command buffer is being recorded.
    Recording,
    /// Work submitted; the fence signals when it completes.
    Submitted,
}

/// An out-of-order frame-loop step.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("frame slot {slot} cannot move from {from:?} to {to:?}")]
pub struct SlotTransitionError {
    pub slot: usize,
    pub from: SlotState,
    pub to: SlotState,
}

/// Ring of in-flight frame slots.
#[derive(Debug)]
pub struct FrameRing {
    current: usize,
    states: [SlotState; MAX_FRAMES_IN_FLIGHT],
}

impl FrameRing {
    /// All slots start idle, matching fences created signaled.
    pub fn new() -> Self {
        Self {
            current: 0,
            states: [SlotState::Idle; MAX_FRAMES_IN_FLIGHT],
        }
    }

    /// Index of the slot the next frame uses.
    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.states.get(slot).copied()
    }

    /// Checks that the current slot's fence will eventually signal.
    ///
    /// A slot left in `Acquiring` or `Recording` by a failed frame has a reset
    /// fence with nothing submitted, so waiting on it would never return.
    pub fn ready_to_wait(&self) -> Result<(), SlotTransitionError> {
        match self.states[self.current] {
            SlotState::Submitted | SlotState::Idle => Ok(()),
            from => Err(self.error(from, SlotState::Idle)),
        }
    }

    /// Records that the current slot's fence was waited on and is signaled.
    ///
    /// Idle slots stay idle.
    pub fn fence_signaled(&mut self) -> Result<(), SlotTransitionError> {
        self.ready_to_wait()?;
        self.states[self.current] = SlotState::Idle;
        Ok(())
    }

    /// Fence reset; the slot now waits for a swapchain image.
    pub fn begin_acquire(&mut self) -> Result<(), SlotTransitionError> {
        self.transition(SlotState::Idle, SlotState::Acquiring)
    }

    pub fn begin_recording(&mut self) -> Result<(), SlotTransitionError> {
        self.transition(SlotState::Acquiring, SlotState::Recording)
    }

    pub fn mark_submitted(&mut self) -> Result<(), SlotTransitionError> {
        self.transition(SlotState::Recording, SlotState::Submitted)
    }

    /// Moves on to the next slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;
    }

    fn transition(&mut self, from: SlotState, to: SlotState) -> Result<(), SlotTransitionError> {
        let actual = self.states[self.current];
        if actual != from {
            return Err(self.error(actual, to));
        }
        self.states[self.current] = to;
        Ok(())
    }

    fn error(&self, from: SlotState, to: SlotState) -> SlotTransitionError {
        SlotTransitionError {
            slot: self.current,
            from,
            to,
        }
    }
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;
    use std::cmp::Reverse;

    #[test]
    fn test_ring_wraps_over_slots() {
        let mut ring = FrameRing::new();
        let visited: Vec<usize> = (0..5)
            .map(|_| {
                let slot = ring.current();
                ring.advance();
                slot
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_full_cycle_returns_to_idle() {
        let mut ring = FrameRing::new();
        ring.fence_signaled().unwrap();
        ring.begin_acquire().unwrap();
        ring.begin_recording().unwrap();
        ring.mark_submitted().unwrap();
        assert_eq!(ring.state(0), Some(SlotState::Submitted));
        ring.fence_signaled().unwrap();
        assert_eq!(ring.state(0), Some(SlotState::Idle));
    }

    #[test]
    fn test_out_of_order_steps_are_rejected() {
        let mut ring = FrameRing::new();
        let err = ring.mark_submitted().unwrap_err();
        assert_eq!(err.from, SlotState::Idle);
        assert_eq!(err.to, SlotState::Submitted);

        ring.begin_acquire().unwrap();
        assert!(ring.begin_acquire().is_err());
        assert!(ring.fence_signaled().is_err());

        ring.begin_recording().unwrap();
        ring.mark_submitted().unwrap();
        // A submitted slot must see its fence before it is reused.
        assert!(ring.begin_acquire().is_err());
    }

    #[test]
    fn test_interrupted_slot_is_not_waited_on() {
        let mut ring = FrameRing::new();
        ring.ready_to_wait().unwrap();
        ring.fence_signaled().unwrap();
        ring.begin_acquire().unwrap();

        // Acquire failed; the next frame must refuse before touching the fence.
        let err = ring.ready_to_wait().unwrap_err();
        assert_eq!(err.slot, 0);
        assert_eq!(err.from, SlotState::Acquiring);

        ring.begin_recording().unwrap();
        assert_eq!(ring.ready_to_wait().unwrap_err().from, SlotState::Recording);

        ring.mark_submitted().unwrap();
        ring.ready_to_wait().unwrap();
    }

    /// Fake queue: submissions complete in order of their finish time.
    struct SimGpu {
        now: u64,
        pending: BinaryHeap<Reverse<(u64, usize)>>,
        fence_signaled: [bool; MAX_FRAMES_IN_FLIGHT],
    }

    impl SimGpu {
        fn new() -> Self {
            Self {
                now: 0,
                pending: BinaryHeap::new(),
                fence_signaled: [true; MAX_FRAMES_IN_FLIGHT],
            }
        }

        fn pending_for(&self, slot: usize) -> usize {
            self.pending.iter().filter(|Reverse((_, s))| *s == slot).count()
        }

        fn submit(&mut self, slot: usize, latency: u64) {
            assert!(!self.fence_signaled[slot], "submitted with a signaled fence");
            self.pending.push(Reverse((self.now + latency, slot)));
        }

        /// Blocks until `slot`'s fence signals, completing earlier work first.
        fn wait(&mut self, slot: usize) {
            while !self.fence_signaled[slot] {
                let Reverse((done_at, done_slot)) =
                    self.pending.pop().expect("waiting on a fence nothing will signal");
                self.now = self.now.max(done_at);
                self.fence_signaled[done_slot] = true;
            }
        }

        fn reset(&mut self, slot: usize) {
            assert_eq!(
                self.pending_for(slot),
                0,
                "fence reset while slot {} still has work pending",
                slot
            );
            self.fence_signaled[slot] = false;
        }
    }

    #[test]
    fn test_simulated_frames_never_reuse_a_pending_slot() {
        let mut ring = FrameRing::new();
        let mut gpu = SimGpu::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut max_in_flight = 0;

        for frame in 0..500 {
            let slot = ring.current();

            gpu.wait(slot);
            ring.fence_signaled().unwrap();
            gpu.reset(slot);
            ring.begin_acquire().unwrap();

            ring.begin_recording().unwrap();
            assert_eq!(ring.state(slot), Some(SlotState::Recording));

            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            gpu.submit(slot, 1 + seed % 40);
            ring.mark_submitted().unwrap();

            max_in_flight = max_in_flight.max(gpu.pending.len());
            assert!(gpu.pending.len() <= MAX_FRAMES_IN_FLIGHT, "frame {}", frame);

            // CPU time between frames.
            gpu.now += seed % 5;
            ring.advance();
        }

        assert_eq!(max_in_flight, MAX_FRAMES_IN_FLIGHT);
    }
}
