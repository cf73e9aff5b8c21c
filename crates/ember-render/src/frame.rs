//! Per-frame timing records.

use std::sync::{Mutex, MutexGuard};

use ember_core::Stopwatch;

/// Timing record for one frame.
///
/// The simulation and cpu phases are measured on the committing thread, the
/// gdi and gpu phases on whichever thread replays the frame. Both sides find
/// the record through the [`FrameRing`], which serializes access per slot.
#[derive(Clone, Debug, Default)]
pub struct FrameInfo {
    pub frame_number: u64,
    total: Stopwatch,
    sim: Stopwatch,
    cpu: Stopwatch,
    gdi: Stopwatch,
    gpu: Stopwatch,
}

impl FrameInfo {
    /// Rearms the record for a new frame and starts the total, cpu and sim
    /// clocks.
    pub fn begin(&mut self, frame_number: u64) {
        self.frame_number = frame_number;
        self.gdi = Stopwatch::new();
        self.gpu = Stopwatch::new();
        self.total.start();
        self.cpu.start();
        self.sim.start();
    }

    /// Marks the end of simulation work, at commit time.
    pub fn sim_end(&mut self) {
        self.sim.stop();
    }

    pub fn gdi_begin(&mut self) {
        self.gdi.start();
    }

    pub fn gdi_end(&mut self) {
        self.gdi.stop();
    }

    pub fn gpu_begin(&mut self) {
        self.gpu.start();
    }

    pub fn gpu_end(&mut self) {
        self.gpu.stop();
    }

    /// Latches the cpu and total clocks once the frame has been handed off.
    pub fn end(&mut self) {
        self.cpu.stop();
        self.total.stop();
    }

    pub fn total_ms(&self) -> f64 {
        self.total.elapsed_ms()
    }

    pub fn sim_ms(&self) -> f64 {
        self.sim.elapsed_ms()
    }

    pub fn cpu_ms(&self) -> f64 {
        self.cpu.elapsed_ms()
    }

    pub fn gdi_ms(&self) -> f64 {
        self.gdi.elapsed_ms()
    }

    pub fn gpu_ms(&self) -> f64 {
        self.gpu.elapsed_ms()
    }
}

/// Power-of-two ring of [`FrameInfo`] slots indexed by frame number.
///
/// The ring is allocated once and lives as long as the renderer; a frame's
/// slot is reused once the ring wraps, so history queries are bounded by the
/// ring size.
pub struct FrameRing {
    slots: Box<[Mutex<FrameInfo>]>,
    mask: u64,
}

impl FrameRing {
    /// # Panics
    ///
    /// Panics if `history` is zero or not a power of two.
    pub fn new(history: usize) -> Self {
        assert!(
            history.is_power_of_two(),
            "frame history must be a power of two"
        );
        let slots: Box<[Mutex<FrameInfo>]> = (0..history)
            .map(|_| Mutex::new(FrameInfo::default()))
            .collect();
        Self {
            slots,
            mask: history as u64 - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Locks the slot for `frame_number`.
    pub fn slot(&self, frame_number: u64) -> MutexGuard<'_, FrameInfo> {
        let slot = &self.slots[(frame_number & self.mask) as usize];
        match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Clones the record for `frame_number` as it stands right now.
    pub fn snapshot(&self, frame_number: u64) -> FrameInfo {
        self.slot(frame_number).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn phases_nest_inside_the_total() {
        let mut info = FrameInfo::default();
        info.begin(1);
        std::thread::sleep(Duration::from_millis(2));
        info.sim_end();
        info.gdi_begin();
        std::thread::sleep(Duration::from_millis(2));
        info.gdi_end();
        info.end();

        assert!(info.sim_ms() > 0.0);
        assert!(info.gdi_ms() > 0.0);
        assert!(info.total_ms() >= info.sim_ms());
        assert!(info.total_ms() >= info.gdi_ms());
    }

    #[test]
    fn ring_wraps_at_its_history_length() {
        let ring = FrameRing::new(4);
        for frame in 0..6u64 {
            ring.slot(frame).begin(frame);
        }
        // Frame 0's slot was reused by frame 4.
        assert_eq!(ring.snapshot(0).frame_number, 4);
        assert_eq!(ring.snapshot(5).frame_number, 5);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_history_is_rejected() {
        let _ = FrameRing::new(6);
    }
}
