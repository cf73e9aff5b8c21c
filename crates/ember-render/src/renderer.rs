//! The frame orchestrator.
//!
//! A frame goes through four phases on the producer side: begin (implicit in
//! the previous commit), record ([`Renderer::make_command_list`] +
//! [`Renderer::submit`]), commit ([`Renderer::commit_frame`]) and
//! housekeeping (timing, fps, frame rotation). In multi-threaded mode commit
//! hands the batch to the render thread through the MPSC queue after taking a
//! frames-in-flight permit; in single-threaded mode commit replays the batch
//! inline and returns when the backend has consumed it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use ember_commands::{BufferState, CommandBuffer, CommandList, HandleAllocator};
use ember_core::{BlockPool, MpscQueue, PopError, PushError, Semaphore};

use crate::backend::{NullBackend, RenderBackend};
use crate::dispatch::CommandDispatcher;
use crate::frame::{FrameInfo, FrameRing};

/// Where command buffers are replayed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThreadMode {
    /// `commit_frame` replays the batch on the calling thread.
    Single,
    /// A dedicated render thread drains the submission queue.
    #[default]
    Multi,
}

/// Renderer capacities and policy. All limits are fixed for the lifetime of
/// the [`Renderer`] built from them.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub thread_mode: ThreadMode,
    /// Capacity of each pooled command buffer, in bytes.
    pub buffer_capacity: usize,
    /// Number of command buffers in the pool.
    pub pool_blocks: u32,
    /// Most command lists one frame may carry.
    pub submission_capacity: u32,
    /// Frames the producer may run ahead of the consumer.
    pub max_frames_in_flight: u32,
    /// Length of the timing history ring. Must be a power of two.
    pub frame_history: usize,
    /// Pace replay by an external vsync notification.
    pub vsync: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            thread_mode: ThreadMode::default(),
            buffer_capacity: 512 * 1024,
            pool_blocks: 12,
            submission_capacity: 12,
            max_frames_in_flight: 3,
            frame_history: 16,
            vsync: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The current frame already holds `capacity` command lists; the
    /// submitted list was dropped and its buffer returned to the pool.
    #[error("frame already holds {capacity} command lists")]
    SubmissionFull { capacity: u32 },
}

/// One committed frame on its way to the consumer.
struct FrameSubmission {
    lists: Vec<CommandList>,
    frame_number: u64,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// External frame pacing. The render thread parks here before replaying a
/// frame when vsync is on; the platform layer calls `notify` once per
/// display refresh.
#[derive(Default)]
struct VsyncGate {
    signal: Mutex<bool>,
    arrived: Condvar,
}

impl VsyncGate {
    fn wait_while_active(&self, active: &AtomicBool) {
        let mut signal = lock_unpoisoned(&self.signal);
        while !*signal && active.load(Ordering::Acquire) {
            signal = match self.arrived.wait(signal) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *signal = false;
    }

    fn notify(&self) {
        *lock_unpoisoned(&self.signal) = true;
        self.arrived.notify_all();
    }
}

/// State shared between the committing thread and the render thread.
struct Shared {
    queue: MpscQueue<FrameSubmission>,
    frames_in_flight: Semaphore,
    active: AtomicBool,
    work_pending: Mutex<bool>,
    work_arrived: Condvar,
    vsync: VsyncGate,
    /// Emptied batch vectors waiting to be reused, so steady-state commits
    /// do not allocate.
    spare_batches: Mutex<Vec<Vec<CommandList>>>,
}

impl Shared {
    fn take_batch(&self, capacity: usize) -> Vec<CommandList> {
        lock_unpoisoned(&self.spare_batches)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(capacity))
    }

    fn recycle_batch(&self, batch: Vec<CommandList>) {
        debug_assert!(batch.is_empty());
        lock_unpoisoned(&self.spare_batches).push(batch);
    }
}

/// Consumer half used in single-threaded mode.
struct LocalConsumer {
    backend: Box<dyn RenderBackend + Send>,
    dispatcher: CommandDispatcher,
}

/// Owns the command buffer pool, the submission pipeline and (in
/// multi-threaded mode) the render thread.
pub struct Renderer {
    config: RendererConfig,
    pool: Arc<BlockPool<CommandBuffer>>,
    handles: Arc<HandleAllocator>,
    frames: Arc<FrameRing>,
    shared: Arc<Shared>,
    local: Option<LocalConsumer>,
    render_thread: Option<JoinHandle<()>>,
    submission: Vec<CommandList>,
    frame_number: u64,
    last_commit: Option<Instant>,
    fps: f64,
    fps_average: f64,
    fps_samples: u64,
}

impl Renderer {
    /// A renderer with no device attached; commands are decoded and thrown
    /// away.
    pub fn new(config: RendererConfig) -> Self {
        Self::with_backend(config, Box::new(NullBackend))
    }

    pub fn with_backend(config: RendererConfig, mut backend: Box<dyn RenderBackend + Send>) -> Self {
        let buffer_capacity = config.buffer_capacity;
        let pool = Arc::new(BlockPool::new(config.pool_blocks, |_| {
            CommandBuffer::with_capacity(buffer_capacity)
        }));
        let handles = Arc::new(HandleAllocator::new());
        let frames = Arc::new(FrameRing::new(config.frame_history));
        let shared = Arc::new(Shared {
            queue: MpscQueue::new(config.max_frames_in_flight),
            frames_in_flight: Semaphore::new(config.max_frames_in_flight),
            active: AtomicBool::new(true),
            work_pending: Mutex::new(false),
            work_arrived: Condvar::new(),
            vsync: VsyncGate::default(),
            spare_batches: Mutex::new(Vec::new()),
        });

        let (local, render_thread) = match config.thread_mode {
            ThreadMode::Single => {
                if !backend.init() {
                    error!("backend failed to initialize");
                }
                let local = LocalConsumer {
                    backend,
                    dispatcher: CommandDispatcher::new(),
                };
                (Some(local), None)
            }
            ThreadMode::Multi => {
                let thread_shared = Arc::clone(&shared);
                let thread_frames = Arc::clone(&frames);
                let vsync = config.vsync;
                let handle = thread::spawn(move || {
                    render_thread_main(thread_shared, thread_frames, vsync, backend)
                });
                (None, Some(handle))
            }
        };

        frames.slot(0).begin(0);

        let submission = Vec::with_capacity(config.submission_capacity as usize);
        Self {
            config,
            pool,
            handles,
            frames,
            shared,
            local,
            render_thread,
            submission,
            frame_number: 0,
            last_commit: None,
            fps: 0.0,
            fps_average: 0.0,
            fps_samples: 0,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Checks out a pooled command buffer for recording.
    ///
    /// `None` means every buffer is in flight; the caller should commit or
    /// retry once a frame has been consumed.
    pub fn make_command_list(&self) -> Option<CommandList> {
        let block = self.pool.allocate()?;
        Some(CommandList::new(block, Arc::clone(&self.handles)))
    }

    /// Command buffers currently checked out or waiting to be replayed.
    pub fn frames_queued(&self) -> u32 {
        self.pool.blocks_allocated()
    }

    /// Adds `list` to the frame being recorded. The list is sealed here if
    /// the producer has not already done so.
    pub fn submit(&mut self, mut list: CommandList) -> Result<(), SubmitError> {
        let capacity = self.config.submission_capacity;
        if self.submission.len() >= capacity as usize {
            error!(capacity, "dropping command list, frame submission is full");
            return Err(SubmitError::SubmissionFull { capacity });
        }
        if list.buffer().state() == BufferState::Recording {
            list.finish();
        }
        self.submission.push(list);
        Ok(())
    }

    /// Ends the current frame: hands its command lists to the consumer and
    /// rotates timing state for the next frame.
    ///
    /// In multi-threaded mode this blocks only while `max_frames_in_flight`
    /// frames are already queued or being replayed.
    pub fn commit_frame(&mut self) {
        let frame_number = self.frame_number;
        self.frames.slot(frame_number).sim_end();

        let batch_capacity = self.config.submission_capacity as usize;
        let lists = std::mem::replace(&mut self.submission, self.shared.take_batch(batch_capacity));

        match self.config.thread_mode {
            ThreadMode::Single => {
                if self.config.vsync {
                    self.shared.vsync.wait_while_active(&self.shared.active);
                }
                if let Some(local) = &mut self.local {
                    let submission = FrameSubmission {
                        lists,
                        frame_number,
                    };
                    let mut drained = replay_frame(
                        &mut local.dispatcher,
                        local.backend.as_mut(),
                        &self.frames,
                        submission,
                    );
                    drained.clear();
                    self.shared.recycle_batch(drained);
                }
            }
            ThreadMode::Multi => {
                if !self.shared.active.load(Ordering::Acquire) {
                    warn!(frame_number, "renderer is shut down, discarding frame");
                } else {
                    self.shared.frames_in_flight.acquire();
                    let submission = FrameSubmission {
                        lists,
                        frame_number,
                    };
                    match self.shared.queue.push(submission) {
                        Ok(()) => {
                            *lock_unpoisoned(&self.shared.work_pending) = true;
                            self.shared.work_arrived.notify_one();
                        }
                        Err(PushError::Exhausted) => {
                            // Queue capacity matches the permit count, so this
                            // only happens if a permit leaked.
                            self.shared.frames_in_flight.release();
                            error!(frame_number, "submission queue full, dropping frame");
                        }
                    }
                }
            }
        }

        self.frames.slot(frame_number).end();
        self.frame_number += 1;
        self.frames.slot(self.frame_number).begin(self.frame_number);

        let now = Instant::now();
        if let Some(previous) = self.last_commit.replace(now) {
            let seconds = (now - previous).as_secs_f64();
            if seconds > 0.0 {
                self.fps = 1.0 / seconds;
                self.fps_samples += 1;
                self.fps_average += (self.fps - self.fps_average) / self.fps_samples as f64;
            }
        }
        trace!(frame = self.frame_number, "frame committed");
    }

    /// Timing record from `offset` frames ago (0 is the frame currently
    /// being recorded). `None` once `offset` falls outside the history ring.
    pub fn frame_info(&self, offset: u64) -> Option<FrameInfo> {
        if offset as usize >= self.frames.len() || offset > self.frame_number {
            return None;
        }
        Some(self.frames.snapshot(self.frame_number - offset))
    }

    /// Instantaneous frames per second, from the last two commits.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Running average frames per second over the renderer's lifetime.
    pub fn fps_average(&self) -> f64 {
        self.fps_average
    }

    /// Wakes a vsync-paced render thread for one frame.
    pub fn notify_vsync(&self) {
        self.shared.vsync.notify();
    }

    /// Stops the render thread and discards any frames it had not replayed.
    /// Safe to call more than once; `Drop` calls it too.
    pub fn shutdown(&mut self) {
        if !self.shared.active.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!("shutting down renderer");
        *lock_unpoisoned(&self.shared.work_pending) = true;
        self.shared.work_arrived.notify_all();
        self.shared.vsync.notify();
        if let Some(thread) = self.render_thread.take() {
            if thread.join().is_err() {
                error!("render thread panicked during shutdown");
            }
        }
        // With the consumer gone this thread may drain the queue; discarded
        // frames hand their buffers back to the pool.
        loop {
            match self.shared.queue.pop() {
                Ok(submission) => drop(submission),
                Err(PopError::Inconsistent) => thread::yield_now(),
                Err(PopError::Empty) => break,
            }
        }
        self.submission.clear();
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Replays one frame's lists through `dispatcher` into `backend`, returning
/// the emptied-of-meaning list vector for recycling.
fn replay_frame(
    dispatcher: &mut CommandDispatcher,
    backend: &mut dyn RenderBackend,
    frames: &FrameRing,
    submission: FrameSubmission,
) -> Vec<CommandList> {
    frames.slot(submission.frame_number).gdi_begin();

    dispatcher.reset();
    backend.begin_frame();
    let mut lists = submission.lists;
    for list in &mut lists {
        let buffer = list.buffer_mut();
        if buffer.start_processing().is_err() {
            // Buffer logs the bad state; skip the list rather than replay a
            // half-recorded stream.
            continue;
        }
        buffer.reset_cursor();
        dispatcher.dispatch(buffer, backend);
        buffer.end_processing();
    }
    backend.end_frame();

    frames.slot(submission.frame_number).gdi_end();
    lists
}

fn render_thread_main(
    shared: Arc<Shared>,
    frames: Arc<FrameRing>,
    vsync: bool,
    mut backend: Box<dyn RenderBackend + Send>,
) {
    if !backend.init() {
        error!("backend failed to initialize");
    }
    let mut dispatcher = CommandDispatcher::new();

    while shared.active.load(Ordering::Acquire) {
        {
            let mut pending = lock_unpoisoned(&shared.work_pending);
            while !*pending && shared.active.load(Ordering::Acquire) {
                pending = match shared.work_arrived.wait(pending) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
            *pending = false;
        }

        loop {
            if !shared.active.load(Ordering::Acquire) {
                break;
            }
            match shared.queue.pop() {
                Ok(submission) => {
                    if vsync {
                        shared.vsync.wait_while_active(&shared.active);
                    }
                    let mut lists =
                        replay_frame(&mut dispatcher, backend.as_mut(), &frames, submission);
                    lists.clear();
                    shared.recycle_batch(lists);
                    shared.frames_in_flight.release();
                }
                // A producer is mid-push; its notify is imminent.
                Err(PopError::Inconsistent) => thread::yield_now(),
                Err(PopError::Empty) => break,
            }
        }
    }
    // Anything still queued is dropped with the queue, returning its
    // buffers to the pool.
    trace!("render thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_commands::BufferUsage;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<String>>>);

    impl EventLog {
        fn push(&self, event: impl Into<String>) {
            self.0.lock().unwrap().push(event.into());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut self.0.lock().unwrap())
        }
    }

    struct LoggingBackend {
        log: EventLog,
    }

    impl RenderBackend for LoggingBackend {
        fn init(&mut self) -> bool {
            self.log.push("init");
            true
        }

        fn begin_frame(&mut self) -> bool {
            self.log.push("begin_frame");
            true
        }

        fn end_frame(&mut self) -> bool {
            self.log.push("end_frame");
            true
        }

        fn create_vertex_buffer(&mut self, id: u32, data: &[u8], _usage: BufferUsage) -> bool {
            self.log
                .push(format!("create_vertex_buffer:{id}:{}", data.len()));
            true
        }

        fn draw(&mut self, state: &crate::RenderState) -> bool {
            self.log.push(format!(
                "draw:{}:{}:{}",
                state.vertex_buffer, state.first_vertex, state.vertex_count
            ));
            true
        }
    }

    fn single_threaded(pool_blocks: u32) -> (Renderer, EventLog) {
        let log = EventLog::default();
        let config = RendererConfig {
            thread_mode: ThreadMode::Single,
            buffer_capacity: 4096,
            pool_blocks,
            submission_capacity: 4,
            frame_history: 4,
            ..RendererConfig::default()
        };
        let renderer = Renderer::with_backend(config, Box::new(LoggingBackend { log: log.clone() }));
        (renderer, log)
    }

    #[test]
    fn single_threaded_commit_replays_inline() {
        let (mut renderer, log) = single_threaded(2);
        assert_eq!(log.take(), vec!["init".to_string()]);

        let mut list = renderer.make_command_list().expect("pool has free blocks");
        let data = vec![7u8; 36];
        let vb = list.create_vertex_buffer(&data, BufferUsage::Static);
        assert!(list.set_vertex_buffer(vb, 0, 3));
        assert!(list.draw());
        renderer.submit(list).unwrap();
        renderer.commit_frame();

        assert_eq!(
            log.take(),
            vec![
                "begin_frame".to_string(),
                format!("create_vertex_buffer:{vb}:36"),
                format!("draw:{vb}:0:3"),
                "end_frame".to_string(),
            ]
        );
        // The buffer went back to the pool when the frame finished.
        assert_eq!(renderer.frames_queued(), 0);
    }

    #[test]
    fn command_list_pool_is_backpressure() {
        let (renderer, _log) = single_threaded(2);
        let a = renderer.make_command_list().unwrap();
        let b = renderer.make_command_list().unwrap();
        assert_eq!(renderer.frames_queued(), 2);
        assert!(renderer.make_command_list().is_none());

        drop(a);
        assert!(renderer.make_command_list().is_some());
        drop(b);
    }

    #[test]
    fn submission_capacity_is_enforced() {
        let (mut renderer, _log) = single_threaded(8);
        for _ in 0..4 {
            let list = renderer.make_command_list().unwrap();
            renderer.submit(list).unwrap();
        }
        let overflow = renderer.make_command_list().unwrap();
        assert_eq!(
            renderer.submit(overflow),
            Err(SubmitError::SubmissionFull { capacity: 4 })
        );
        // The rejected list was dropped, freeing its buffer.
        assert_eq!(renderer.frames_queued(), 4);
    }

    #[test]
    fn frame_info_walks_back_through_history() {
        let (mut renderer, _log) = single_threaded(2);
        for _ in 0..3 {
            let mut list = renderer.make_command_list().unwrap();
            list.draw();
            renderer.submit(list).unwrap();
            renderer.commit_frame();
        }

        let current = renderer.frame_info(0).expect("current frame");
        assert_eq!(current.frame_number, 3);
        let previous = renderer.frame_info(1).expect("latest finished frame");
        assert_eq!(previous.frame_number, 2);
        // History is 4 slots; offset 4 has been overwritten conceptually.
        assert!(renderer.frame_info(4).is_none());
    }

    #[test]
    fn fps_counters_move_after_two_commits() {
        let (mut renderer, _log) = single_threaded(2);
        renderer.commit_frame();
        assert_eq!(renderer.fps(), 0.0);
        std::thread::sleep(std::time::Duration::from_millis(2));
        renderer.commit_frame();
        assert!(renderer.fps() > 0.0);
        assert!(renderer.fps_average() > 0.0);
    }
}
