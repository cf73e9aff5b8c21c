//! End-to-end tests of the multi-threaded frame pipeline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ember_commands::BufferUsage;
use ember_render::{RenderBackend, RenderState, Renderer, RendererConfig, ThreadMode};

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
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
        let sum: u32 = data.iter().map(|b| u32::from(*b)).sum();
        self.log.push(format!("create_vertex_buffer:{id}:{}:{sum}", data.len()));
        true
    }

    fn draw(&mut self, state: &RenderState) -> bool {
        self.log.push(format!(
            "draw:{}:{}:{}",
            state.vertex_buffer, state.first_vertex, state.vertex_count
        ));
        true
    }
}

/// Blocks in `begin_frame` until the test feeds it a token (or hangs up).
struct GatedBackend {
    gate: Receiver<()>,
    begun: Arc<AtomicU32>,
    ended: Arc<AtomicU32>,
}

impl RenderBackend for GatedBackend {
    fn begin_frame(&mut self) -> bool {
        self.begun.fetch_add(1, Ordering::SeqCst);
        let _ = self.gate.recv();
        true
    }

    fn end_frame(&mut self) -> bool {
        self.ended.fetch_add(1, Ordering::SeqCst);
        true
    }
}

fn multi_config() -> RendererConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    RendererConfig {
        thread_mode: ThreadMode::Multi,
        buffer_capacity: 4096,
        pool_blocks: 8,
        submission_capacity: 4,
        max_frames_in_flight: 3,
        frame_history: 8,
        vsync: false,
    }
}

fn gated_renderer(
    config: RendererConfig,
) -> (Renderer, Sender<()>, Arc<AtomicU32>, Arc<AtomicU32>) {
    let (gate_tx, gate_rx) = mpsc::channel();
    let begun = Arc::new(AtomicU32::new(0));
    let ended = Arc::new(AtomicU32::new(0));
    let backend = GatedBackend {
        gate: gate_rx,
        begun: Arc::clone(&begun),
        ended: Arc::clone(&ended),
    };
    let renderer = Renderer::with_backend(config, Box::new(backend));
    (renderer, gate_tx, begun, ended)
}

#[test]
fn frames_replay_in_submission_order_on_the_render_thread() {
    let log = EventLog::default();
    let mut renderer =
        Renderer::with_backend(multi_config(), Box::new(LoggingBackend { log: log.clone() }));

    let mut expected = vec!["init".to_string()];
    for frame in 0..2u32 {
        let mut list = renderer.make_command_list().expect("pool has free blocks");
        let data = vec![frame as u8 + 1; 16];
        let sum: u32 = data.iter().map(|b| u32::from(*b)).sum();
        let vb = list.create_vertex_buffer(&data, BufferUsage::Static);
        assert!(list.set_vertex_buffer(vb, 0, 4));
        assert!(list.draw());
        renderer.submit(list).unwrap();
        renderer.commit_frame();

        expected.push("begin_frame".to_string());
        expected.push(format!("create_vertex_buffer:{vb}:16:{sum}"));
        expected.push(format!("draw:{vb}:0:4"));
        expected.push("end_frame".to_string());
    }

    assert!(
        wait_until(Duration::from_secs(5), || log.count("end_frame") == 2),
        "render thread should replay both frames"
    );
    assert_eq!(log.snapshot(), expected);

    // Replayed buffers must be back in the pool.
    assert!(wait_until(Duration::from_secs(5), || renderer.frames_queued() == 0));
    renderer.shutdown();
}

#[test]
fn commits_past_the_in_flight_limit_block_until_a_frame_finishes() {
    let (mut renderer, gate_tx, _begun, _ended) = gated_renderer(multi_config());

    let (progress_tx, progress_rx) = mpsc::channel();
    let producer = thread::spawn(move || {
        for i in 0..4u32 {
            let mut list = renderer.make_command_list().unwrap();
            list.draw();
            renderer.submit(list).unwrap();
            renderer.commit_frame();
            progress_tx.send(i).unwrap();
        }
        renderer
    });

    // Three frames in flight commit without any consumer progress.
    for _ in 0..3 {
        progress_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("commits under the limit must not block");
    }
    // The fourth needs a permit and the consumer is stuck in begin_frame.
    assert!(
        progress_rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "fourth commit should block while three frames are in flight"
    );

    // Let one frame through; its permit unblocks the fourth commit.
    gate_tx.send(()).unwrap();
    progress_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("fourth commit should finish once a frame is consumed");

    // Hang up the gate so the remaining frames replay and shutdown can join.
    drop(gate_tx);
    let renderer = producer.join().expect("producer join");
    drop(renderer);
}

#[test]
fn shutdown_discards_frames_the_consumer_never_picked_up() {
    let (mut renderer, gate_tx, begun, ended) = gated_renderer(multi_config());

    for _ in 0..3 {
        let mut list = renderer.make_command_list().unwrap();
        list.draw();
        renderer.submit(list).unwrap();
        renderer.commit_frame();
    }

    // The consumer is now inside begin_frame of the first frame.
    assert!(wait_until(Duration::from_secs(5), || {
        begun.load(Ordering::SeqCst) == 1
    }));

    let shutdown = thread::spawn(move || {
        renderer.shutdown();
        renderer
    });

    // Join is pending behind the blocked frame.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(begun.load(Ordering::SeqCst), 1);

    // Hanging up lets the in-progress frame finish; the rest are discarded.
    drop(gate_tx);
    let renderer = shutdown.join().expect("shutdown join");

    assert_eq!(begun.load(Ordering::SeqCst), 1, "no discarded frame was begun");
    assert_eq!(ended.load(Ordering::SeqCst), 1, "only the first frame finished");
    assert_eq!(
        renderer.frames_queued(),
        0,
        "discarded frames must return their buffers to the pool"
    );
}

#[test]
fn vsync_paces_replay_until_notified() {
    let log = EventLog::default();
    let config = RendererConfig {
        vsync: true,
        ..multi_config()
    };
    let mut renderer =
        Renderer::with_backend(config, Box::new(LoggingBackend { log: log.clone() }));

    let mut list = renderer.make_command_list().unwrap();
    list.draw();
    renderer.submit(list).unwrap();
    renderer.commit_frame();

    // Without a vsync tick the frame stays unreplayed.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(log.count("end_frame"), 0);

    renderer.notify_vsync();
    assert!(
        wait_until(Duration::from_secs(5), || log.count("end_frame") == 1),
        "frame should replay after the vsync notification"
    );
    renderer.shutdown();
}

#[test]
fn handles_stay_unique_across_producer_frames() {
    let log = EventLog::default();
    let mut renderer =
        Renderer::with_backend(multi_config(), Box::new(LoggingBackend { log: log.clone() }));

    let mut seen = Vec::new();
    for _ in 0..4 {
        let mut list = renderer.make_command_list().unwrap();
        let id = list.create_vertex_buffer(&[1, 2, 3, 4], BufferUsage::Dynamic);
        assert_ne!(id, 0);
        seen.push(id);
        renderer.submit(list).unwrap();
        renderer.commit_frame();
    }

    let mut deduped = seen.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), seen.len(), "handles must never repeat");
    renderer.shutdown();
}
