use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use acquisition_kernel::{
    AcquisitionEngine, AcquisitionSession, EngineOptions, Frame, FrameRelay, PixelConverter,
    PixelFormat, ProcessedImage, ProcessingWorker, PublishOutcome, ReconnectOutcome, RelayPolicy,
    Size, SyntheticCamera, SyntheticConfig, Transform, TransformError, WorkerOptions,
};

fn camera() -> SyntheticCamera {
    SyntheticCamera::open(SyntheticConfig {
        sensor: Size::new(32, 16),
        fps: 200,
        ..SyntheticConfig::default()
    })
    .expect("open camera")
}

fn engine_for(camera: &SyntheticCamera) -> AcquisitionEngine {
    AcquisitionEngine::open(
        Box::new(camera.clone()),
        Arc::new(camera.clone()),
        EngineOptions::default(),
    )
    .expect("open engine")
}

fn fast_options() -> WorkerOptions {
    WorkerOptions {
        wait_timeout: Duration::from_millis(50),
        ..WorkerOptions::default()
    }
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn session_delivers_converted_frames() {
    let camera = camera();
    let session = AcquisitionSession::start(
        engine_for(&camera),
        PixelConverter::default(),
        RelayPolicy::RejectNewest,
        fast_options(),
    )
    .unwrap();

    camera.emit_frame();
    let mut latest = None;
    assert!(wait_until(Duration::from_secs(2), || {
        latest = session.take_latest();
        latest.is_some()
    }));
    let image = latest.unwrap();
    assert_eq!(image.pixel_format, PixelFormat::Rgb8);
    assert_eq!(image.source_pixel_format, PixelFormat::BayerRG8);
    assert_eq!(image.size, Size::new(32, 16));
    assert_eq!(image.pixels.len(), 32 * 16 * 3);
    assert_eq!(
        image.describe(),
        "Converted: BayerRG8 [32x16] to RGB8 [32x16]"
    );

    let stats = session.shutdown().unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(camera.stats().announced, 0);
    assert!(!camera.reverse_y());
}

#[test]
fn incomplete_frames_are_never_transformed_or_published() {
    let camera = camera();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let transform = move |frame: &Frame| -> Result<ProcessedImage, TransformError> {
        counted.fetch_add(1, Ordering::SeqCst);
        PixelConverter::default().process(frame)
    };
    let session = AcquisitionSession::start(
        engine_for(&camera),
        transform,
        RelayPolicy::RejectNewest,
        fast_options(),
    )
    .unwrap();

    camera.emit_incomplete_frame();
    assert!(wait_until(Duration::from_secs(2), || {
        session.worker_stats().incomplete == 1
    }));
    assert!(session.take_latest().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(wait_until(Duration::from_secs(1), || camera.stats().held_outside == 0));

    session.shutdown().unwrap();
}

#[test]
fn slow_consumer_never_blocks_the_worker() {
    let camera = camera();
    let session = AcquisitionSession::start(
        engine_for(&camera),
        PixelConverter::default(),
        RelayPolicy::RejectNewest,
        fast_options(),
    )
    .unwrap();
    let generator = camera.spawn_generator();

    // Nobody takes from the relay; the worker must keep recycling.
    assert!(wait_until(Duration::from_secs(5), || {
        camera.stats().frames_emitted >= 40
    }));
    generator.stop();
    let stats = session.worker_stats();
    assert_eq!(stats.published, 1);
    assert!(stats.shed + stats.rejected > 0);
    assert!(session.relay().is_occupied());
    assert_eq!(camera.stats().double_queues, 0);

    session.shutdown().unwrap();
    assert_eq!(camera.stats().announced, 0);
}

#[test]
fn replace_oldest_relay_keeps_latest_result() {
    let relay = FrameRelay::new(RelayPolicy::ReplaceOldest);
    let image = |frame_id: u64| ProcessedImage {
        pixels: vec![0; 3],
        pixel_format: PixelFormat::Rgb8,
        size: Size::new(1, 1),
        source_pixel_format: PixelFormat::Mono8,
        source_size: Size::new(1, 1),
        frame_id,
    };
    assert_eq!(relay.try_publish(image(1)), PublishOutcome::Stored);
    match relay.try_publish(image(2)) {
        PublishOutcome::Replaced(old) => assert_eq!(old.frame_id, 1),
        other => panic!("expected replacement, got {:?}", other),
    }
    assert_eq!(relay.try_take().unwrap().frame_id, 2);
}

#[test]
fn cancel_releases_blocked_worker_promptly() {
    let camera = camera();
    let engine = Arc::new(engine_for(&camera));
    engine.start().unwrap();
    let worker = ProcessingWorker::spawn(
        engine.clone(),
        PixelConverter::default(),
        FrameRelay::default(),
        WorkerOptions {
            wait_timeout: Duration::from_secs(10),
            ..WorkerOptions::default()
        },
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        engine.pool_stats().waiters == 1
    }));

    let started = Instant::now();
    engine.cancel_wait();
    worker.join().unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    engine.stop().unwrap();
    engine.close().unwrap();
}

#[test]
fn stop_while_worker_waits_ends_idle() {
    let camera = camera();
    let engine = Arc::new(engine_for(&camera));
    engine.start().unwrap();
    let worker = ProcessingWorker::spawn(
        engine.clone(),
        PixelConverter::default(),
        FrameRelay::default(),
        fast_options(),
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        engine.pool_stats().waiters == 1
    }));

    engine.stop().unwrap();
    assert!(!engine.is_running());
    assert_eq!(camera.stats().announced, 0);

    engine.cancel_wait();
    let stats = worker.join().unwrap();
    assert_eq!(stats.processed, 0);
}

#[test]
fn session_survives_reboot_with_new_payload() {
    let camera = SyntheticCamera::open(SyntheticConfig {
        sensor: Size::new(20, 10),
        pixel_format: PixelFormat::Mono8,
        ..SyntheticConfig::default()
    })
    .unwrap();
    let engine = engine_for(&camera);
    engine
        .set_roi(acquisition_kernel::Roi {
            offset_x: 0,
            offset_y: 0,
            width: 20,
            height: 5,
        })
        .unwrap();
    let session = AcquisitionSession::start(
        engine,
        PixelConverter::new(PixelFormat::Mono8).unwrap(),
        RelayPolicy::ReplaceOldest,
        fast_options(),
    )
    .unwrap();
    assert_eq!(session.engine().pool_stats().buffer_size, 100);

    camera.simulate_disconnect();
    let event = camera.simulate_reconnect(ReconnectOutcome::Rebooted { roi: None });
    assert!(session.notifier().unwrap().notify(event));
    assert!(wait_until(Duration::from_secs(2), || {
        session.engine().pool_stats().buffer_size == 200 && camera.is_device_streaming()
    }));

    camera.emit_frame();
    let mut latest = None;
    assert!(wait_until(Duration::from_secs(2), || {
        latest = session.take_latest();
        latest.is_some()
    }));
    assert_eq!(latest.unwrap().pixels.len(), 200);

    session.shutdown().unwrap();
    assert_eq!(camera.stats().announced, 0);
}
