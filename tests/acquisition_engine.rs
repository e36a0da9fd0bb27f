use std::sync::Arc;
use std::time::Duration;

use acquisition_kernel::{
    AcquisitionEngine, AcquisitionError, AcquisitionState, EngineOptions, GainChannel,
    PixelFormat, ReconnectAction, ReconnectEvent, ReconnectOutcome, Roi, Size, SyntheticCamera,
    SyntheticConfig,
};

fn open(config: SyntheticConfig) -> (AcquisitionEngine, SyntheticCamera) {
    let camera = SyntheticCamera::open(config).expect("open camera");
    let engine = AcquisitionEngine::open(
        Box::new(camera.clone()),
        Arc::new(camera.clone()),
        EngineOptions::default(),
    )
    .expect("open engine");
    (engine, camera)
}

fn small_camera() -> SyntheticConfig {
    SyntheticConfig {
        sensor: Size::new(16, 8),
        pixel_format: PixelFormat::Mono8,
        ..SyntheticConfig::default()
    }
}

#[test]
fn start_stop_sequences_fold_to_final_state() {
    let (engine, camera) = open(small_camera());
    engine.start().unwrap();
    engine.start().unwrap();
    engine.stop().unwrap();
    engine.start().unwrap();
    assert_eq!(engine.state(), AcquisitionState::Running);

    engine.stop().unwrap();
    engine.stop().unwrap();
    assert_eq!(engine.state(), AcquisitionState::Idle);

    let stats = camera.stats();
    assert_eq!(stats.begin_streaming_commands, 2);
    assert_eq!(stats.end_streaming_commands, 2);
    assert_eq!(stats.announced, 0);
}

#[test]
fn every_frame_round_trips_through_recycle() {
    let (engine, camera) = open(small_camera());
    engine.start().unwrap();

    for expected_id in 1..=50u64 {
        assert!(camera.emit_frame());
        let frame = engine.next_frame(Duration::from_millis(100)).unwrap();
        assert_eq!(frame.frame_id(), expected_id);
        assert_eq!(frame.data().len(), 16 * 8);
        engine.recycle(frame).unwrap();
    }

    let stats = camera.stats();
    assert_eq!(stats.held_outside, 0);
    assert_eq!(stats.double_queues, 0);
    assert_eq!(engine.pool_stats().queued, 3);
}

#[test]
fn frame_held_across_stop_is_refused_on_recycle() {
    let (engine, camera) = open(small_camera());
    engine.start().unwrap();
    camera.emit_frame();
    let frame = engine.next_frame(Duration::from_millis(100)).unwrap();

    engine.stop().unwrap();
    assert!(matches!(
        engine.recycle(frame),
        Err(AcquisitionError::StaleBuffer(_))
    ));
    assert_eq!(camera.stats().announced, 0);
}

#[test]
fn next_frame_without_acquisition_reports_not_running() {
    let (engine, _camera) = open(small_camera());
    assert!(matches!(
        engine.next_frame(Duration::from_millis(20)),
        Err(AcquisitionError::NotRunning)
    ));
}

#[test]
fn roi_change_while_running_reallocates() {
    let (engine, camera) = open(small_camera());
    engine.start().unwrap();
    engine
        .set_roi(Roi {
            offset_x: 0,
            offset_y: 0,
            width: 8,
            height: 8,
        })
        .unwrap();
    assert!(engine.is_running());
    assert_eq!(engine.pool_stats().buffer_size, 64);

    camera.emit_frame();
    let frame = engine.next_frame(Duration::from_millis(100)).unwrap();
    assert_eq!(frame.size(), Size::new(8, 8));
    engine.recycle(frame).unwrap();
}

#[test]
fn plain_parameters_do_not_interrupt_streaming() {
    let (engine, camera) = open(small_camera());
    engine.start().unwrap();
    engine
        .with_parameters(|device| {
            let range = device.exposure_range()?;
            device.set_exposure_us(range.min * 10.0)?;
            device.set_frame_rate(15.0)?;
            device.set_gain(GainChannel::Red, 2.0)?;
            if device.has_focus_stepper() {
                device.set_focus_stepper(512)?;
            }
            Ok(())
        })
        .unwrap();
    assert!(engine.is_running());
    assert_eq!(camera.stats().begin_streaming_commands, 1);
    let gain = engine
        .with_parameters(|device| device.gain(GainChannel::Red))
        .unwrap();
    assert_eq!(gain, 2.0);
}

#[test]
fn reconnect_decision_table() {
    // Successful transport reconnect: settings only.
    let (engine, camera) = open(small_camera());
    engine.start().unwrap();
    camera.simulate_disconnect();
    let event = camera.simulate_reconnect(ReconnectOutcome::Restored);
    assert_eq!(
        engine.handle_reconnect(event).unwrap(),
        ReconnectAction::SettingsReapplied
    );

    // Payload changed across the reboot: full restart with new buffers.
    let (engine, camera) = open(SyntheticConfig {
        sensor: Size::new(100, 20),
        ..small_camera()
    });
    engine
        .set_roi(Roi {
            offset_x: 0,
            offset_y: 0,
            width: 100,
            height: 10,
        })
        .unwrap();
    engine.start().unwrap();
    assert_eq!(engine.pool_stats().buffer_size, 1000);
    camera.simulate_disconnect();
    let event = camera.simulate_reconnect(ReconnectOutcome::Rebooted { roi: None });
    assert_eq!(
        engine.handle_reconnect(event).unwrap(),
        ReconnectAction::Reallocated
    );
    assert_eq!(engine.pool_stats().buffer_size, 2000);
    assert_eq!(camera.stats().announced, 3);

    // Same payload, device idle: begin streaming only, buffers untouched.
    let (engine, camera) = open(small_camera());
    engine.start().unwrap();
    camera.simulate_disconnect();
    let event = camera.simulate_reconnect(ReconnectOutcome::Rebooted { roi: None });
    assert_eq!(
        engine.handle_reconnect(event).unwrap(),
        ReconnectAction::StreamingResumed
    );
    assert_eq!(camera.stats().total_announced, 3);

    // Device still streaming: nothing to do.
    let action = engine
        .handle_reconnect(ReconnectEvent {
            successful: false,
            remote_acquisition_running: true,
        })
        .unwrap();
    assert_eq!(action, ReconnectAction::NoAction);
}

#[test]
fn closed_engine_refuses_operations() {
    let (engine, _camera) = open(small_camera());
    engine.close().unwrap();
    assert!(matches!(engine.start(), Err(AcquisitionError::DeviceClosed)));
    assert!(matches!(
        engine.set_pixel_format(PixelFormat::Mono8),
        Err(AcquisitionError::DeviceClosed)
    ));
    assert!(engine.with_parameters(|device| device.frame_rate()).is_err());
}
