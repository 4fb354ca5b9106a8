// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture session

use depthcam::backends::sensor::{
    BackendError, DepthSensor, Dimensions, SensorEvent, SyntheticSensor, SyntheticSensorConfig,
    find_depth_sensor,
};
use depthcam::pipelines::photo::{EncodedPhoto, ThumbnailGrid};
use depthcam::{
    CaptureSession, CapturedFrame, Config, ConfigurationError, Handlers, SessionError,
    SessionState,
};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

struct Outputs {
    frames: Receiver<CapturedFrame>,
    stills: Receiver<CapturedFrame>,
    thumbnails: Receiver<ThumbnailGrid>,
    photos: Receiver<EncodedPhoto>,
}

fn small_config() -> Config {
    let mut config = Config::default();
    config.format.min_width = 64;
    config
}

fn manual_sensor() -> Arc<SyntheticSensor> {
    Arc::new(SyntheticSensor::new(SyntheticSensorConfig::manual(
        Dimensions::new(64, 48),
        Dimensions::new(32, 24),
    )))
}

fn session_with_outputs(sensor: Arc<SyntheticSensor>) -> (CaptureSession, Outputs) {
    let (frame_tx, frames) = mpsc::channel();
    let (still_tx, stills) = mpsc::channel();
    let (thumb_tx, thumbnails) = mpsc::channel();
    let (photo_tx, photos) = mpsc::channel();

    let handlers = Handlers::new()
        .on_frame(move |f| {
            let _ = frame_tx.send(f);
        })
        .on_still_frame(move |f| {
            let _ = still_tx.send(f);
        })
        .on_thumbnail(move |g| {
            let _ = thumb_tx.send(g);
        })
        .on_photo(move |p| {
            let _ = photo_tx.send(p);
        });

    let session = CaptureSession::new(sensor, &small_config(), handlers).unwrap();
    (
        session,
        Outputs {
            frames,
            stills,
            thumbnails,
            photos,
        },
    )
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_alternating_missing_samples() {
    let sensor = manual_sensor();
    let (session, outputs) = session_with_outputs(sensor.clone());
    session.start().unwrap();
    let selection = session.selection().clone();

    for ts in 1..=10u64 {
        let (mut color, mut depth) = sensor.make_pair(&selection, ts);
        match ts % 3 {
            0 => depth.depth = None,
            1 => color.pixel_buffer = None,
            _ => {}
        }
        assert!(sensor.push(SensorEvent::Color(color)));
        assert!(sensor.push(SensorEvent::Depth(depth)));
    }
    // Trailing complete pair marks the end of the batch
    assert!(sensor.push_frame(11));

    let mut delivered = Vec::new();
    while let Ok(frame) = outputs.frames.recv_timeout(WAIT) {
        delivered.push(frame.timestamp_ns);
        if frame.timestamp_ns == 11 {
            break;
        }
    }

    assert_eq!(delivered, vec![2, 5, 8, 11]);
    assert!(wait_until(|| session.stats().fused == 4));
    assert_eq!(session.stats().dropped, 7);
    assert_eq!(session.state(), SessionState::Streaming);
}

#[test]
fn test_frames_never_cross_pair() {
    let sensor = manual_sensor();
    let (session, outputs) = session_with_outputs(sensor.clone());
    session.start().unwrap();
    let selection = session.selection().clone();

    let (color_1, _) = sensor.make_pair(&selection, 1);
    let (color_2, depth_2) = sensor.make_pair(&selection, 2);
    assert!(sensor.push(SensorEvent::Color(color_1)));
    assert!(sensor.push(SensorEvent::Depth(depth_2)));
    assert!(sensor.push(SensorEvent::Color(color_2)));

    let frame = outputs.frames.recv_timeout(WAIT).unwrap();
    assert_eq!(frame.timestamp_ns, 2);
    assert_eq!(frame.color_dimensions(), Dimensions::new(64, 48));
    assert_eq!(frame.depth_dimensions(), Dimensions::new(32, 24));
    assert!(outputs.frames.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_only_binned_modes_fail_setup() {
    let mut config = SyntheticSensorConfig::default();
    for format in &mut config.formats {
        format.binned = true;
    }
    let sensor = Arc::new(SyntheticSensor::new(config));

    let result = CaptureSession::new(sensor.clone(), &Config::default(), Handlers::new());
    assert!(matches!(result, Err(ConfigurationError::NoMatchingFormat)));
    assert!(!sensor.is_configuration_locked());
}

#[test]
fn test_discovered_sensor_drives_session() {
    let offline: Arc<dyn DepthSensor> = Arc::new(SyntheticSensor::new(SyntheticSensorConfig {
        available: false,
        ..SyntheticSensorConfig::default()
    }));
    let online: Arc<dyn DepthSensor> =
        Arc::new(SyntheticSensor::new(SyntheticSensorConfig::default()));
    let sensor = find_depth_sensor(&[offline, online]).unwrap();

    let (frame_tx, frames) = mpsc::channel();
    let handlers = Handlers::new().on_frame(move |f| {
        let _ = frame_tx.send(f);
    });
    let session = CaptureSession::new(sensor, &Config::default(), handlers).unwrap();
    session.start().unwrap();
    assert!(frames.recv_timeout(WAIT).is_ok());
    session.stop();
}

#[test]
fn test_unavailable_sensor_fails_setup() {
    let sensor = Arc::new(SyntheticSensor::new(SyntheticSensorConfig {
        available: false,
        ..SyntheticSensorConfig::default()
    }));
    let result = CaptureSession::new(sensor, &Config::default(), Handlers::new());
    assert!(matches!(result, Err(ConfigurationError::SensorUnavailable)));
}

#[test]
fn test_still_suspends_until_explicit_resume() {
    let sensor = manual_sensor();
    let (session, outputs) = session_with_outputs(sensor.clone());
    session.start().unwrap();

    assert!(sensor.push_frame(1));
    assert_eq!(outputs.frames.recv_timeout(WAIT).unwrap().timestamp_ns, 1);

    session.request_still_capture().unwrap();
    assert_eq!(session.state(), SessionState::Suspended);
    assert!(!sensor.is_streaming());
    assert!(!sensor.push_frame(2));

    assert!(sensor.complete_pending_photo());
    let still = outputs.stills.recv_timeout(WAIT).unwrap();
    assert_eq!(still.color_dimensions(), Dimensions::new(64, 48));
    assert_eq!(still.depth.format, wgpu::TextureFormat::R16Float);

    let grid = outputs.thumbnails.recv_timeout(WAIT).unwrap();
    assert_eq!((grid.width(), grid.height()), (10, 100));
    let photo = outputs.photos.recv_timeout(WAIT).unwrap();
    assert!(photo.depth_embedded);

    // Completion alone does not restart the stream
    assert_eq!(session.state(), SessionState::Suspended);
    assert!(!sensor.is_streaming());

    session.resume_streaming().unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
    assert!(sensor.push_frame(3));
    assert_eq!(outputs.frames.recv_timeout(WAIT).unwrap().timestamp_ns, 3);

    assert!(wait_until(|| session.stats().stills_delivered == 1));
    let stats = session.stats();
    assert_eq!(stats.thumbnails_delivered, 1);
    assert_eq!(stats.photos_delivered, 1);
}

#[test]
fn test_second_still_rejected_while_in_flight() {
    let sensor = manual_sensor();
    let (session, outputs) = session_with_outputs(sensor.clone());
    session.start().unwrap();

    session.request_still_capture().unwrap();
    assert_eq!(
        session.request_still_capture(),
        Err(SessionError::CaptureInFlight)
    );
    assert_eq!(session.resume_streaming(), Err(SessionError::CaptureInFlight));
    assert_eq!(session.start(), Err(SessionError::CaptureInFlight));
    assert_eq!(sensor.pending_photo_count(), 1);

    assert!(sensor.complete_pending_photo());
    outputs.stills.recv_timeout(WAIT).unwrap();
    assert!(wait_until(|| !session.is_capture_in_flight()));

    // Another still from the suspended state is accepted
    session.request_still_capture().unwrap();
    assert_eq!(sensor.pending_photo_count(), 1);
    assert!(sensor.complete_pending_photo());
    outputs.stills.recv_timeout(WAIT).unwrap();
    assert!(wait_until(|| session.stats().stills_delivered == 2));
}

#[test]
fn test_stopped_session_cannot_restart_during_still() {
    let sensor = manual_sensor();
    let (session, outputs) = session_with_outputs(sensor.clone());
    session.start().unwrap();

    session.request_still_capture().unwrap();
    session.stop();
    assert_eq!(session.state(), SessionState::Idle);

    assert_eq!(session.start(), Err(SessionError::CaptureInFlight));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!sensor.is_streaming());
    assert!(!sensor.push_frame(7));

    assert!(sensor.complete_pending_photo());
    outputs.stills.recv_timeout(WAIT).unwrap();
    assert!(wait_until(|| !session.is_capture_in_flight()));
    assert!(outputs.frames.try_recv().is_err());

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
    assert!(sensor.push_frame(8));
    assert_eq!(outputs.frames.recv_timeout(WAIT).unwrap().timestamp_ns, 8);
}

#[test]
fn test_idle_session_rejects_controls() {
    let sensor = manual_sensor();
    let (session, _outputs) = session_with_outputs(sensor.clone());

    assert_eq!(session.request_still_capture(), Err(SessionError::NotRunning));
    assert_eq!(session.resume_streaming(), Err(SessionError::NotRunning));
    assert_eq!(sensor.pending_photo_count(), 0);

    session.start().unwrap();
    session.stop();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.request_still_capture(), Err(SessionError::NotRunning));
}

#[test]
fn test_filtering_toggle_applies_to_later_frames() {
    let sensor = manual_sensor();
    let (session, outputs) = session_with_outputs(sensor.clone());
    session.start().unwrap();

    assert!(sensor.push_frame(1));
    assert!(outputs.frames.recv_timeout(WAIT).unwrap().depth_filtered);

    session.set_depth_filtering(false);
    assert!(!session.is_depth_filtering_enabled());
    assert!(sensor.push_frame(2));
    assert!(!outputs.frames.recv_timeout(WAIT).unwrap().depth_filtered);

    session.set_depth_filtering(true);
    assert!(sensor.push_frame(3));
    assert!(outputs.frames.recv_timeout(WAIT).unwrap().depth_filtered);
}

#[test]
fn test_failed_still_leaves_session_resumable() {
    let sensor = manual_sensor();
    let (session, outputs) = session_with_outputs(sensor.clone());
    session.start().unwrap();

    session.request_still_capture().unwrap();
    assert!(sensor.complete_pending_photo_with(|photo| photo.depth = None));
    assert!(wait_until(|| session.stats().stills_failed == 1));
    assert!(outputs.stills.try_recv().is_err());

    session.request_still_capture().unwrap();
    assert!(sensor.fail_pending_photo(BackendError::CaptureFailed("shutter".to_string())));
    assert!(wait_until(|| session.stats().stills_failed == 2));
    assert!(!session.is_capture_in_flight());

    session.resume_streaming().unwrap();
    assert!(sensor.push_frame(5));
    assert_eq!(outputs.frames.recv_timeout(WAIT).unwrap().timestamp_ns, 5);
    assert_eq!(session.stats().stills_delivered, 0);
}

#[test]
fn test_timed_sensor_streams_in_order() {
    let sensor = Arc::new(SyntheticSensor::new(SyntheticSensorConfig::default()));
    let (session, outputs) = session_with_outputs(sensor);
    session.start().unwrap();

    let mut last = None;
    for _ in 0..5 {
        let frame = outputs.frames.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.depth_dimensions(), Dimensions::new(256, 192));
        if let Some(previous) = last {
            assert!(frame.timestamp_ns > previous);
        }
        last = Some(frame.timestamp_ns);
    }

    session.stop();
    assert!(session.stats().fused >= 5);
}
