mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{test_config, wait_for, EjectableStorage, ManualTimer, TestCamera};
use lapse::avi::AviSummary;
use lapse::capture::FrameSource;
use lapse::error::StorageOp;
use lapse::pipeline::HardwareTimer;
use lapse::storage::{FsStorage, Storage};
use lapse::{Config, LapseError, Timelapse, Transition};
use tempfile::tempdir;

fn controller(
    config: &Config,
    camera: &Arc<TestCamera>,
    timer: &ManualTimer,
) -> Timelapse<FsStorage> {
    controller_on(config, camera, timer, Arc::new(FsStorage::new()))
}

fn controller_on<S: Storage>(
    config: &Config,
    camera: &Arc<TestCamera>,
    timer: &ManualTimer,
    storage: Arc<S>,
) -> Timelapse<S> {
    let source: Arc<dyn FrameSource> = camera.clone();
    Timelapse::new(config, source, storage, Box::new(timer.clone()))
}

/// Fire the alarm `count` times, waiting for each tick to be handled.
async fn shoot<S: Storage>(timelapse: &Timelapse<S>, timer: &ManualTimer, count: u64) {
    let start = handled(timelapse);
    for i in 1..=count {
        assert!(timer.fire(), "trigger is not running");
        wait_for("tick to be handled", || handled(timelapse) == start + i).await;
    }
}

fn handled<S: Storage>(timelapse: &Timelapse<S>) -> u64 {
    let stats = timelapse.stats();
    stats.frames_taken + stats.frames_dropped
}

fn jpeg_payload(fill: u8, len: usize) -> Vec<u8> {
    let mut data = vec![fill; len];
    data[..2].copy_from_slice(&[0xff, 0xd8]);
    data
}

async fn recorded_file(timelapse: &Timelapse<FsStorage>) -> Vec<u8> {
    let status = timelapse.status().await;
    fs::read(status.output.expect("a recording was made")).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vga_recording_reads_back_frame_for_frame() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let payloads: Vec<Vec<u8>> = (0..5)
        .map(|i| jpeg_payload(i as u8 + 1, 700 + i * 37))
        .collect();
    let camera = TestCamera::jpeg(640, 480, payloads.clone());
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    assert_eq!(
        timelapse.request_recording(true).await.unwrap(),
        Transition::Started
    );
    assert_eq!(timer.config().unwrap().alarm_ticks, 1220);
    shoot(&timelapse, &timer, 5).await;
    assert_eq!(
        timelapse.request_recording(false).await.unwrap(),
        Transition::Stopped
    );

    let bytes = recorded_file(&timelapse).await;
    let summary = AviSummary::parse(&bytes).unwrap();
    assert_eq!(summary.main.total_frames, 5);
    assert_eq!((summary.main.width, summary.main.height), (640, 480));
    assert_eq!((summary.format.width, summary.format.height), (640, 480));
    assert_eq!(summary.fps(), 2.0);
    assert_eq!(summary.stream.length, 5);
    assert_eq!(summary.index.as_ref().map(Vec::len), Some(5));

    let written = summary.indexed_payloads(&bytes).unwrap();
    for (got, want) in written.iter().zip(&payloads) {
        assert_eq!(*got, &want[..]);
    }
    assert_eq!(camera.acquired(), 5);
    assert_eq!(camera.released(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_frame_session_sizes_add_up() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let camera = TestCamera::jpeg(
        320,
        240,
        vec![
            jpeg_payload(1, 1000),
            jpeg_payload(2, 2000),
            jpeg_payload(3, 1500),
        ],
    );
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    timelapse.request_recording(true).await.unwrap();
    shoot(&timelapse, &timer, 3).await;
    timelapse.request_recording(false).await.unwrap();

    let status = timelapse.status().await;
    assert!(!status.recording);
    assert_eq!(status.stats.frames_written, 3);
    assert_eq!(status.stats.max_frame_bytes, 2000);
    let report = status.last_recording.unwrap();
    assert_eq!(report.frames, 3);
    assert_eq!(report.max_frame_bytes, 2000);
    assert!(!config.lapse.index_path().exists());

    let bytes = recorded_file(&timelapse).await;
    let summary = AviSummary::parse(&bytes).unwrap();
    let movi = 4 + (8 + 1000) + (8 + 2000) + (8 + 1500);
    let idx1 = 3 * 16;
    let hdrl = 4 + (8 + 56) + (8 + 4 + (8 + 48) + (8 + 40));
    assert_eq!(summary.movi_size, movi);
    assert_eq!(summary.riff_size, 4 + (8 + hdrl) + (8 + movi) + (8 + idx1));
    assert_eq!(bytes.len() as u64, 8 + summary.riff_size as u64);
    assert_eq!(report.file_size, bytes.len() as u64);

    let index = summary.index.unwrap();
    let offsets: Vec<u32> = index.iter().map(|e| e.offset).collect();
    let sizes: Vec<u32> = index.iter().map(|e| e.size).collect();
    assert_eq!(offsets, vec![4, 4 + 1008, 4 + 1008 + 2008]);
    assert_eq!(sizes, vec![1000, 2000, 1500]);
    assert!(index.iter().all(|e| e.flags == 0 && e.chunk_id.as_str() == "00dc"));

    assert_eq!(summary.main.suggested_buffer_size, 2000);
    assert_eq!(summary.main.max_bytes_per_sec, 4000);
    assert_eq!(summary.stream.suggested_buffer_size, 2000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_requests_report_desync_and_change_nothing() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let camera = TestCamera::jpeg(160, 120, Vec::new());
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    let err = timelapse.request_recording(false).await.unwrap_err();
    assert!(matches!(err, LapseError::StateDesync { recording: false }));
    let idle = timelapse.status().await;
    assert!(!idle.recording);
    assert!(idle.output.is_none());

    timelapse.request_recording(true).await.unwrap();
    shoot(&timelapse, &timer, 2).await;
    let before = timelapse.status().await;

    let err = timelapse.request_recording(true).await.unwrap_err();
    assert!(matches!(err, LapseError::StateDesync { recording: true }));
    let after = timelapse.status().await;
    assert!(after.recording);
    assert!(timer.is_running());
    assert_eq!(after.output, before.output);
    assert_eq!(after.stats, before.stats);

    // Still capturing into the same file
    shoot(&timelapse, &timer, 1).await;
    timelapse.request_recording(false).await.unwrap();
    assert_eq!(timelapse.stats().frames_written, 3);
    assert_eq!(camera.released(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_without_frames_leaves_playable_file() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let camera = TestCamera::jpeg(800, 600, Vec::new());
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    timelapse.request_recording(true).await.unwrap();
    timelapse.request_recording(false).await.unwrap();

    let bytes = recorded_file(&timelapse).await;
    let summary = AviSummary::parse(&bytes).unwrap();
    assert_eq!(summary.main.total_frames, 0);
    assert!(summary.main.has_index());
    assert_eq!(summary.index, Some(Vec::new()));
    assert_eq!(summary.movi_size, 4);
    assert!(summary.chunks.is_empty());
    assert!(!config.lapse.index_path().exists());
    assert_eq!(camera.acquired(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_encoder_drops_newest_frames() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.pipeline.safety_timeout_ms = 100;
    let camera = TestCamera::gated_rgb(8, 8);
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    timelapse.request_recording(true).await.unwrap();

    // First frame is picked up and stalls inside the encoder
    shoot(&timelapse, &timer, 1).await;
    let mut polls = 0;
    while timelapse.status().await.queued != 0 {
        polls += 1;
        assert!(polls < 2500, "encode/mux stage never took the first frame");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    shoot(&timelapse, &timer, 12).await;
    let stats = timelapse.stats();
    assert_eq!(stats.frames_taken, 11);
    assert_eq!(stats.frames_dropped, 2);
    assert_eq!(timelapse.status().await.queued, 10);
    assert_eq!(camera.released(), 2);

    camera.open_gate();
    timelapse.request_recording(false).await.unwrap();

    let stats = timelapse.stats();
    assert_eq!(stats.frames_written, 11);
    assert_eq!(camera.acquired(), 13);
    assert_eq!(camera.released(), 13);

    let bytes = recorded_file(&timelapse).await;
    let summary = AviSummary::parse(&bytes).unwrap();
    assert_eq!(summary.main.total_frames, 11);
    for payload in summary.indexed_payloads(&bytes).unwrap() {
        assert!(lapse::capture::jpeg::is_jpeg(payload));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn settings_apply_to_next_recording_only() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let camera = TestCamera::jpeg(320, 240, Vec::new());
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    assert!(matches!(
        timelapse.set_frame_delay(Duration::ZERO).await,
        Err(LapseError::InvalidSetting { .. })
    ));
    assert!(matches!(
        timelapse.set_video_fps(0).await,
        Err(LapseError::InvalidSetting { .. })
    ));
    timelapse.set_video_fps(5).await.unwrap();
    timelapse
        .set_frame_delay(Duration::from_millis(250))
        .await
        .unwrap();

    timelapse.request_recording(true).await.unwrap();
    assert_eq!(timer.config().unwrap().alarm_ticks, 305);
    assert!(matches!(
        timelapse.set_video_fps(3).await,
        Err(LapseError::Busy)
    ));
    assert!(matches!(
        timelapse.set_frame_delay(Duration::from_secs(5)).await,
        Err(LapseError::Busy)
    ));
    let status = timelapse.status().await;
    assert_eq!((status.video_fps, status.frame_delay_ms), (5, 250));

    shoot(&timelapse, &timer, 2).await;
    timelapse.request_recording(false).await.unwrap();

    let bytes = recorded_file(&timelapse).await;
    let summary = AviSummary::parse(&bytes).unwrap();
    assert_eq!(summary.stream.rate, 5);
    assert_eq!(summary.main.micro_sec_per_frame, 200_000);
    assert_eq!(summary.main.max_bytes_per_sec, 512 * 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn camera_fault_ends_capture_but_not_the_recording() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let camera = TestCamera::jpeg(320, 240, vec![jpeg_payload(7, 300)]);
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    timelapse.request_recording(true).await.unwrap();
    shoot(&timelapse, &timer, 1).await;
    camera.fail_acquire.store(true, Ordering::SeqCst);
    assert!(timer.fire());
    wait_for("camera fault", || timelapse.stats().camera_fault).await;

    let status = timelapse.status().await;
    assert!(status.recording);
    assert!(status.stats.camera_fault);

    timelapse.request_recording(false).await.unwrap();
    let bytes = recorded_file(&timelapse).await;
    let summary = AviSummary::parse(&bytes).unwrap();
    assert_eq!(summary.main.total_frames, 1);
    assert_eq!(camera.acquired(), camera.released());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_index_creation_stays_idle() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    // A directory where the side index should go
    fs::create_dir(config.lapse.index_path()).unwrap();
    let camera = TestCamera::jpeg(320, 240, Vec::new());
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    match timelapse.request_recording(true).await {
        Err(LapseError::Storage { op, path, .. }) => {
            assert_eq!(op, StorageOp::Create);
            assert_eq!(path, config.lapse.index_path());
        }
        other => panic!("expected a storage error, got {:?}", other),
    }
    assert!(!timelapse.status().await.recording);
    assert!(!timer.fire());

    fs::remove_dir(config.lapse.index_path()).unwrap();
    timelapse.request_recording(true).await.unwrap();
    timelapse.request_recording(false).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_stop_still_finalizes() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let camera = TestCamera::gated_rgb(8, 8);
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    timelapse.request_recording(true).await.unwrap();
    shoot(&timelapse, &timer, 3).await;

    // The encoder is stalled, so the stop cannot finish in time
    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        timelapse.request_recording(false),
    )
    .await;
    assert!(waited.is_err());

    camera.open_gate();
    let status = timelapse.status().await;
    assert!(!status.recording);
    assert!(!timer.is_running());
    assert_eq!(status.last_recording.map(|r| r.frames), Some(3));
    assert!(!config.lapse.index_path().exists());
    assert!(matches!(
        timelapse.request_recording(false).await,
        Err(LapseError::StateDesync { recording: false })
    ));

    let bytes = recorded_file(&timelapse).await;
    let summary = AviSummary::parse(&bytes).unwrap();
    assert_eq!(summary.main.total_frames, 3);
    assert_eq!(summary.indexed_payloads(&bytes).unwrap().len(), 3);
    assert_eq!(camera.acquired(), camera.released());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_finalize_is_reported_and_leaves_idle() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let camera = TestCamera::jpeg(320, 240, Vec::new());
    let timer = ManualTimer::default();
    let storage = Arc::new(EjectableStorage::default());
    let timelapse = controller_on(&config, &camera, &timer, Arc::clone(&storage));

    timelapse.request_recording(true).await.unwrap();
    shoot(&timelapse, &timer, 2).await;
    wait_for("frames to be written", || timelapse.stats().frames_written == 2).await;

    storage.eject();
    let err = timelapse.request_recording(false).await.unwrap_err();
    assert!(matches!(err, LapseError::Mux(_)), "got {:?}", err);

    let status = timelapse.status().await;
    assert!(!status.recording);
    assert!(status.last_recording.is_none());
    assert!(!timer.is_running());
    assert!(!config.lapse.index_path().exists());
    assert_eq!(camera.acquired(), camera.released());
    assert!(matches!(
        timelapse.request_recording(false).await,
        Err(LapseError::StateDesync { recording: false })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn back_to_back_recordings_keep_both_files() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let camera = TestCamera::jpeg(320, 240, Vec::new());
    let timer = ManualTimer::default();
    let timelapse = controller(&config, &camera, &timer);

    timelapse.request_recording(true).await.unwrap();
    shoot(&timelapse, &timer, 1).await;
    timelapse.request_recording(false).await.unwrap();
    let first = timelapse.status().await.output.unwrap();

    timelapse.request_recording(true).await.unwrap();
    shoot(&timelapse, &timer, 2).await;
    timelapse.request_recording(false).await.unwrap();
    let second = timelapse.status().await.output.unwrap();

    assert_ne!(first, second);
    for (path, frames) in [(&first, 1), (&second, 2)] {
        let bytes = fs::read(path).unwrap();
        let summary = AviSummary::parse(&bytes).unwrap();
        assert_eq!(summary.main.total_frames, frames, "{}", path.display());
    }
}
