// Integration tests for the track encoder worker
//
// Fake encoders record what they are fed; the LAME tests run the real
// encoder and check the artifact with symphonia and id3.

mod common;

use clipinc::encoder::{
    EncoderOptions, LameEncoderFactory, TrackEncoderWorker, TrackOutcome, WorkerConfig, WorkerEvent, WorkerHandle,
    WorkerPhase,
};
use clipinc::error::CaptureError;
use clipinc::{probe_mp3, Track};
use common::{stereo_frame, FailingEncoderFactory, FakeCover, RecordingEncoderFactory};
use id3::TagLike;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const STEREO: WorkerConfig = WorkerConfig {
    num_channels: 2,
    sample_rate: 44100,
};

async fn ready_worker(
    encoders: RecordingEncoderFactory,
    cover: FakeCover,
    options: EncoderOptions,
) -> (WorkerHandle, UnboundedReceiver<WorkerEvent>) {
    let (worker, events) = TrackEncoderWorker::spawn(Arc::new(encoders), Arc::new(cover)).unwrap();
    worker.init(STEREO, options).await.unwrap();
    (worker, events)
}

fn drain(events: &mut UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn read_tag(bytes: &[u8]) -> id3::Tag {
    id3::Tag::read_from2(Cursor::new(bytes)).expect("artifact should start with an ID3 tag")
}

#[tokio::test]
async fn test_init_rejects_mono_before_any_encoder_exists() {
    let encoders = RecordingEncoderFactory::default();
    let (worker, mut events) =
        TrackEncoderWorker::spawn(Arc::new(encoders.clone()), Arc::new(FakeCover::Unreachable)).unwrap();

    let mono = WorkerConfig {
        num_channels: 1,
        sample_rate: 44100,
    };
    let err = worker.init(mono, EncoderOptions::default()).await.unwrap_err();

    assert!(matches!(err, CaptureError::Configuration(_)));
    assert_eq!(worker.snapshot().await.unwrap().phase, WorkerPhase::Uninitialized);
    assert!(matches!(events.recv().await, Some(WorkerEvent::Error { .. })));

    worker.init(STEREO, EncoderOptions::default()).await.unwrap();
    assert_eq!(worker.snapshot().await.unwrap().phase, WorkerPhase::Ready);
    assert!(encoders.runs().is_empty());
}

#[tokio::test]
async fn test_frames_are_encoded_in_arrival_order() {
    let encoders = RecordingEncoderFactory::default();
    let (worker, _events) = ready_worker(encoders.clone(), FakeCover::Unreachable, EncoderOptions::default()).await;

    worker.start().unwrap();
    for ts in [0, 23, 46, 69, 92] {
        worker.record(stereo_frame(ts, 1024)).unwrap();
    }
    assert_eq!(worker.snapshot().await.unwrap().buffered_frames, 5);

    let outcome = worker.finish(Track::new("A", "T", 1000)).unwrap().await.unwrap();
    let TrackOutcome::Completed(done) = outcome else {
        panic!("expected a completed track, got {:?}", outcome);
    };

    let runs = encoders.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].frames, vec![0, 23, 46, 69, 92]);
    assert_eq!(runs[0].kbps, 256);
    assert!(runs[0].finished);

    assert_eq!(done.track.url, Some(done.artifact.reference()));
    assert!(done.artifact.bytes().starts_with(b"ID3"));

    let snapshot = worker.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, WorkerPhase::Ready);
    assert_eq!(snapshot.buffered_frames, 0);
}

#[tokio::test]
async fn test_track_bitrate_overrides_default() {
    let encoders = RecordingEncoderFactory::default();
    let (worker, _events) = ready_worker(encoders.clone(), FakeCover::Unreachable, EncoderOptions::default()).await;

    let mut track = Track::new("A", "T", 1000);
    track.kbps = Some(128);

    worker.start().unwrap();
    worker.record(stereo_frame(0, 1024)).unwrap();
    worker.finish(track).unwrap().await.unwrap();

    assert_eq!(encoders.runs()[0].kbps, 128);
}

#[tokio::test]
async fn test_cancel_discards_buffer_and_returns_to_ready() {
    let encoders = RecordingEncoderFactory::default();
    let (worker, _events) = ready_worker(encoders.clone(), FakeCover::Unreachable, EncoderOptions::default()).await;

    worker.start().unwrap();
    for ts in 0..3 {
        worker.record(stereo_frame(ts, 512)).unwrap();
    }
    worker.cancel().unwrap();

    let snapshot = worker.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, WorkerPhase::Ready);
    assert_eq!(snapshot.buffered_frames, 0);

    worker.start().unwrap();
    worker.record(stereo_frame(100, 512)).unwrap();
    worker.record(stereo_frame(101, 512)).unwrap();
    let outcome = worker.finish(Track::new("A", "T", 1000)).unwrap().await.unwrap();

    assert!(matches!(outcome, TrackOutcome::Completed(_)));
    assert_eq!(encoders.runs()[0].frames, vec![100, 101]);
}

#[tokio::test]
async fn test_cancel_while_ready_is_a_no_op() {
    let (worker, mut events) =
        ready_worker(RecordingEncoderFactory::default(), FakeCover::Unreachable, EncoderOptions::default()).await;

    worker.cancel().unwrap();

    assert_eq!(worker.snapshot().await.unwrap().phase, WorkerPhase::Ready);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_one() {
    let options = EncoderOptions {
        progress_interval: Duration::ZERO,
        ..EncoderOptions::default()
    };
    let encoders = RecordingEncoderFactory::slow(Duration::from_millis(2));
    let (worker, mut events) = ready_worker(encoders, FakeCover::Unreachable, options).await;

    worker.start().unwrap();
    for ts in 0..20 {
        worker.record(stereo_frame(ts, 256)).unwrap();
    }
    let outcome = worker.finish(Track::new("A", "T", 1000)).unwrap().await.unwrap();
    assert!(matches!(outcome, TrackOutcome::Completed(_)));

    let seen = drain(&mut events);
    let progress: Vec<f32> = seen
        .iter()
        .filter_map(|event| match event {
            WorkerEvent::Progress { progress } => Some(*progress),
            _ => None,
        })
        .collect();

    assert!(progress.len() > 2);
    assert_eq!(progress[0], 0.0);
    assert_eq!(*progress.last().unwrap(), 1.0);
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));

    // Completion comes after the final progress report
    assert!(matches!(seen.last(), Some(WorkerEvent::Complete { .. })));
}

#[tokio::test]
async fn test_cancel_during_encoding_produces_no_artifact() {
    let encoders = RecordingEncoderFactory::slow(Duration::from_millis(10));
    let (worker, mut events) = ready_worker(encoders.clone(), FakeCover::Unreachable, EncoderOptions::default()).await;

    worker.start().unwrap();
    for ts in 0..100 {
        worker.record(stereo_frame(ts, 256)).unwrap();
    }
    let done = worker.finish(Track::new("A", "T", 1000)).unwrap();
    worker.cancel().unwrap();

    assert!(matches!(done.await.unwrap(), TrackOutcome::Cancelled));
    assert!(encoders.runs()[0].frames.len() < 100);
    assert!(!drain(&mut events)
        .iter()
        .any(|event| matches!(event, WorkerEvent::Complete { .. })));

    let snapshot = worker.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, WorkerPhase::Ready);
    assert_eq!(snapshot.buffered_frames, 0);
}

#[tokio::test]
async fn test_cancel_during_cover_fetch_produces_no_artifact() {
    let (worker, _events) =
        ready_worker(RecordingEncoderFactory::default(), FakeCover::Hanging, EncoderOptions::default()).await;

    let mut track = Track::new("A", "T", 1000);
    track.cover_url = "https://covers.example/a.jpg".to_string();

    worker.start().unwrap();
    worker.record(stereo_frame(0, 1024)).unwrap();
    let done = worker.finish(track).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.snapshot().await.unwrap().phase, WorkerPhase::Finishing);

    worker.cancel().unwrap();

    assert!(matches!(done.await.unwrap(), TrackOutcome::Cancelled));
    assert_eq!(worker.snapshot().await.unwrap().phase, WorkerPhase::Ready);
}

#[tokio::test]
async fn test_commands_during_finish_apply_to_the_next_track() {
    let encoders = RecordingEncoderFactory::slow(Duration::from_millis(5));
    let (worker, _events) = ready_worker(encoders.clone(), FakeCover::Unreachable, EncoderOptions::default()).await;

    worker.start().unwrap();
    for ts in 0..10 {
        worker.record(stereo_frame(ts, 256)).unwrap();
    }
    let first = worker.finish(Track::new("A", "One", 1000)).unwrap();

    // Next track starts while the first one is still encoding
    worker.start().unwrap();
    worker.record(stereo_frame(500, 256)).unwrap();
    worker.cancel().unwrap();

    assert!(matches!(first.await.unwrap(), TrackOutcome::Completed(_)));

    let snapshot = worker.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, WorkerPhase::Ready);
    assert_eq!(encoders.runs().len(), 1);
    assert_eq!(encoders.runs()[0].frames.len(), 10);
}

#[tokio::test]
async fn test_encoding_failure_is_reported_and_worker_recovers() {
    let (worker, mut events) =
        TrackEncoderWorker::spawn(Arc::new(FailingEncoderFactory), Arc::new(FakeCover::Unreachable)).unwrap();
    worker.init(STEREO, EncoderOptions::default()).await.unwrap();

    worker.start().unwrap();
    worker.record(stereo_frame(0, 256)).unwrap();
    let outcome = worker.finish(Track::new("A", "T", 1000)).unwrap().await.unwrap();

    assert!(matches!(outcome, TrackOutcome::Failed(CaptureError::Encoding(_))));
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, WorkerEvent::Error { .. })));
    assert_eq!(worker.snapshot().await.unwrap().phase, WorkerPhase::Ready);
}

#[tokio::test]
async fn test_finish_without_start_is_rejected() {
    let (worker, _events) =
        ready_worker(RecordingEncoderFactory::default(), FakeCover::Unreachable, EncoderOptions::default()).await;

    let outcome = worker.finish(Track::new("A", "T", 1000)).unwrap().await.unwrap();

    assert!(matches!(outcome, TrackOutcome::Failed(CaptureError::InvalidState(_))));
    assert_eq!(worker.snapshot().await.unwrap().phase, WorkerPhase::Ready);
}

#[tokio::test]
async fn test_buffer_limit_drops_newest_frames() {
    let options = EncoderOptions {
        max_buffered_frames: Some(3),
        ..EncoderOptions::default()
    };
    let encoders = RecordingEncoderFactory::default();
    let (worker, _events) = ready_worker(encoders.clone(), FakeCover::Unreachable, options).await;

    worker.start().unwrap();
    for ts in 0..5 {
        worker.record(stereo_frame(ts, 256)).unwrap();
    }
    worker.finish(Track::new("A", "T", 1000)).unwrap().await.unwrap();

    assert_eq!(encoders.runs()[0].frames, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_cover_failure_still_completes_without_picture() {
    let (worker, _events) =
        ready_worker(RecordingEncoderFactory::default(), FakeCover::Unreachable, EncoderOptions::default()).await;

    let mut track = Track::new("A", "T", 1000);
    track.cover_url = "https://covers.example/missing.jpg".to_string();

    worker.start().unwrap();
    worker.record(stereo_frame(0, 256)).unwrap();
    let TrackOutcome::Completed(done) = worker.finish(track).unwrap().await.unwrap() else {
        panic!("cover failure must not fail the track");
    };

    assert!(read_tag(done.artifact.bytes()).pictures().next().is_none());
}

#[tokio::test]
async fn test_cover_and_optional_frames_are_written() {
    let (worker, _events) =
        ready_worker(RecordingEncoderFactory::default(), FakeCover::png(), EncoderOptions::default()).await;

    let mut track = Track::new("Daft Punk", "One More Time", 320_000);
    track.cover_url = "https://covers.example/discovery.png".to_string();
    track.album = Some("Discovery".to_string());
    track.album_artist = Some("Daft Punk".to_string());
    track.track_number = Some(1);
    track.disc_number = Some(1);
    track.release_year = Some(2001);

    worker.start().unwrap();
    worker.record(stereo_frame(0, 256)).unwrap();
    let TrackOutcome::Completed(done) = worker.finish(track).unwrap().await.unwrap() else {
        panic!("expected a completed track");
    };

    let tag = read_tag(done.artifact.bytes());
    assert_eq!(tag.artist(), Some("Daft Punk"));
    assert_eq!(tag.title(), Some("One More Time"));
    assert_eq!(tag.album(), Some("Discovery"));
    assert_eq!(tag.album_artist(), Some("Daft Punk"));
    assert_eq!(tag.track(), Some(1));
    assert_eq!(tag.year(), Some(2001));

    let picture = tag.pictures().next().expect("cover should be embedded");
    assert_eq!(picture.mime_type, "image/png");
}

#[tokio::test]
async fn test_lame_stereo_track_without_cover() {
    let (worker, _events) = TrackEncoderWorker::spawn(Arc::new(LameEncoderFactory), Arc::new(FakeCover::png())).unwrap();
    worker.init(STEREO, EncoderOptions::default()).await.unwrap();

    worker.start().unwrap();
    for i in 0..10 {
        worker.record(stereo_frame(i * 23, 1024)).unwrap();
    }

    let track = Track::new("A", "T", 2000);
    let TrackOutcome::Completed(done) = worker.finish(track).unwrap().await.unwrap() else {
        panic!("expected a completed track");
    };

    let tag = read_tag(done.artifact.bytes());
    assert_eq!(tag.artist(), Some("A"));
    assert_eq!(tag.title(), Some("T"));
    assert_eq!(tag.duration(), Some(2000));
    assert!(tag.pictures().next().is_none());
    assert!(tag.album().is_none());

    let info = probe_mp3(done.artifact.into_bytes()).unwrap();
    assert_eq!(info.sample_rate, Some(44100));
    assert_eq!(info.channels, Some(2));
    assert!(info.packets > 0);
}

#[tokio::test]
async fn test_lame_zero_frame_track_is_still_valid_mp3() {
    let (worker, _events) =
        TrackEncoderWorker::spawn(Arc::new(LameEncoderFactory), Arc::new(FakeCover::Unreachable)).unwrap();
    worker.init(STEREO, EncoderOptions::default()).await.unwrap();

    worker.start().unwrap();
    let TrackOutcome::Completed(done) = worker.finish(Track::new("A", "Silence", 0)).unwrap().await.unwrap() else {
        panic!("an empty track still produces an artifact");
    };

    let info = probe_mp3(done.artifact.into_bytes()).unwrap();
    assert_eq!(info.sample_rate, Some(44100));
    assert!(info.packets >= 1);
}

#[tokio::test]
async fn test_dropping_handle_stops_the_worker() {
    let (worker, mut events) =
        ready_worker(RecordingEncoderFactory::default(), FakeCover::Unreachable, EncoderOptions::default()).await;

    worker.start().unwrap();
    worker.record(stereo_frame(0, 256)).unwrap();
    drop(worker);

    // The event sender goes away with the worker thread
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
}
