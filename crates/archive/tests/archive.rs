mod common;

use capstore_archive::archive::{ArchiveEvent, DeviceSummary, archive, archive_device};
use capstore_archive::error::ErrorKind;
use capstore_storage::file::timestamp;
use capstore_storage::relocate::temp_path;
use capstore_storage::{ContentType, Hour};
use common::{Fixture, collect, mtime, names, write};
use std::time::SystemTime;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;

fn summary(events: &[capstore_archive::error::Result<ArchiveEvent>]) -> DeviceSummary {
    events
        .iter()
        .find_map(|event| match event {
            Ok(ArchiveEvent::Finished(summary)) => Some(summary.clone()),
            _ => None,
        })
        .expect("every device pass finishes")
}

fn hour(h: u8) -> Hour {
    Hour::new(h).unwrap()
}

#[tokio::test]
async fn test_scenario_a_oldest_beyond_retention_are_bucketed_by_hour() {
    let fixture = Fixture::new(|config| config.hot_retention.captures = 3);
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let hot = device.hot.content_dir(ContentType::Captures);
    let stamps = [
        datetime!(2025-03-01 10:15:00 UTC),
        datetime!(2025-03-01 11:05:00 UTC),
        datetime!(2025-03-01 12:00:00 UTC),
        datetime!(2025-03-01 12:20:00 UTC),
        datetime!(2025-03-01 12:40:00 UTC),
    ];
    for (i, stamp) in stamps.iter().enumerate() {
        write(&hot, &format!("capture_{}.jpg", i + 1), *stamp);
    }

    let cancel = CancellationToken::new();
    let events = collect(archive(&fixture.ctx, &cancel)).await;
    assert!(events.iter().all(Result::is_ok));
    let summary = summary(&events);
    assert_eq!(summary.archived, 2);
    assert!(summary.completed);

    assert_eq!(names(&hot), ["capture_3.jpg", "capture_4.jpg", "capture_5.jpg"]);
    let cold = &device.cold;
    assert_eq!(names(&cold.bucket_dir(ContentType::Captures, hour(10))), ["capture_1.jpg"]);
    assert_eq!(names(&cold.bucket_dir(ContentType::Captures, hour(11))), ["capture_2.jpg"]);
    // Round trip: the move never touches timestamps.
    assert_eq!(mtime(&cold.bucket_dir(ContentType::Captures, hour(10)).join("capture_1.jpg")), stamps[0]);
    assert_eq!(mtime(&cold.bucket_dir(ContentType::Captures, hour(11)).join("capture_2.jpg")), stamps[1]);
    assert!(cold.heartbeat_path().is_file());
}

#[tokio::test]
async fn test_buckets_follow_configured_offset() {
    let fixture = Fixture::new(|config| {
        config.utc_offset = time::macros::offset!(+2);
        config.hot_retention.thumbnails = 0;
    });
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let stamp = datetime!(2025-03-01 23:30:00 UTC);
    write(&device.hot.content_dir(ContentType::Thumbnails), "capture_1_thumbnail.jpg", stamp);

    let cancel = CancellationToken::new();
    collect(archive(&fixture.ctx, &cancel)).await;
    let bucket = device.cold.resolve_bucket(ContentType::Thumbnails, stamp);
    assert!(bucket.ends_with("thumbnails/1"));
    assert_eq!(names(&bucket), ["capture_1_thumbnail.jpg"]);
}

#[tokio::test]
async fn test_second_cycle_moves_nothing() {
    let fixture = Fixture::new(|config| config.hot_retention.segments = 2);
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let base = OffsetDateTime::now_utc() - Duration::hours(1);
    for i in 0..6 {
        write(&device.hot.content_dir(ContentType::Segments), &format!("segment_{i}.ts"), base + Duration::seconds(i));
    }

    let cancel = CancellationToken::new();
    let first = summary(&collect(archive(&fixture.ctx, &cancel)).await);
    assert_eq!(first.archived, 4);
    let second = summary(&collect(archive(&fixture.ctx, &cancel)).await);
    assert_eq!(second.archived, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(names(&device.hot.content_dir(ContentType::Segments)), ["segment_4.ts", "segment_5.ts"]);
}

#[tokio::test]
async fn test_relocation_follows_mtime_not_name() {
    let fixture = Fixture::new(|config| config.hot_retention.segments = 1);
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let dir = device.hot.content_dir(ContentType::Segments);
    let base = OffsetDateTime::now_utc() - Duration::minutes(30);
    // A wrapping counter: names sort in the opposite order of their age.
    for (i, name) in ["segment_9.ts", "segment_8.ts", "segment_7.ts", "segment_1.ts", "segment_0.ts"].iter().enumerate() {
        write(&dir, name, base + Duration::seconds(i as i64));
    }

    let cancel = CancellationToken::new();
    let events = collect(archive(&fixture.ctx, &cancel)).await;
    let moved: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Ok(ArchiveEvent::Archived(archived)) => Some(archived),
            _ => None,
        })
        .collect();
    let order: Vec<_> = moved.iter().map(|a| a.from.file_name().unwrap().to_string_lossy().into_owned()).collect();
    assert_eq!(order, ["segment_9.ts", "segment_8.ts", "segment_7.ts", "segment_1.ts"]);
    assert!(moved.windows(2).all(|pair| pair[0].modified <= pair[1].modified));
    assert_eq!(names(&dir), ["segment_0.ts"]);
}

#[tokio::test]
async fn test_scenario_d_content_types_are_independent() {
    let fixture = Fixture::new(|config| {
        config.hot_retention.captures = 100;
        config.hot_retention.segments = 10;
    });
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let base = OffsetDateTime::now_utc() - Duration::hours(2);
    for i in 0..105 {
        write(&device.hot.content_dir(ContentType::Captures), &format!("capture_{i:06}.jpg"), base + Duration::seconds(i));
    }
    for i in 0..14 {
        write(&device.hot.content_dir(ContentType::Segments), &format!("segment_{i:06}.ts"), base + Duration::seconds(i));
    }

    let cancel = CancellationToken::new();
    let summary = summary(&collect(archive(&fixture.ctx, &cancel)).await);
    assert_eq!(summary.archived, 5 + 4);
    assert_eq!(device.hot.list(ContentType::Captures).await.unwrap().files.len(), 100);
    assert_eq!(device.hot.list(ContentType::Segments).await.unwrap().files.len(), 10);
    // The newest of each survive.
    assert!(device.hot.content_dir(ContentType::Captures).join("capture_000104.jpg").exists());
    assert!(device.hot.content_dir(ContentType::Segments).join("segment_000013.ts").exists());
}

#[tokio::test]
async fn test_scenario_c_interrupted_copy_is_recovered() {
    let fixture = Fixture::new(|config| config.hot_retention.captures = 0);
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let stamp = datetime!(2025-03-01 08:45:00 UTC);
    let source = write(&device.hot.content_dir(ContentType::Captures), "capture_1.jpg", stamp);
    // The crashed run left a truncated temp copy behind and never removed the source.
    let bucket = device.cold.resolve_bucket(ContentType::Captures, stamp);
    std::fs::create_dir_all(&bucket).unwrap();
    std::fs::write(temp_path(&bucket, "capture_1.jpg"), b"capt").unwrap();
    assert!(source.exists());

    let cancel = CancellationToken::new();
    let summary = summary(&collect(archive(&fixture.ctx, &cancel)).await);
    assert_eq!(summary.archived, 1);
    assert!(!source.exists());
    assert_eq!(names(&bucket), ["capture_1.jpg"]);
    assert_eq!(std::fs::read(bucket.join("capture_1.jpg")).unwrap(), b"capture_1.jpg");
}

#[tokio::test]
async fn test_interrupted_after_rename_leaves_single_copy() {
    let fixture = Fixture::new(|config| config.hot_retention.metadata = 0);
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let stamp = datetime!(2025-03-01 17:00:00 UTC);
    let source = write(&device.hot.content_dir(ContentType::Metadata), "capture_2.json", stamp);
    let bucket = device.cold.resolve_bucket(ContentType::Metadata, stamp);
    write(&bucket, "capture_2.json", stamp);

    let cancel = CancellationToken::new();
    collect(archive(&fixture.ctx, &cancel)).await;
    assert!(!source.exists());
    assert_eq!(names(&bucket), ["capture_2.json"]);
}

#[tokio::test]
async fn test_failed_relocation_keeps_source_and_continues() {
    let fixture = Fixture::new(|config| config.hot_retention.captures = 0);
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let hot = device.hot.content_dir(ContentType::Captures);
    let blocked = write(&hot, "capture_1.jpg", datetime!(2025-03-01 10:15:00 UTC));
    write(&hot, "capture_2.jpg", datetime!(2025-03-01 11:15:00 UTC));
    // A regular file where bucket 10 should be.
    std::fs::create_dir_all(device.cold.content_dir(ContentType::Captures)).unwrap();
    std::fs::write(device.cold.bucket_dir(ContentType::Captures, hour(10)), b"not a directory").unwrap();

    let cancel = CancellationToken::new();
    let events = collect(archive(&fixture.ctx, &cancel)).await;
    let errors: Vec<_> = events.iter().filter_map(|e| e.as_ref().err()).collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&**errors[0], ErrorKind::Relocate { path, .. } if path == &blocked));
    assert!(errors[0].is_retryable());

    let summary = summary(&events);
    assert_eq!((summary.archived, summary.failed), (1, 1));
    assert!(blocked.exists());
    assert_eq!(names(&device.cold.bucket_dir(ContentType::Captures, hour(11))), ["capture_2.jpg"]);
}

#[tokio::test]
async fn test_too_fresh_files_wait() {
    let fixture = Fixture::new(|config| {
        config.hot_retention.audio = 0;
        config.archive.min_age_ms = 60_000;
    });
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let dir = device.hot.content_dir(ContentType::Audio);
    let now = OffsetDateTime::now_utc();
    write(&dir, "audio_1.aac", now - Duration::minutes(5));
    write(&dir, "audio_2.aac", now);
    write(&dir, "audio_3.aac", now + Duration::seconds(1));

    let cancel = CancellationToken::new();
    let events = collect(archive(&fixture.ctx, &cancel)).await;
    assert!(events.iter().any(|e| matches!(e, Ok(ArchiveEvent::TooFresh { remaining: 2, .. }))));
    let summary = summary(&events);
    assert_eq!((summary.archived, summary.too_fresh), (1, 2));
    assert_eq!(names(&dir), ["audio_2.aac", "audio_3.aac"]);
}

#[tokio::test]
async fn test_deadline_defers_after_first_file() {
    let fixture = Fixture::new(|config| {
        config.hot_retention.captures = 0;
        config.hot_retention.segments = 0;
        config.archive.device_deadline_ms = 0;
    });
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let base = OffsetDateTime::now_utc() - Duration::hours(1);
    for i in 0..3 {
        write(&device.hot.content_dir(ContentType::Captures), &format!("capture_{i}.jpg"), base + Duration::seconds(i));
        write(&device.hot.content_dir(ContentType::Segments), &format!("segment_{i}.ts"), base + Duration::seconds(i));
    }

    let cancel = CancellationToken::new();
    let events = collect(archive_device(fixture.ctx.config(), fixture.device(), &cancel)).await;
    let summary = summary(&events);
    // Every content type still makes progress.
    assert_eq!(summary.archived, 2);
    assert_eq!(summary.deferred, 4);
    assert!(summary.completed);
    assert_eq!(names(&device.hot.content_dir(ContentType::Captures)), ["capture_1.jpg", "capture_2.jpg"]);
}

#[tokio::test]
async fn test_cancelled_pass_moves_nothing_and_records_no_heartbeat() {
    let fixture = Fixture::new(|config| config.hot_retention.captures = 0);
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    write(&device.hot.content_dir(ContentType::Captures), "capture_1.jpg", datetime!(2025-03-01 10:15:00 UTC));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = summary(&collect(archive(&fixture.ctx, &cancel)).await);
    assert_eq!(summary.archived, 0);
    assert!(!summary.completed);
    assert!(!device.cold.heartbeat_path().exists());
}

#[tokio::test]
async fn test_missing_hot_directory_fails_only_that_content_type() {
    let fixture = Fixture::new(|config| config.hot_retention.captures = 0);
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    std::fs::remove_dir(device.hot.content_dir(ContentType::Audio)).unwrap();
    write(&device.hot.content_dir(ContentType::Captures), "capture_1.jpg", datetime!(2025-03-01 10:15:00 UTC));

    let cancel = CancellationToken::new();
    let events = collect(archive(&fixture.ctx, &cancel)).await;
    assert!(events.iter().any(|e| matches!(e.as_ref().map_err(|e| &**e), Err(ErrorKind::Listing { content: ContentType::Audio, .. }))));
    let summary = summary(&events);
    assert_eq!(summary.archived, 1);
    // A partial pass is not proof of life.
    assert!(!summary.completed);
    assert!(!device.cold.heartbeat_path().exists());
}

#[tokio::test]
async fn test_failing_device_does_not_stop_the_others() {
    let fixture = Fixture::devices(&["capture1", "capture2"], |config| config.hot_retention.captures = 2);
    let broken = fixture.named("capture1");
    let healthy = fixture.named("capture2");
    // capture1 never got its hot tree; capture2 is over retention.
    healthy.hot.ensure_dirs().await.unwrap();
    let hot = healthy.hot.content_dir(ContentType::Captures);
    let base = OffsetDateTime::now_utc() - Duration::minutes(10);
    for i in 0..5 {
        write(&hot, &format!("capture_{i}.jpg"), base + Duration::seconds(i));
    }

    let cancel = CancellationToken::new();
    let events = collect(archive(&fixture.ctx, &cancel)).await;
    let finished = |id: &str| {
        events
            .iter()
            .find_map(|event| match event {
                Ok(ArchiveEvent::Finished(summary)) if summary.device == id => Some(summary.clone()),
                _ => None,
            })
            .unwrap()
    };

    let listing_errors = events
        .iter()
        .filter(|event| match event {
            Err(e) => matches!(&**e, ErrorKind::Listing { device, .. } if device == "capture1"),
            Ok(_) => false,
        })
        .count();
    assert_eq!(listing_errors, ContentType::ALL.len());
    assert!(!finished("capture1").completed);
    assert!(!broken.cold.heartbeat_path().exists());

    let summary = finished("capture2");
    assert_eq!(summary.archived, 3);
    assert_eq!(summary.failed, 0);
    assert!(summary.completed);
    assert_eq!(names(&hot), ["capture_3.jpg", "capture_4.jpg"]);
    assert!(healthy.cold.heartbeat_path().exists());
}

#[tokio::test]
async fn test_unrepresentable_mtime_fails_only_that_file() {
    // tmpfs keeps the full 64-bit mtime; most disk filesystems clamp it.
    let shm = std::path::Path::new("/dev/shm");
    if !shm.is_dir() {
        return;
    }
    let hot_root = tempfile::tempdir_in(shm).unwrap();
    let fixture = Fixture::new(|config| {
        config.hot_retention.captures = 0;
        config.devices[0].hot_path = Some(hot_root.path().to_path_buf());
    });
    let device = fixture.device();
    device.hot.ensure_dirs().await.unwrap();
    let hot = device.hot.content_dir(ContentType::Captures);
    write(&hot, "capture_1.jpg", datetime!(2025-03-01 10:15:00 UTC));
    let far = hot.join("capture_2.jpg");
    std::fs::write(&far, b"far future").unwrap();
    let year_10000 = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(253_402_300_800);
    std::fs::File::options().write(true).open(&far).unwrap().set_modified(year_10000).unwrap();
    if timestamp(std::fs::metadata(&far).unwrap().modified().unwrap()).is_some() {
        return;
    }

    let cancel = CancellationToken::new();
    let events = collect(archive(&fixture.ctx, &cancel)).await;
    assert!(events.iter().any(|e| matches!(
        e.as_ref().map_err(|e| &**e),
        Err(ErrorKind::Listing { content: ContentType::Captures, .. })
    )));
    let summary = summary(&events);
    assert_eq!((summary.archived, summary.failed), (1, 1));
    assert!(far.exists());
    assert_eq!(names(&device.cold.bucket_dir(ContentType::Captures, hour(10))), ["capture_1.jpg"]);
}
