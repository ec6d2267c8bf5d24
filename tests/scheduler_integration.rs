// Wavesink - Music Downloader for Deezer
// Copyright (C) 2025 Wavesink contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! End-to-end scheduler scenarios against a local range-capable media
//! server: FIFO order and the concurrency cap, partial-success albums,
//! interrupted-stream resumption, pause/resume, and duplicate admission.

mod common;

use common::*;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use wavesink::api::models::{Album, CustomPlaylist};
use wavesink::api::ServiceApi;
use wavesink::app::App;
use wavesink::config::Settings;
use wavesink::crypto::PassthroughDecryptor;
use wavesink::download::{DownloadManager, Downloader, Notifier};
use wavesink::error::WavesinkError;
use wavesink::net::HttpClients;
use wavesink::recovery::RecoveryManager;
use wavesink::retry::RetryConfig;
use wavesink::store::{album_row_id, playlist_row_id, ItemStatus, Store};

struct Rig {
    manager: Arc<DownloadManager>,
    store: Arc<Store>,
    api: Arc<MockApi>,
    server: Arc<MediaServer>,
    notifier: Arc<RecordingNotifier>,
    _dir: tempfile::TempDir,
}

async fn rig(workers: u32) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let server = MediaServer::start();
    let api = MockApi::new(server.base_url());
    let notifier = RecordingNotifier::new();
    let store = Arc::new(Store::in_memory().await.unwrap());
    let settings = test_settings(dir.path(), workers);

    let clients = HttpClients::build(&settings.network).unwrap();
    let downloader = Arc::new(Downloader::new(
        api.clone() as Arc<dyn ServiceApi>,
        Arc::new(PassthroughDecryptor),
        clients,
    ));
    let recovery = Arc::new(RecoveryManager::new(
        Arc::new(OkRefresher),
        RetryConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_retries: settings.network.max_retries,
            jitter: false,
        },
    ));

    let manager = DownloadManager::new(
        Arc::new(App::new()),
        Arc::clone(&store),
        api.clone() as Arc<dyn ServiceApi>,
        downloader,
        recovery,
        notifier.clone() as Arc<dyn Notifier>,
        Arc::new(RwLock::new(settings)),
    );
    manager.start().await.unwrap();

    Rig {
        manager,
        store,
        api,
        server,
        notifier,
        _dir: dir,
    }
}

fn audio_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

async fn wait_status(store: &Store, id: &str, status: ItemStatus) -> bool {
    let store = store.clone();
    let id = id.to_string();
    wait_until(Duration::from_secs(20), move || {
        let store = store.clone();
        let id = id.clone();
        async move {
            matches!(
                store.get_item(&id).await.unwrap(),
                Some(row) if row.status == status
            )
        }
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_track_lands_tagged_in_place() {
    let rig = rig(2).await;
    let body = audio_bytes(128 * 1024, 1);
    rig.api.add_track(track("t1", "Glass Harbor", "Mira Voss", "Tidelines", 1));
    rig.server.add_file("t1", body.clone());

    rig.manager.download_track("t1").await.unwrap();
    assert!(wait_status(&rig.store, "t1", ItemStatus::Completed).await);

    let row = rig.store.get_item("t1").await.unwrap().unwrap();
    let output = row.output_path.expect("output path recorded");
    let written = std::fs::read(&output).unwrap();
    // Tagging may prepend an ID3 block; the audio payload must be intact
    assert!(written.ends_with(&body));
    assert!(row.partial_file_path.is_none());
    assert!(!std::path::Path::new(&format!("{output}.part")).exists());

    // History gained exactly one row for the track
    let history = rig.store.history_page(0, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].track_id, "t1");
    assert_eq!(history[0].quality, "MP3_320");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifo_order_and_concurrency_cap() {
    let rig = rig(4).await;
    rig.server.set_response_delay(Duration::from_millis(80));

    let tracks: Vec<_> = (0..16)
        .map(|i| track(&format!("q{i:02}"), &format!("Track {i}"), "Mira Voss", "Live", i + 1))
        .collect();
    for t in &tracks {
        rig.server.add_file(&t.id, audio_bytes(16 * 1024, t.track_number.unwrap() as u8));
    }

    let payload = serde_json::to_string(&CustomPlaylist {
        name: "Imported".into(),
        tracks: tracks.clone(),
    })
    .unwrap();
    rig.manager.download_custom_playlist(&payload).await.unwrap();

    let parent_id = {
        let page = rig.store.list_queue(0, 10, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        page.items[0].id.clone()
    };
    assert!(wait_status(&rig.store, &parent_id, ItemStatus::Completed).await);

    // Never more than the worker pool in flight
    assert!(
        rig.server.max_concurrent() <= 4,
        "cap violated: {} concurrent",
        rig.server.max_concurrent()
    );

    // Every child started exactly once
    let mut starts: Vec<String> = rig
        .notifier
        .statuses()
        .into_iter()
        .filter(|s| s.status == ItemStatus::Downloading && s.id.starts_with('q'))
        .map(|s| s.id)
        .collect();
    starts.sort();
    let expected: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
    assert_eq!(starts, expected);

    // The parent's terminal notification came after every child's
    let statuses = rig.notifier.statuses();
    let parent_done = statuses
        .iter()
        .position(|s| s.id == parent_id && s.status == ItemStatus::Completed)
        .expect("parent terminal event");
    for t in &tracks {
        let child_done = statuses
            .iter()
            .position(|s| s.id == t.id && s.status == ItemStatus::Completed)
            .expect("child terminal event");
        assert!(child_done < parent_done);
    }

    let parent = rig.store.get_item(&parent_id).await.unwrap().unwrap();
    assert_eq!(parent.completed_tracks, 16);
    assert_eq!(parent.total_tracks, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_worker_runs_strictly_fifo() {
    let rig = rig(1).await;

    let tracks: Vec<_> = (0..6)
        .map(|i| track(&format!("s{i}"), &format!("Track {i}"), "Mira Voss", "Live", i + 1))
        .collect();
    for t in &tracks {
        rig.server.add_file(&t.id, audio_bytes(8 * 1024, 21));
    }
    let payload = serde_json::to_string(&CustomPlaylist {
        name: "Strict".into(),
        tracks: tracks.clone(),
    })
    .unwrap();
    rig.manager.download_custom_playlist(&payload).await.unwrap();

    let parent_id = rig.store.list_queue(0, 10, None).await.unwrap().items[0]
        .id
        .clone();
    assert!(wait_status(&rig.store, &parent_id, ItemStatus::Completed).await);

    let starts: Vec<String> = rig
        .notifier
        .statuses()
        .into_iter()
        .filter(|s| s.status == ItemStatus::Downloading && s.id.starts_with('s'))
        .map(|s| s.id)
        .collect();
    let expected: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
    assert_eq!(starts, expected, "one worker must preserve admission order");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn album_with_missing_tracks_is_a_partial_success() {
    let rig = rig(3).await;

    let tracks: Vec<_> = (0..12)
        .map(|i| track(&format!("al{i:02}"), &format!("Track {i}"), "Mira Voss", "Tidelines", i + 1))
        .collect();
    for t in &tracks {
        rig.server.add_file(&t.id, audio_bytes(8 * 1024, 7));
    }
    // Two tracks have no stream at the requested quality
    rig.api.mark_stream_missing("al03");
    rig.api.mark_stream_missing("al09");

    rig.api.add_album(Album {
        id: "99".into(),
        title: "Tidelines".into(),
        artist: "Mira Voss".into(),
        cover_url: None,
        release_year: Some(2024),
        tracks,
    });

    rig.manager.download_album("99").await.unwrap();
    let parent_id = album_row_id("99");
    assert!(wait_status(&rig.store, &parent_id, ItemStatus::Completed).await);

    let parent = rig.store.get_item(&parent_id).await.unwrap().unwrap();
    assert!(parent.is_partial_success());
    assert_eq!(parent.completed_tracks, 10);
    assert_eq!(parent.total_tracks, 12);

    let failed = rig.store.failed_tracks(&parent_id).await.unwrap();
    assert_eq!(failed.len(), 2);
    let failed_ids: Vec<&str> = failed.iter().map(|f| f.track_id.as_str()).collect();
    assert!(failed_ids.contains(&"al03"));
    assert!(failed_ids.contains(&"al09"));

    // Stats bucket the parent under completed; clear-completed keeps it
    let stats = rig.store.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    rig.manager.clear_completed().await.unwrap();
    assert!(rig.store.get_item(&parent_id).await.unwrap().is_some());

    // A not-found stream is never retried
    assert_eq!(
        rig.store.get_item("al03").await.unwrap().unwrap().retry_count,
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupted_stream_resumes_with_a_range_request() {
    let rig = rig(1).await;
    let body = audio_bytes(256 * 1024, 3);
    rig.api.add_track(track("rz", "Riptide", "Mira Voss", "Tidelines", 1));
    // First response dies after 64 KiB
    rig.server.add_flaky_file("rz", body.clone(), 64 * 1024);

    rig.manager.download_track("rz").await.unwrap();
    assert!(wait_status(&rig.store, "rz", ItemStatus::Completed).await);

    // The retry resumed instead of restarting; depending on how much of
    // the truncated body the client kept, the offset is at most the cut
    let ranges = rig.server.ranges_seen();
    assert!(
        ranges
            .iter()
            .any(|(path, start)| path == "/media/rz" && *start > 0 && *start <= 64 * 1024),
        "expected a nonzero resume offset, saw {ranges:?}"
    );

    let row = rig.store.get_item("rz").await.unwrap().unwrap();
    assert!(row.retry_count >= 1);
    let written = std::fs::read(row.output_path.unwrap()).unwrap();
    assert!(written.ends_with(&body));
    assert_eq!(rig.server.hits_for("rz"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_keeps_the_part_file_and_resume_continues() {
    let rig = rig(1).await;
    let body = audio_bytes(512 * 1024, 9);
    rig.api.add_track(track("pz", "Undertow", "Mira Voss", "Tidelines", 1));
    rig.server.add_file("pz", body.clone());
    rig.server.set_chunk_delay(Duration::from_millis(40));

    rig.manager.download_track("pz").await.unwrap();

    // Wait for some bytes to land, then pause mid-transfer
    let store = rig.store.clone();
    assert!(
        wait_until(Duration::from_secs(10), move || {
            let store = store.clone();
            async move {
                store
                    .get_item("pz")
                    .await
                    .unwrap()
                    .map(|row| row.bytes_downloaded > 0 && row.bytes_downloaded < 512 * 1024)
                    .unwrap_or(false)
            }
        })
        .await
    );
    rig.manager.pause("pz").await.unwrap();

    // Wait until the worker has parked the row with its final byte count
    let store = rig.store.clone();
    assert!(
        wait_until(Duration::from_secs(10), move || {
            let store = store.clone();
            async move {
                let Some(row) = store.get_item("pz").await.unwrap() else {
                    return false;
                };
                if row.status != ItemStatus::Paused || row.bytes_downloaded == 0 {
                    return false;
                }
                row.partial_file_path
                    .as_deref()
                    .and_then(|part| std::fs::metadata(part).ok())
                    .map(|meta| meta.len() == row.bytes_downloaded)
                    .unwrap_or(false)
            }
        })
        .await
    );

    let paused = rig.store.get_item("pz").await.unwrap().unwrap();
    assert!(paused.is_resumable(), "paused row must be resumable: {paused:?}");
    let on_disk = paused.bytes_downloaded;
    assert!(on_disk < 512 * 1024);

    // Give the worker a beat to release the row, then resume from the part
    tokio::time::sleep(Duration::from_millis(150)).await;
    rig.server.set_chunk_delay(Duration::ZERO);
    rig.manager.resume("pz").await.unwrap();
    assert!(wait_status(&rig.store, "pz", ItemStatus::Completed).await);

    let ranges = rig.server.ranges_seen();
    assert!(
        ranges.iter().any(|(path, start)| path == "/media/pz" && *start == on_disk),
        "expected resume from {on_disk}, saw {ranges:?}"
    );

    let row = rig.store.get_item("pz").await.unwrap().unwrap();
    let written = std::fs::read(row.output_path.unwrap()).unwrap();
    assert!(written.ends_with(&body));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn head_probe_reports_range_support() {
    let rig = rig(1).await;
    rig.server.add_file("probe", audio_bytes(4096, 17));

    let clients = HttpClients::build(&wavesink::config::NetworkSettings::default()).unwrap();
    let support = wavesink::net::supports_resume(
        &clients.media,
        &format!("{}/media/probe", rig.server.base_url()),
    )
    .await
    .unwrap();

    assert!(support.accept_ranges);
    assert_eq!(support.content_length, Some(4096));

    let missing = wavesink::net::supports_resume(
        &clients.media,
        &format!("{}/media/nope", rig.server.base_url()),
    )
    .await;
    assert!(missing.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_admission_is_refused() {
    let rig = rig(2).await;
    rig.api.add_track(track("dup", "Echo", "Mira Voss", "Tidelines", 1));
    rig.server.set_response_delay(Duration::from_millis(200));
    rig.server.add_file("dup", audio_bytes(32 * 1024, 5));

    rig.manager.download_track("dup").await.unwrap();
    let second = rig.manager.download_track("dup").await;
    assert!(matches!(second, Err(WavesinkError::AlreadyQueued(_))));

    // Same for a parent id
    rig.api.add_album(Album {
        id: "77".into(),
        title: "Tidelines".into(),
        artist: "Mira Voss".into(),
        cover_url: None,
        release_year: None,
        tracks: vec![track("dup2", "Echo II", "Mira Voss", "Tidelines", 1)],
    });
    rig.server.add_file("dup2", audio_bytes(32 * 1024, 6));
    rig.manager.download_album("77").await.unwrap();
    let second = rig.manager.download_album("77").await;
    assert!(matches!(second, Err(WavesinkError::AlreadyQueued(_))));

    assert!(wait_status(&rig.store, "dup", ItemStatus::Completed).await);
    assert!(wait_status(&rig.store, &album_row_id("77"), ItemStatus::Completed).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_all_parks_in_flight_rows_as_paused() {
    let rig = rig(1).await;
    let body = audio_bytes(512 * 1024, 11);
    rig.api.add_track(track("sp", "Slack Tide", "Mira Voss", "Tidelines", 1));
    rig.server.add_file("sp", body.clone());
    rig.server.set_chunk_delay(Duration::from_millis(40));

    rig.manager.download_track("sp").await.unwrap();
    let store = rig.store.clone();
    assert!(
        wait_until(Duration::from_secs(10), move || {
            let store = store.clone();
            async move {
                store
                    .get_item("sp")
                    .await
                    .unwrap()
                    .map(|row| row.status == ItemStatus::Downloading && row.bytes_downloaded > 0)
                    .unwrap_or(false)
            }
        })
        .await
    );

    rig.manager.stop_all().await;

    let row = rig.store.get_item("sp").await.unwrap().unwrap();
    assert_eq!(row.status, ItemStatus::Paused);
    assert!(row.is_resumable());

    // A fresh start + resume finishes the transfer
    rig.server.set_chunk_delay(Duration::ZERO);
    rig.manager.start().await.unwrap();
    rig.manager.resume("sp").await.unwrap();
    assert!(wait_status(&rig.store, "sp", ItemStatus::Completed).await);

    let written = std::fs::read(
        rig.store
            .get_item("sp")
            .await
            .unwrap()
            .unwrap()
            .output_path
            .unwrap(),
    )
    .unwrap();
    assert!(written.ends_with(&body));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_of_partial_parent_requeues_only_failures() {
    let rig = rig(2).await;
    let tracks: Vec<_> = (0..3)
        .map(|i| track(&format!("rp{i}"), &format!("Track {i}"), "Mira Voss", "Tidelines", i + 1))
        .collect();
    for t in &tracks {
        rig.server.add_file(&t.id, audio_bytes(8 * 1024, 13));
    }
    rig.api.mark_stream_missing("rp1");
    rig.api.add_album(Album {
        id: "55".into(),
        title: "Tidelines".into(),
        artist: "Mira Voss".into(),
        cover_url: None,
        release_year: None,
        tracks,
    });

    rig.manager.download_album("55").await.unwrap();
    let parent_id = album_row_id("55");
    assert!(wait_status(&rig.store, &parent_id, ItemStatus::Completed).await);
    assert!(rig.store.get_item(&parent_id).await.unwrap().unwrap().is_partial_success());

    let hits_before = rig.server.hits_for("rp0");

    // The stream exists now; retry only touches the failed child
    rig.api.missing_streams.write().unwrap().clear();
    rig.manager.retry(&parent_id).await.unwrap();
    assert!(wait_status(&rig.store, &parent_id, ItemStatus::Completed).await);

    let parent = rig.store.get_item(&parent_id).await.unwrap().unwrap();
    assert_eq!(parent.completed_tracks, 3);
    assert!(!parent.is_partial_success());
    assert!(rig.store.failed_tracks(&parent_id).await.unwrap().is_empty());

    // Successful children were not downloaded again
    assert_eq!(rig.server.hits_for("rp0"), hits_before);
    assert_eq!(rig.server.hits_for("rp1"), 1);

    // playlist_row_id helper stays consistent with admission
    assert_eq!(playlist_row_id("x"), "playlist_x");
}
