//! End-to-end revert flows against a throwaway database. Expiry is driven by
//! handing the sweeper an explicit `now`, never by sleeping.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use freeze_engine::{sweep_once, Recorder, RevertFeed};
use freeze_kernel::{Kernel, RevertOutcome};
use freeze_schema::Origin;

fn setup() -> (TempDir, Kernel, Recorder, RevertFeed) {
    let dir = tempfile::tempdir().expect("tempdir");
    let kernel = Kernel::open(dir.path()).expect("open kernel");
    let recorder = Recorder::new(kernel.clone());
    (dir, kernel, recorder, RevertFeed::default())
}

fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn created_row_expires_after_two_hours() {
    let (_dir, kernel, recorder, feed) = setup();
    let t0 = Utc::now();
    let id = kernel
        .insert_row(
            "books",
            &fields(&[("title", json!("Mayfly")), ("author", json!("Nobody"))]),
            Origin::Ephemeral,
            Some("key-42"),
        )
        .expect("insert");
    recorder.on_create("books", id, Some("key-42")).await.expect("record");

    let stats = sweep_once(&kernel, &feed, t0 + Duration::minutes(119))
        .await
        .expect("sweep");
    assert_eq!(stats.processed, 0);
    assert!(kernel.fetch_row("books", id).expect("fetch").is_some());

    let stats = sweep_once(&kernel, &feed, t0 + Duration::minutes(121))
        .await
        .expect("sweep");
    assert_eq!(stats.undone, 1);
    assert!(kernel.fetch_row("books", id).expect("fetch").is_none());
}

#[tokio::test]
async fn updated_row_reverts_after_one_hour() {
    let (_dir, kernel, recorder, feed) = setup();
    let t0 = Utc::now();
    let id = kernel
        .insert_row(
            "tasks",
            &fields(&[("title", json!("Ship it")), ("status", json!("pending"))]),
            Origin::Baseline,
            None,
        )
        .expect("insert");

    let before = kernel.capture_snapshot("tasks", id).expect("capture");
    kernel
        .update_row("tasks", id, &fields(&[("status", json!("done"))]))
        .expect("update");
    recorder
        .on_update("tasks", id, before, Some("key-7"))
        .await
        .expect("record");

    sweep_once(&kernel, &feed, t0 + Duration::minutes(59))
        .await
        .expect("sweep");
    let row = kernel.fetch_row("tasks", id).expect("fetch").expect("row");
    assert_eq!(row.fields.get("status"), Some(&json!("done")));

    sweep_once(&kernel, &feed, t0 + Duration::minutes(61))
        .await
        .expect("sweep");
    let row = kernel.fetch_row("tasks", id).expect("fetch").expect("row");
    assert_eq!(row.fields.get("status"), Some(&json!("pending")));
    assert_eq!(row.fields.get("title"), Some(&json!("Ship it")));
}

#[tokio::test]
async fn deleted_baseline_row_is_restored_as_baseline() {
    let (_dir, kernel, recorder, feed) = setup();
    let t0 = Utc::now();
    let id = kernel
        .insert_row(
            "inventory",
            &fields(&[
                ("name", json!("Laptop")),
                ("sku", json!("LAP-001")),
                ("quantity", json!(50)),
                ("price", json!(999.99)),
            ]),
            Origin::Baseline,
            None,
        )
        .expect("insert");

    let before = kernel.capture_snapshot("inventory", id).expect("capture");
    assert_eq!(before.origin, Origin::Baseline);
    kernel.delete_row("inventory", id).expect("delete");
    recorder
        .on_delete("inventory", id, before.clone(), Some("key-3"))
        .await
        .expect("record")
        .expect("delete entry recorded");

    sweep_once(&kernel, &feed, t0 + Duration::minutes(59))
        .await
        .expect("sweep");
    assert!(kernel.fetch_row("inventory", id).expect("fetch").is_none());

    sweep_once(&kernel, &feed, t0 + Duration::minutes(61))
        .await
        .expect("sweep");
    let row = kernel.fetch_row("inventory", id).expect("fetch").expect("row");
    assert_eq!(row.origin, Origin::Baseline);
    assert_eq!(row.fields, before.fields);
}

#[tokio::test]
async fn later_update_supersedes_earlier_one() {
    let (_dir, kernel, recorder, feed) = setup();
    let t0 = Utc::now();
    let id = kernel
        .insert_row(
            "tasks",
            &fields(&[("title", json!("Review PR")), ("status", json!("pending"))]),
            Origin::Baseline,
            None,
        )
        .expect("insert");

    // Update A: pending -> in_review, before-image X.
    let snap_x = kernel.capture_snapshot("tasks", id).expect("capture");
    kernel
        .update_row("tasks", id, &fields(&[("status", json!("in_review"))]))
        .expect("update");
    recorder
        .on_update("tasks", id, snap_x, None)
        .await
        .expect("record A");

    // Update B ten minutes later: in_review -> done, before-image Y.
    let snap_y = kernel.capture_snapshot("tasks", id).expect("capture");
    assert_eq!(snap_y.fields.get("status"), Some(&json!("in_review")));
    kernel
        .update_row("tasks", id, &fields(&[("status", json!("done"))]))
        .expect("update");
    recorder
        .on_update("tasks", id, snap_y, None)
        .await
        .expect("record B");

    let counts = kernel.pending_counts().expect("counts");
    assert_eq!(counts.updates, 1, "entry A should have been superseded");

    sweep_once(&kernel, &feed, t0 + Duration::minutes(70))
        .await
        .expect("sweep");
    let row = kernel.fetch_row("tasks", id).expect("fetch").expect("row");
    assert_eq!(row.fields.get("status"), Some(&json!("in_review")));
}

#[tokio::test]
async fn promotion_clears_ledger_and_outlives_sweeps() {
    let (_dir, kernel, recorder, feed) = setup();
    let t0 = Utc::now();
    let id = kernel
        .insert_row(
            "notes",
            &fields(&[("title", json!("Draft")), ("content", json!("v1"))]),
            Origin::Ephemeral,
            Some("key-9"),
        )
        .expect("insert");
    recorder.on_create("notes", id, Some("key-9")).await.expect("record");

    let before = kernel.capture_snapshot("notes", id).expect("capture");
    kernel
        .update_row("notes", id, &fields(&[("content", json!("v2"))]))
        .expect("update");
    recorder
        .on_update("notes", id, before, Some("key-9"))
        .await
        .expect("record");

    kernel
        .promote_to_baseline_async("notes", id)
        .await
        .expect("promote");
    assert_eq!(kernel.pending_counts().expect("counts").total, 0);

    let stats = sweep_once(&kernel, &feed, t0 + Duration::days(365))
        .await
        .expect("sweep");
    assert_eq!(stats.processed, 0);
    let row = kernel.fetch_row("notes", id).expect("fetch").expect("row");
    assert_eq!(row.origin, Origin::Baseline);
    assert_eq!(row.fields.get("content"), Some(&json!("v2")));
}

#[tokio::test]
async fn replaying_a_processed_delete_undo_changes_nothing() {
    let (_dir, kernel, _recorder, _feed) = setup();
    let t0 = Utc::now();
    let id = kernel
        .insert_row(
            "books",
            &fields(&[("title", json!("Kept")), ("author", json!("A"))]),
            Origin::Baseline,
            None,
        )
        .expect("insert");
    let before = kernel.capture_snapshot("books", id).expect("capture");
    kernel.delete_row("books", id).expect("delete");
    kernel
        .append_revert("books", id, freeze_schema::Action::Delete, Some(&before), None, t0)
        .expect("append");

    let due = kernel.pull_expired(t0 + Duration::hours(2)).expect("pull");
    assert_eq!(due.len(), 1);
    let entry = due.into_iter().next().expect("entry");

    assert_eq!(kernel.revert_entry(&entry).expect("first"), RevertOutcome::Reinserted);
    // Crash-recovery duplicate: same entry applied again.
    assert_eq!(
        kernel.revert_entry(&entry).expect("second"),
        RevertOutcome::AlreadyPresent
    );
    let row = kernel.fetch_row("books", id).expect("fetch").expect("row");
    assert_eq!(row.fields, before.fields);
    assert_eq!(kernel.pending_counts().expect("counts").total, 0);
}

#[tokio::test]
async fn deleting_a_pending_create_cancels_the_entry() {
    let (_dir, kernel, recorder, feed) = setup();
    let t0 = Utc::now();
    let id = kernel
        .insert_row(
            "books",
            &fields(&[("title", json!("Fleeting")), ("author", json!("B"))]),
            Origin::Ephemeral,
            Some("key-1"),
        )
        .expect("insert");
    recorder.on_create("books", id, Some("key-1")).await.expect("record");

    let before = kernel.capture_snapshot("books", id).expect("capture");
    kernel.delete_row("books", id).expect("delete");
    let entry = recorder
        .on_delete("books", id, before, Some("key-1"))
        .await
        .expect("record");
    assert!(entry.is_none(), "create should be cancelled, not replaced");
    assert_eq!(kernel.pending_counts().expect("counts").total, 0);

    let stats = sweep_once(&kernel, &feed, t0 + Duration::days(1))
        .await
        .expect("sweep");
    assert_eq!(stats.processed, 0);
    assert!(kernel.fetch_row("books", id).expect("fetch").is_none());
}

#[tokio::test]
async fn update_undo_on_vanished_row_is_a_noop() {
    let (_dir, kernel, recorder, feed) = setup();
    let t0 = Utc::now();
    let id = kernel
        .insert_row(
            "tasks",
            &fields(&[("title", json!("Racy")), ("status", json!("pending"))]),
            Origin::Baseline,
            None,
        )
        .expect("insert");

    let before = kernel.capture_snapshot("tasks", id).expect("capture");
    kernel
        .update_row("tasks", id, &fields(&[("status", json!("done"))]))
        .expect("update");
    recorder
        .on_update("tasks", id, before, None)
        .await
        .expect("record");
    // Row vanishes out from under the pending entry.
    kernel.delete_row("tasks", id).expect("delete");

    let stats = sweep_once(&kernel, &feed, t0 + Duration::minutes(61))
        .await
        .expect("sweep");
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.noop, 1);
    assert_eq!(stats.undone, 0);
    assert!(kernel.fetch_row("tasks", id).expect("fetch").is_none());
    assert_eq!(kernel.pending_counts().expect("counts").total, 0);
}

#[tokio::test]
async fn locked_store_aborts_cycle_and_keeps_backlog() {
    std::env::set_var("FREEZE_SQLITE_BUSY_MS", "100");
    let (dir, kernel, recorder, feed) = setup();
    let t0 = Utc::now();
    for title in ["First", "Second"] {
        let id = kernel
            .insert_row(
                "books",
                &fields(&[("title", json!(title)), ("author", json!("D"))]),
                Origin::Ephemeral,
                None,
            )
            .expect("insert");
        recorder.on_create("books", id, None).await.expect("record");
    }

    // A second writer holds the write lock for the whole cycle.
    let blocker = rusqlite::Connection::open(dir.path().join("sandbox.sqlite")).expect("conn");
    blocker.execute_batch("BEGIN IMMEDIATE").expect("lock");

    let result = sweep_once(&kernel, &feed, t0 + Duration::hours(3)).await;
    assert!(result.is_err(), "cycle should abort while the store is locked");
    assert_eq!(kernel.pending_counts().expect("counts").total, 2);

    blocker.execute_batch("ROLLBACK").expect("unlock");
    let stats = sweep_once(&kernel, &feed, t0 + Duration::hours(3))
        .await
        .expect("sweep");
    assert_eq!(stats.undone, 2);
    assert_eq!(kernel.pending_counts().expect("counts").total, 0);
    std::env::remove_var("FREEZE_SQLITE_BUSY_MS");
}

#[tokio::test]
async fn feed_reports_applied_reverts() {
    let (_dir, kernel, recorder, feed) = setup();
    let t0 = Utc::now();
    let mut rx = feed.subscribe();

    let id = kernel
        .insert_row(
            "books",
            &fields(&[("title", json!("Gone soon")), ("author", json!("C"))]),
            Origin::Ephemeral,
            None,
        )
        .expect("insert");
    recorder.on_create("books", id, None).await.expect("record");

    sweep_once(&kernel, &feed, t0 + Duration::hours(3))
        .await
        .expect("sweep");

    let event = rx.try_recv().expect("revert event");
    assert_eq!(event.table, "books");
    assert_eq!(event.record_id, id);
    assert_eq!(event.outcome, "deleted");
}
