//! Workspace-to-store synchronization tests.

use std::time::Duration;

use pyhost::hub::{LogEvent, SyncAction};
use pyhost::store::{FileStore, ProjectStatus};

mod common;
use common::{collect_until, drain, harness};

fn synced(events: &[LogEvent]) -> Vec<(SyncAction, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            LogEvent::FilesSynced { action, path } => Some((*action, path.clone())),
            LogEvent::Log { .. } => None,
        })
        .collect()
}

#[tokio::test]
async fn test_create_modify_delete_are_mirrored() {
    let h = harness().await;
    let project = h.project_with_files(None, &[]).await;
    let dir = h.supervisor.prepare_workspace(&project.id).await.unwrap();
    let mut sub = h.hub.subscribe(&project.id);

    std::fs::write(dir.join("notes.txt"), "first").unwrap();
    assert!(
        h.wait_for_file(&project.id, "notes.txt", |f| f.map(|f| f.content == "first").unwrap_or(false))
            .await
    );
    let created = h
        .store
        .get_file_by_path(&project.id, "notes.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.size, 5);
    assert!(!created.is_directory);

    std::fs::write(dir.join("notes.txt"), "second version").unwrap();
    assert!(
        h.wait_for_file(&project.id, "notes.txt", |f| f
            .map(|f| f.content == "second version" && f.size == 14)
            .unwrap_or(false))
            .await
    );

    std::fs::remove_file(dir.join("notes.txt")).unwrap();
    assert!(h.wait_for_file(&project.id, "notes.txt", |f| f.is_none()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = synced(&drain(&mut sub));
    assert!(events.contains(&(SyncAction::Created, "notes.txt".to_string())));
    assert!(events.contains(&(SyncAction::Updated, "notes.txt".to_string())));
    assert!(events.contains(&(SyncAction::Deleted, "notes.txt".to_string())));
}

#[tokio::test]
async fn test_nested_directory_is_mirrored() {
    let h = harness().await;
    let project = h.project_with_files(None, &[]).await;
    let dir = h.supervisor.prepare_workspace(&project.id).await.unwrap();

    std::fs::create_dir_all(dir.join("data/raw")).unwrap();
    std::fs::write(dir.join("data/raw/rows.csv"), "a,b\n1,2\n").unwrap();

    assert!(
        h.wait_for_file(&project.id, "data/raw/rows.csv", |f| f.is_some())
            .await
    );
    let data = h
        .store
        .get_file_by_path(&project.id, "data")
        .await
        .unwrap()
        .unwrap();
    assert!(data.is_directory);
    let raw = h
        .store
        .get_file_by_path(&project.id, "data/raw")
        .await
        .unwrap()
        .unwrap();
    assert!(raw.is_directory);
    assert_eq!(raw.path, "data");

    std::fs::remove_dir_all(dir.join("data")).unwrap();
    assert!(
        h.wait_for_file(&project.id, "data/raw/rows.csv", |f| f.is_none())
            .await
    );
    assert!(h.wait_for_file(&project.id, "data", |f| f.is_none()).await);
}

#[tokio::test]
async fn test_identical_write_is_a_no_op() {
    let h = harness().await;
    let project = h
        .project_with_files(None, &[("config.txt", "unchanged")])
        .await;
    let before = h
        .store
        .get_file_by_path(&project.id, "config.txt")
        .await
        .unwrap()
        .unwrap();
    let dir = h.supervisor.prepare_workspace(&project.id).await.unwrap();
    let mut sub = h.hub.subscribe(&project.id);

    std::fs::write(dir.join("config.txt"), "unchanged").unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(synced(&drain(&mut sub)).is_empty());
    let after = h
        .store
        .get_file_by_path(&project.id, "config.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.id, after.id);
    assert_eq!(before.updated_at, after.updated_at);
}

#[tokio::test]
async fn test_hidden_files_are_ignored() {
    let h = harness().await;
    let project = h.project_with_files(None, &[]).await;
    let dir = h.supervisor.prepare_workspace(&project.id).await.unwrap();

    std::fs::write(dir.join(".cache"), "x").unwrap();
    std::fs::write(dir.join("visible.txt"), "y").unwrap();

    assert!(h.wait_for_file(&project.id, "visible.txt", |f| f.is_some()).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        h.store
            .get_file_by_path(&project.id, ".cache")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_program_output_reaches_store() {
    let h = harness().await;
    let project = h
        .project_with_files(
            Some("main.py"),
            &[("main.py", "echo '{\"ok\": true}' > output.json\necho wrote\n")],
        )
        .await;
    let mut sub = h.hub.subscribe(&project.id);
    let mut sync_sub = h.hub.subscribe(&project.id);

    h.supervisor.start(&project.id).await.unwrap();
    collect_until(&mut sub, "Process completed successfully").await;
    h.wait_for_status(&project.id, ProjectStatus::Completed).await;

    assert!(
        h.wait_for_file(&project.id, "output.json", |f| f
            .map(|f| f.content.contains("\"ok\": true"))
            .unwrap_or(false))
            .await
    );

    let action = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match sync_sub.recv().await {
                Some(LogEvent::FilesSynced { action, path }) if path == "output.json" => {
                    return action;
                }
                Some(_) => continue,
                None => panic!("subscription closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(action, SyncAction::Created);
}

#[tokio::test]
async fn test_rescan_imports_unwatched_changes() {
    let h = harness().await;
    let project = h
        .project_with_files(None, &[("keep.txt", "old")])
        .await;
    let dir = h.workspace(&project.id);
    std::fs::create_dir_all(dir.join("out")).unwrap();
    std::fs::write(dir.join("keep.txt"), "new").unwrap();
    std::fs::write(dir.join("out/result.txt"), "42").unwrap();
    std::fs::write(dir.join(".env"), "SECRET=1").unwrap();

    let report = h.supervisor.rescan_workspace(&project.id).await.unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.updated, 1);

    let keep = h
        .store
        .get_file_by_path(&project.id, "keep.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(keep.content, "new");
    assert!(
        h.store
            .get_file_by_path(&project.id, ".env")
            .await
            .unwrap()
            .is_none()
    );

    // Deleting on disk does not delete from the store during a rescan.
    std::fs::remove_file(dir.join("keep.txt")).unwrap();
    let report = h.supervisor.rescan_workspace(&project.id).await.unwrap();
    assert_eq!(report.created + report.updated, 0);
    assert!(
        h.store
            .get_file_by_path(&project.id, "keep.txt")
            .await
            .unwrap()
            .is_some()
    );
}
