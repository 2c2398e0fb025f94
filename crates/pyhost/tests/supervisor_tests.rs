//! Process supervision integration tests.
//!
//! Entry files are shell scripts run with `sh`, so no Python install is needed.

use std::time::Duration;

use pyhost::store::{EnvVar, FileStore, NewFile, ProjectStatus};
use pyhost::supervisor::SupervisorError;
use pyhost::workspace::WorkspaceError;

mod common;
use common::{collect_until, harness, harness_with, runtime_config};

#[tokio::test]
async fn test_program_runs_to_completion() {
    let h = harness().await;
    let project = h
        .project_with_files(
            Some("bot.py"),
            &[(
                "bot.py",
                "echo 'Bot starting'\necho 'tick 1'\necho 'oops' >&2\necho 'done'\n",
            )],
        )
        .await;
    let mut sub = h.hub.subscribe(&project.id);

    let pid = h.supervisor.start(&project.id).await.unwrap();
    assert!(pid > 0);

    let lines = collect_until(&mut sub, "Process completed successfully").await;
    h.wait_for_status(&project.id, ProjectStatus::Completed).await;
    assert!(!h.supervisor.is_running(&project.id));

    let position = |needle: &str| {
        lines
            .iter()
            .position(|l| l.contains(needle))
            .unwrap_or_else(|| panic!("missing {:?} in {:?}", needle, lines))
    };
    assert!(position("Preparing files in") < position("Written: bot.py"));
    assert!(position("Main file found: bot.py") < position("Starting bot.py"));
    assert!(position("Process started with PID") < position("Application Output"));
    assert!(position("Bot starting") < position("tick 1"));
    assert!(position("tick 1") < position("done"));
    assert!(lines.iter().any(|l| l == "[ERROR] oops\n"));
    assert!(position("done") < position("Process completed successfully"));

    // The workspace holds the materialized tree.
    assert!(h.workspace(&project.id).join("bot.py").exists());
}

#[tokio::test]
async fn test_nonzero_exit_marks_error() {
    let h = harness().await;
    let project = h
        .project_with_files(Some("main.py"), &[("main.py", "echo failing\nexit 3\n")])
        .await;
    let mut sub = h.hub.subscribe(&project.id);

    h.supervisor.start(&project.id).await.unwrap();
    let lines = collect_until(&mut sub, "Process exited with code").await;
    assert!(lines.iter().any(|l| l.contains("Process exited with code 3")));
    h.wait_for_status(&project.id, ProjectStatus::Error).await;
}

#[tokio::test]
async fn test_concurrent_starts_admit_one() {
    let h = harness().await;
    let project = h
        .project_with_files(Some("main.py"), &[("main.py", "exec sleep 30\n")])
        .await;

    let (first, second) = tokio::join!(
        h.supervisor.start(&project.id),
        h.supervisor.start(&project.id)
    );
    let results = [first, second];
    let started = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(SupervisorError::AlreadyRunning)))
        .count();
    assert_eq!(started, 1);
    assert_eq!(refused, 1);
    assert!(h.supervisor.is_running(&project.id));

    assert!(h.supervisor.stop(&project.id).await.unwrap());
}

#[tokio::test]
async fn test_start_without_entry_file_has_no_side_effects() {
    let h = harness().await;
    let project = h.project_with_files(None, &[("main.py", "echo hi\n")]).await;

    let err = h.supervisor.start(&project.id).await.unwrap_err();
    assert!(matches!(err, SupervisorError::NoEntryFile));
    assert!(!h.workspace(&project.id).exists());
    assert_eq!(h.status(&project.id).await, ProjectStatus::Stopped);
    assert!(!h.supervisor.is_running(&project.id));
}

#[tokio::test]
async fn test_missing_entry_file_marks_error() {
    let h = harness().await;
    let project = h
        .project_with_files(Some("main.py"), &[("other.py", "echo hi\n")])
        .await;
    let mut sub = h.hub.subscribe(&project.id);

    let err = h.supervisor.start(&project.id).await.unwrap_err();
    assert!(matches!(err, SupervisorError::EntryFileMissing(ref f) if f == "main.py"));
    assert_eq!(h.status(&project.id).await, ProjectStatus::Error);
    assert!(!h.supervisor.is_running(&project.id));

    let lines = collect_until(&mut sub, "Main file not found").await;
    assert!(lines.iter().any(|l| l.contains("Written: other.py")));
}

#[tokio::test]
async fn test_traversal_aborts_before_writing() {
    let h = harness().await;
    let project = h
        .project_with_files(Some("main.py"), &[("main.py", "echo hi\n")])
        .await;
    h.store
        .create_file(&project.id, NewFile::file("..", "escaped.txt", "nope"))
        .await
        .unwrap();

    let err = h.supervisor.start(&project.id).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::Workspace(WorkspaceError::PathTraversal(_))
    ));
    assert!(!h.workspace_root().join("escaped.txt").exists());
    assert!(!h.workspace(&project.id).join("main.py").exists());
    assert_eq!(h.status(&project.id).await, ProjectStatus::Error);

    // The slot was released, so a later start is not refused as running.
    let again = h.supervisor.start(&project.id).await.unwrap_err();
    assert!(!matches!(again, SupervisorError::AlreadyRunning));
}

#[tokio::test]
async fn test_stop_without_process_records_stopped() {
    let h = harness().await;
    let project = h.project_with_files(Some("main.py"), &[]).await;
    h.store
        .set_project_status(&project.id, ProjectStatus::Error)
        .await
        .unwrap();

    assert!(!h.supervisor.stop(&project.id).await.unwrap());
    assert_eq!(h.status(&project.id).await, ProjectStatus::Stopped);
}

#[tokio::test]
async fn test_stop_keeps_stopped_status() {
    let h = harness().await;
    let project = h
        .project_with_files(
            Some("main.py"),
            &[("main.py", "echo booted\nexec sleep 30\n")],
        )
        .await;
    let mut sub = h.hub.subscribe(&project.id);

    h.supervisor.start(&project.id).await.unwrap();
    collect_until(&mut sub, "booted").await;
    assert_eq!(h.status(&project.id).await, ProjectStatus::Running);

    assert!(h.supervisor.stop(&project.id).await.unwrap());
    assert!(!h.supervisor.is_running(&project.id));
    collect_until(&mut sub, "Process stopped").await;

    // The exit caused by the stop must not overwrite the recorded status.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(h.status(&project.id).await, ProjectStatus::Stopped);

    // A fresh start is allowed once stopped.
    h.supervisor.start(&project.id).await.unwrap();
    assert!(h.supervisor.stop(&project.id).await.unwrap());
}

#[tokio::test]
async fn test_installer_failure_does_not_block_start() {
    let h = harness().await;
    let project = h
        .project_with_files(
            Some("main.py"),
            &[
                ("main.py", "echo 'still ran'\n"),
                ("requirements.txt", "requests==2.31.0\n"),
            ],
        )
        .await;
    h.store
        .update_project(
            &project.id,
            pyhost::store::ProjectUpdate {
                auto_install_requirements: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let mut sub = h.hub.subscribe(&project.id);

    h.supervisor.start(&project.id).await.unwrap();
    let lines = collect_until(&mut sub, "Process completed successfully").await;

    assert!(lines.iter().any(|l| l.contains("requirements.txt detected")));
    assert!(lines.iter().any(|l| l.contains("Auto-installing packages")));
    assert!(lines.iter().any(|l| l.contains("Failed to install packages")));
    assert!(lines.iter().any(|l| l.contains("still ran")));
}

#[tokio::test]
async fn test_manual_install_hint_when_auto_install_off() {
    let h = harness().await;
    let project = h
        .project_with_files(
            Some("main.py"),
            &[("main.py", "echo ok\n"), ("requirements.txt", "requests\n")],
        )
        .await;
    let mut sub = h.hub.subscribe(&project.id);

    h.supervisor.start(&project.id).await.unwrap();
    let lines = collect_until(&mut sub, "Process completed successfully").await;
    assert!(lines.iter().any(|l| l.contains("Auto-install from requirements.txt is disabled")));
    assert!(!lines.iter().any(|l| l.contains("Auto-installing")));
}

#[tokio::test]
async fn test_environment_variables_reach_process() {
    let h = harness().await;
    let project = h
        .project_with_files(Some("main.py"), &[("main.py", "echo \"token=$API_TOKEN\"\n")])
        .await;
    h.store
        .set_environment_variables(&project.id, &[EnvVar::new("API_TOKEN", "s3cret")])
        .await
        .unwrap();
    let mut sub = h.hub.subscribe(&project.id);

    h.supervisor.start(&project.id).await.unwrap();
    let lines = collect_until(&mut sub, "Process completed successfully").await;
    assert!(lines.iter().any(|l| l == "token=s3cret\n"));
}

#[tokio::test]
async fn test_commands_refused_while_running() {
    let h = harness().await;
    let project = h
        .project_with_files(Some("main.py"), &[("main.py", "exec sleep 30\n")])
        .await;

    h.supervisor.start(&project.id).await.unwrap();
    let err = h
        .supervisor
        .execute_command(&project.id, "echo hi")
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::ProjectRunning));
    let err = h
        .supervisor
        .install_package(&project.id, "requests")
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::ProjectRunning));

    h.supervisor.stop(&project.id).await.unwrap();
    let output = h
        .supervisor
        .execute_command(&project.id, "echo hi")
        .await
        .unwrap();
    assert_eq!(output, "hi\n");
}

#[tokio::test]
async fn test_execute_command_uses_workspace_and_env() {
    let h = harness().await;
    let project = h.project_with_files(None, &[]).await;
    h.store
        .set_environment_variables(&project.id, &[EnvVar::new("GREETING", "hello")])
        .await
        .unwrap();

    let output = h
        .supervisor
        .execute_command(&project.id, "echo $GREETING > note.txt && cat note.txt")
        .await
        .unwrap();
    assert_eq!(output, "hello\n");
    assert!(h.workspace(&project.id).join("note.txt").exists());
}

#[tokio::test]
async fn test_status_reconciled_lazily() {
    let h = harness().await;
    let project = h.project_with_files(Some("main.py"), &[]).await;
    h.store
        .set_project_status(&project.id, ProjectStatus::Running)
        .await
        .unwrap();

    let reconciled = h.supervisor.project(&project.id).await.unwrap().unwrap();
    assert_eq!(reconciled.status, ProjectStatus::Stopped);
    assert_eq!(h.status(&project.id).await, ProjectStatus::Stopped);

    // Terminal states are left alone.
    h.store
        .set_project_status(&project.id, ProjectStatus::Completed)
        .await
        .unwrap();
    let reconciled = h.supervisor.project(&project.id).await.unwrap().unwrap();
    assert_eq!(reconciled.status, ProjectStatus::Completed);
}

#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let mut runtime = runtime_config();
    runtime.stop_escalation_secs = 1;
    let h = harness_with(runtime).await;
    let project = h
        .project_with_files(
            Some("main.py"),
            &[("main.py", "trap '' TERM\necho ready\nwhile true; do sleep 0.1; done\n")],
        )
        .await;
    let mut sub = h.hub.subscribe(&project.id);

    let pid = h.supervisor.start(&project.id).await.unwrap();
    collect_until(&mut sub, "ready").await;
    assert!(h.supervisor.stop(&project.id).await.unwrap());

    let gone = common::wait_until(Duration::from_secs(5), || async move {
        // Signal 0 only checks for existence.
        unsafe { libc::kill(pid as libc::pid_t, 0) != 0 }
    })
    .await;
    assert!(gone.is_ok(), "process {} survived escalation", pid);
    assert_eq!(h.status(&project.id).await, ProjectStatus::Stopped);
}

#[tokio::test]
async fn test_retire_removes_workspace() {
    let h = harness().await;
    let project = h
        .project_with_files(Some("main.py"), &[("main.py", "echo hi\n")])
        .await;
    h.supervisor.prepare_workspace(&project.id).await.unwrap();
    assert!(h.workspace(&project.id).exists());
    assert!(h.supervisor.watchers().is_watching(&project.id));

    h.supervisor.retire(&project.id).await.unwrap();
    assert!(!h.workspace(&project.id).exists());
    assert!(!h.supervisor.watchers().is_watching(&project.id));
}

#[tokio::test]
async fn test_spawn_failure_records_error() {
    let mut runtime = runtime_config();
    runtime.python_binary = "/nonexistent/bin/python3".to_string();
    let h = harness_with(runtime).await;
    let project = h
        .project_with_files(Some("main.py"), &[("main.py", "print('hi')\n")])
        .await;
    let mut sub = h.hub.subscribe(&project.id);

    let err = h.supervisor.start(&project.id).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn(_)), "{err}");
    assert!(!h.supervisor.is_running(&project.id));
    assert_eq!(h.status(&project.id).await, ProjectStatus::Error);
    collect_until(&mut sub, "Failed to start process").await;

    // The slot was released, so a later start is not refused as a duplicate.
    let err = h.supervisor.start(&project.id).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn(_)), "{err}");
}

#[tokio::test]
async fn test_watcher_survives_stop() {
    let h = harness().await;
    let project = h
        .project_with_files(
            Some("main.py"),
            &[("main.py", "echo booted\nexec sleep 30\n")],
        )
        .await;
    let mut sub = h.hub.subscribe(&project.id);

    h.supervisor.start(&project.id).await.unwrap();
    collect_until(&mut sub, "booted").await;
    assert!(h.supervisor.stop(&project.id).await.unwrap());
    assert!(h.supervisor.watchers().is_watching(&project.id));

    std::fs::write(h.workspace(&project.id).join("after_stop.txt"), "late").unwrap();
    assert!(
        h.wait_for_file(&project.id, "after_stop.txt", |f| f
            .map(|f| f.content == "late")
            .unwrap_or(false))
            .await
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_in_workspace_fails_start() {
    let h = harness().await;
    let project = h
        .project_with_files(
            Some("main.py"),
            &[("main.py", "echo hi\n"), ("lib/util.py", "x = 1\n")],
        )
        .await;
    let outside = tempfile::tempdir().unwrap();
    let dir = h.workspace(&project.id);
    std::fs::create_dir_all(&dir).unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.join("lib")).unwrap();

    let err = h.supervisor.start(&project.id).await.unwrap_err();
    assert!(
        matches!(
            err,
            SupervisorError::Workspace(WorkspaceError::PathTraversal(ref p)) if p == "lib/util.py"
        ),
        "{err}"
    );
    assert!(!outside.path().join("util.py").exists());
    assert!(!h.supervisor.is_running(&project.id));
    assert_eq!(h.status(&project.id).await, ProjectStatus::Error);
}
