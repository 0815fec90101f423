//! Integration tests for `reposmith restart`

mod common;

use common::TestRepo;

#[test]
fn test_restart_runs_configured_command() {
    let repo = TestRepo::initialized();
    repo.create_file(
        "reposmith.toml",
        "[choco]\nreload_command = \"touch restarted\"\n",
    );

    let output = repo.run(&["restart", &repo.arg()]);
    assert!(
        output.status.success(),
        "restart failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(repo.file_exists("restarted"));
}

#[test]
fn test_restart_requires_repository() {
    let repo = TestRepo::new();
    let output = repo.run(&["restart", &repo.arg()]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_restart_reports_failed_command() {
    let repo = TestRepo::initialized();
    repo.create_file("reposmith.toml", "[choco]\nreload_command = \"exit 3\"\n");

    let output = repo.run(&["restart", &repo.arg()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to restart"));
}
