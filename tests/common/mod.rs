use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use aiagent_console::config::Config;
use aiagent_console::AppState;

/// Points `AIAGENT_DATA_DIR` at a scratch directory and builds process state
/// from it. Callers that touch this must be `#[serial]` -- the data dir is
/// resolved from a process-wide env var.
pub fn test_state(data_dir: &Path) -> AppState {
    std::env::set_var("AIAGENT_DATA_DIR", data_dir);
    AppState::new(Arc::new(Config::default()))
}

pub fn init_git_repo(dir: &Path) {
    let run = |args: &[&str]| {
        let status = Command::new("git").arg("-C").arg(dir).args(args).status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    };
    std::fs::create_dir_all(dir).unwrap();
    run(&["init", "-q"]);
    run(&["config", "user.email", "test@local"]);
    run(&["config", "user.name", "test"]);
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    run(&["add", "-A"]);
    run(&["commit", "-q", "-m", "init"]);
    run(&["branch", "-M", "main"]);
}
