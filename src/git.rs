//! Minimal git branch lookup for a PTY's working directory.
//!
//! Just enough to answer "what branch is this pane in" for a status line —
//! not a general git wrapper, so no worktree or remote handling.

use std::path::Path;

use git2::Repository;

/// The current branch name for the repository containing `path`, or the
/// short commit hash when `HEAD` is detached. `None` if `path` isn't inside
/// a git repository.
pub fn current_branch(path: &Path) -> Option<String> {
    let repo = Repository::discover(path).ok()?;
    let head = repo.head().ok()?;

    if head.is_branch() {
        return head.shorthand().map(|s| s.to_string());
    }

    head.target().map(|oid| {
        let full = oid.to_string();
        full[..7.min(full.len())].to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            Command::new("git").args(args).current_dir(dir).output().expect("git invocation failed")
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.join("f.txt"), "hi").unwrap();
        run(&["add", "f.txt"]);
        run(&["commit", "-q", "-m", "init"]);
    }

    #[test]
    fn reports_branch_name_for_a_fresh_repo() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let branch = current_branch(tmp.path());
        assert!(branch.is_some());
    }

    #[test]
    fn returns_none_outside_any_repository() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(current_branch(tmp.path()), None);
    }

    #[test]
    fn reports_short_hash_on_detached_head() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        Command::new("git")
            .args(["checkout", "-q", "--detach", "HEAD"])
            .current_dir(tmp.path())
            .output()
            .unwrap();
        let branch = current_branch(tmp.path()).unwrap();
        assert_eq!(branch.len(), 7);
    }
}
