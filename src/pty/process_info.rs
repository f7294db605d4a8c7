//! Best-effort lookup of a process's command name from its pid, used to
//! report which program is currently in the foreground of a PTY.

/// The short command name for `pid` (what `ps -o comm=` would show), or
/// `None` if the process is gone or the platform doesn't expose `/proc`.
#[cfg(target_os = "linux")]
pub fn process_name(pid: i32) -> Option<String> {
    let raw = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    let name = raw.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn process_name(_pid: i32) -> Option<String> {
    None
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn own_pid_resolves_to_this_test_binary() {
        let pid = std::process::id() as i32;
        assert!(process_name(pid).is_some());
    }

    #[test]
    fn nonexistent_pid_returns_none() {
        assert_eq!(process_name(i32::MAX), None);
    }
}
