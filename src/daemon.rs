//! Daemon lifecycle: detach, pid file, stop

use std::path::Path;

#[cfg(unix)]
use anyhow::Context;

/// Detach from the terminal and record our pid. Refuses to start when the
/// pid file already exists, so two daemons never share an inbox.
#[cfg(unix)]
pub fn daemonize(pid_file: &Path) -> anyhow::Result<()> {
    use daemonize::Daemonize;

    if pid_file.exists() {
        anyhow::bail!(
            "pid file already exists: {} (daemon already running? remove it or run 'mocksmtpd stop')",
            pid_file.display()
        );
    }

    Daemonize::new()
        .pid_file(pid_file)
        .chown_pid_file(true)
        .working_directory(".")
        .start()
        .context("failed to start daemon")?;
    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize(_pid_file: &Path) -> anyhow::Result<()> {
    anyhow::bail!("daemon mode is not supported on this platform");
}

/// Terminate the daemon recorded in the pid file.
#[cfg(unix)]
pub fn stop(pid_file: &Path) -> anyhow::Result<()> {
    let pid = read_pid(pid_file)?;
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("failed to signal pid {pid}"));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn stop(_pid_file: &Path) -> anyhow::Result<()> {
    anyhow::bail!("daemon mode is not supported on this platform");
}

#[cfg(unix)]
fn read_pid(pid_file: &Path) -> anyhow::Result<i32> {
    let text = std::fs::read_to_string(pid_file)
        .with_context(|| format!("failed to read pid file: {}", pid_file.display()))?;
    text.trim()
        .parse()
        .with_context(|| format!("malformed pid file: {}", pid_file.display()))
}

/// Remove the pid file on orderly shutdown. Missing files are fine.
pub fn remove_pid_file(pid_file: &Path) {
    let _ = std::fs::remove_file(pid_file);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn parses_recorded_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");
        std::fs::write(&path, "12345\n").unwrap();
        assert_eq!(read_pid(&path).unwrap(), 12345);
    }

    #[test]
    fn rejects_garbage_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(read_pid(&path).is_err());
    }

    #[test]
    fn remove_pid_file_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        remove_pid_file(&dir.path().join("absent.pid"));
    }
}
