//! POSIX signal-based process control.
//!
//! Grounded directly on `examples/tumf-agent-exec/src/kill.rs`'s
//! `#[cfg(unix)]` branch of `send_signal`: `libc::kill(2)`, with `ESRCH`
//! ("no such process") treated as the process already being gone rather
//! than an error. This path exists purely for developer-host parity while
//! building and testing off Windows; spec.md's non-goals keep Windows the
//! only platform the product ships on.

use super::killer::KillError;

/// Send `signal` to `pid`. Returns `Ok(true)` if the process was already gone.
pub fn send_signal(pid: u32, signal: i32) -> Result<bool, KillError> {
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == 0 {
        return Ok(false);
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    match errno {
        libc::ESRCH => Ok(true),
        libc::EPERM => Err(KillError::PermissionDenied(pid)),
        _ => Err(KillError::Platform(format!("kill({pid}, {signal}) failed: errno {errno}"))),
    }
}

/// Signal an entire process group, used as the unix-parity stand-in for
/// Windows job-object tree termination. Processes spawned for this purpose
/// are placed in their own group (`setsid`-style) by the Spawn Registry on
/// unix so a single negative-pid signal reaches the whole tree.
pub fn send_signal_to_group(pgid: u32, signal: i32) -> Result<bool, KillError> {
    send_signal_raw(-(pgid as i64), signal)
}

fn send_signal_raw(target: i64, signal: i32) -> Result<bool, KillError> {
    let result = unsafe { libc::kill(target as libc::pid_t, signal) };
    if result == 0 {
        return Ok(false);
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    match errno {
        libc::ESRCH => Ok(true),
        libc::EPERM => Err(KillError::PermissionDenied(target.unsigned_abs() as u32)),
        _ => Err(KillError::Platform(format!("kill({target}, {signal}) failed: errno {errno}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaling_current_process_with_zero_reports_alive() {
        let pid = std::process::id();
        let result = send_signal(pid, 0);
        assert_eq!(result.unwrap(), false);
    }

    #[test]
    fn signaling_a_very_unlikely_pid_reports_already_gone() {
        // Not airtight on every host, but far beyond any real pid range in
        // the container this test runs in.
        let result = send_signal(u32::MAX - 1, 0);
        assert!(result.is_ok());
    }
}
