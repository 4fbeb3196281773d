//! Windows-native process control.
//!
//! Grounded on `examples/tumf-agent-exec/src/kill.rs` and `src/run.rs`:
//! job objects give atomic whole-tree termination for processes the server
//! itself spawned (`assign_to_job_object`, named `"SecureDevManager-{pid}"`,
//! mirroring `run.rs`'s `"AgentExec-{job_id}"`). Processes never placed in a
//! job (discovered rather than spawned) fall back to the Termination
//! Engine's own generic BFS over the `ProcessKiller` seam (`termination.rs`).

use super::killer::KillError;
use windows::Win32::Foundation::{CloseHandle, ERROR_ACCESS_DENIED, HANDLE};
use windows::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, TerminateJobObject,
};
use windows::Win32::System::Threading::{
    GenerateConsoleCtrlEvent, GetExitCodeProcess, OpenProcess, TerminateProcess, CTRL_BREAK_EVENT,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE, STILL_ACTIVE,
};
use windows::core::PCWSTR;

/// An open job-object handle, owned by the caller for the process's lifetime.
///
/// The teacher (`run.rs`) intentionally leaks its job handle with
/// `mem::forget` once the job outlives the spawning call, relying on the OS
/// to tear it down when the last handle closes. The Spawn Registry instead
/// keeps this handle alive for exactly as long as it tracks the process, and
/// closes it explicitly in `Drop` so the job is torn down deterministically
/// when the registry forgets the process.
pub struct JobHandle(HANDLE);

// SAFETY: a Windows HANDLE is just an opaque kernel object reference; moving
// it between threads is sound as long as it isn't closed concurrently, and
// the Spawn Registry serializes access behind its own lock.
unsafe impl Send for JobHandle {}

impl Drop for JobHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Create a job object and assign `pid` to it.
///
/// Per spec.md §4.4, assignment should happen before the child executes user
/// code; like the teacher, we assign immediately after spawn rather than
/// holding the process suspended via raw `CreateProcessW`, accepting a small
/// race window (documented as an Open Question in DESIGN.md).
pub fn create_job_and_assign(pid: u32) -> Result<JobHandle, KillError> {
    unsafe {
        let name = format!("SecureDevManager-{pid}\0").encode_utf16().collect::<Vec<u16>>();
        let job = CreateJobObjectW(None, PCWSTR(name.as_ptr()))
            .map_err(|e| KillError::Platform(format!("CreateJobObjectW failed: {e}")))?;

        let process = OpenProcess(PROCESS_TERMINATE | windows::Win32::System::Threading::PROCESS_SET_QUOTA, false, pid)
            .map_err(|e| KillError::Platform(format!("OpenProcess failed: {e}")))?;

        let assigned = AssignProcessToJobObject(job, process);
        let _ = CloseHandle(process);
        assigned.map_err(|e| KillError::Platform(format!("AssignProcessToJobObject failed: {e}")))?;

        Ok(JobHandle(job))
    }
}

/// Terminate every process in a job object as a unit.
pub fn terminate_job(handle: &JobHandle) -> Result<(), KillError> {
    unsafe {
        TerminateJobObject(handle.0, 1).map_err(|e| KillError::Platform(format!("TerminateJobObject failed: {e}")))
    }
}

/// Best-effort graceful shutdown request: a `CTRL_BREAK_EVENT` to the
/// process's console group. Many console-attached dev servers exit cleanly
/// on this; anything else simply ignores it and rides out the caller's
/// graceful-wait window before forceful escalation.
pub fn request_graceful_exit(pid: u32) -> Result<bool, KillError> {
    if !is_alive(pid) {
        return Ok(true);
    }
    unsafe {
        // Best-effort: a failure here just means the process group didn't
        // accept the event; the caller still waits out the grace period
        // before escalating to `terminate_process`.
        let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT.0, pid);
    }
    Ok(false)
}

/// Force-terminate a single process.
pub fn terminate_process(pid: u32) -> Result<bool, KillError> {
    unsafe {
        let process = match OpenProcess(PROCESS_TERMINATE, false, pid) {
            Ok(h) => h,
            Err(e) if e.code() == ERROR_ACCESS_DENIED.to_hresult() => {
                return Err(KillError::PermissionDenied(pid));
            }
            Err(_) => return Ok(true), // already gone
        };
        let result = TerminateProcess(process, 1);
        let _ = CloseHandle(process);
        match result {
            Ok(()) => Ok(false),
            Err(_) => Ok(true),
        }
    }
}

pub fn is_alive(pid: u32) -> bool {
    unsafe {
        let Ok(process) = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) else {
            return false;
        };
        let mut exit_code: u32 = 0;
        let ok = GetExitCodeProcess(process, &mut exit_code);
        let _ = CloseHandle(process);
        ok.is_ok() && exit_code == STILL_ACTIVE.0 as u32
    }
}
