//! The error taxonomy from spec.md §7, and its mapping onto `ErrorResponse`.
//!
//! Every component returns a typed `CoreError` rather than aborting; the
//! dispatcher never converts a typed failure into `Internal` (spec.md §7
//! "Propagation policy"). `CoreError` -> `ErrorResponse` is centralized in
//! one exhaustive match so a new variant that forgets a suggestion or
//! developer hint fails to compile, enforcing "no error may be returned
//! without a concrete remediation suggestion".

use crate::schema::{ErrorResponse, ProtectionReason};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("process {pid} is protected ({reason:?})")]
    ProtectedProcess { pid: u32, reason: ProtectionReason },

    #[error("descendant {pid} of the requested tree is protected ({reason:?})")]
    ProtectedDescendant { pid: u32, reason: ProtectionReason },

    #[error("process {pid} was spawned by this server")]
    UserSpawnedGuard { pid: u32 },

    #[error("process {pid} has {child_count} live children")]
    HasChildren { pid: u32, child_count: usize, children: Vec<u32> },

    #[error("access denied operating on pid {pid}")]
    PermissionDenied { pid: u32 },

    #[error("termination of pid {pid} did not complete before the timeout")]
    TerminationFailed { pid: u32 },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("command not allowed: {message}")]
    CommandNotAllowed { message: String },

    #[error("operation timed out: {message}")]
    Timeout { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    /// Short machine-readable classification (spec.md §7 `error` field).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ProcessNotFound { .. } => "process_not_found",
            CoreError::ProtectedProcess { .. } => "protected_process",
            CoreError::ProtectedDescendant { .. } => "protected_descendant",
            CoreError::UserSpawnedGuard { .. } => "user_spawned_guard",
            CoreError::HasChildren { .. } => "has_children",
            CoreError::PermissionDenied { .. } => "permission_denied",
            CoreError::TerminationFailed { .. } => "termination_failed",
            CoreError::InvalidArgument { .. } => "invalid_argument",
            CoreError::CommandNotAllowed { .. } => "command_not_allowed",
            CoreError::Timeout { .. } => "timeout",
            CoreError::Internal { .. } => "internal",
        }
    }

    /// Concrete next action for the caller (spec.md §7 `suggestion` field).
    pub fn suggestion(&self) -> String {
        match self {
            CoreError::ProcessNotFound { .. } => {
                "call find_process again; the pid may already be gone".to_string()
            }
            CoreError::ProtectedProcess { .. } => {
                "this process cannot be killed; if you believe this is a mistake, \
                 adjust the protected-token configuration and restart the server"
                    .to_string()
            }
            CoreError::ProtectedDescendant { pid, .. } => {
                format!(
                    "pid {pid} in the tree is protected; kill_process_tree will never \
                     proceed while any descendant is protected"
                )
            }
            CoreError::UserSpawnedGuard { .. } => {
                "retry kill_process with override=true, or use kill_process_tree".to_string()
            }
            CoreError::HasChildren { .. } => {
                "use kill_process_tree to terminate this process and its children together"
                    .to_string()
            }
            CoreError::PermissionDenied { .. } => {
                "retry with elevated privileges".to_string()
            }
            CoreError::TerminationFailed { .. } => {
                "retry kill_process with force=true, or investigate why the process \
                 is ignoring termination signals"
                    .to_string()
            }
            CoreError::InvalidArgument { .. } => {
                "check the request parameters against the operation's input schema".to_string()
            }
            CoreError::CommandNotAllowed { .. } => {
                "request an allowlist update from the command-whitelist validator".to_string()
            }
            CoreError::Timeout { .. } => {
                "retry the operation; if it keeps timing out the host may be under load"
                    .to_string()
            }
            CoreError::Internal { .. } => {
                "retry the operation; if it persists, check the debug log".to_string()
            }
        }
    }

    /// Why the guard that produced this error exists (spec.md §7 `developer_hint`).
    pub fn developer_hint(&self) -> &'static str {
        match self {
            CoreError::ProcessNotFound { .. } => {
                "processes can exit between being listed and being targeted"
            }
            CoreError::ProtectedProcess { .. } => {
                "killing infrastructure processes severs the channel this server is reached through"
            }
            CoreError::ProtectedDescendant { .. } => {
                "tree termination must never kill infrastructure hiding inside a descendant"
            }
            CoreError::UserSpawnedGuard { .. } => {
                "the server tracks processes it spawned and requires an explicit override \
                 before killing them outside their own lifecycle"
            }
            CoreError::HasChildren { .. } => {
                "killing a parent without its children orphans them, which is exactly \
                 the stuck-port scenario this server exists to prevent"
            }
            CoreError::PermissionDenied { .. } => "the OS denied the requested handle access",
            CoreError::TerminationFailed { .. } => {
                "both graceful and forceful termination were attempted and the process \
                 was still alive at the deadline"
            }
            CoreError::InvalidArgument { .. } => "the request failed input validation",
            CoreError::CommandNotAllowed { .. } => {
                "arbitrary shell execution is gated by an external command whitelist"
            }
            CoreError::Timeout { .. } => "the operation exceeded its stated latency budget",
            CoreError::Internal { .. } => "an unexpected condition was caught at a component boundary",
        }
    }

    pub fn into_response(self, kind: &'static str, elapsed_seconds: f64) -> ErrorResponse {
        let code = self.code();
        let suggestion = self.suggestion();
        let developer_hint = self.developer_hint();
        ErrorResponse::new(kind, elapsed_seconds, code, self.to_string(), suggestion, developer_hint)
    }
}
