//! OS-facing seams.
//!
//! Every component that needs to touch the operating system does so only
//! through the traits in this module. Production code is backed by
//! `sysinfo` (process enumeration), `netstat2` (TCP listener tables), and
//! native Windows APIs (job objects, process termination), with a
//! `#[cfg(unix)]` fallback for every seam so the crate is developable
//! without a Windows host (spec.md §9 Design Notes; non-goals still commit
//! the authoritative behavior to Windows semantics). Tests inject fakes
//! implementing the same traits, per spec.md §9's instruction to make the
//! caches and registries explicit, injectable values.

pub mod enumerator;
pub mod killer;
pub mod ports;

#[cfg(windows)]
pub mod windows_job;

#[cfg(unix)]
pub mod unix_signal;

pub use enumerator::{ProcessEnumerator, ProcessSnapshot, SystemEnumerator};
pub use killer::{ProcessKiller, SystemKiller, TerminationMethod};
pub use ports::{ListenerEntry, PortTableReader, SystemPortTableReader};
