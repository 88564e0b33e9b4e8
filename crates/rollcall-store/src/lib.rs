//! rollcall-store: on-disk state.
//!
//! The registry is a directory tree of reference images per identity; the
//! ledger is a single append-only CSV of attendance rows.

pub mod ledger;
pub mod registry;

pub use ledger::{Attendance, AttendanceRecord, Ledger, LedgerError, MarkResult};
pub use registry::{RegistryStore, StoreError};
