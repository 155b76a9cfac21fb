//! Service wiring shared by the binaries.

mod runtime;

pub use runtime::SyncRuntime;
