//! Execution context precondition.
//!
//! Verification fans out onto the runtime and returns immediately, so it must
//! be started from a multi-threaded tokio runtime. Starting it without a
//! runtime, or from a single-threaded (current-thread) runtime such as one
//! driving a UI loop, is a usage error.

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::{Error, Result};

/// Return the current runtime handle if it may host a verification run.
pub fn require_multi_thread() -> Result<Handle> {
    let handle = Handle::try_current().map_err(|_| {
        Error::wrong_execution_context("no tokio runtime is running on this thread")
    })?;

    match handle.runtime_flavor() {
        RuntimeFlavor::CurrentThread => Err(Error::wrong_execution_context(
            "verification cannot be started from a current-thread runtime",
        )),
        _ => Ok(handle),
    }
}
