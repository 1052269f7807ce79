//! Timeout boundary for engine calls
//!
//! The call runs on its own worker thread; the caller waits at most
//! `timeout` for the result. A call that overruns is abandoned, its thread
//! finishing in the background with the result discarded.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::error::{CantorError, Result};

/// Run `f` on a worker thread, failing with `EngineTimeout` after `timeout`
pub fn call_with_timeout<T, F>(engine: &str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("cantor-{}", engine))
        .spawn(move || {
            // The receiver is gone once the caller timed out
            let _ = tx.send(f());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            trace!(engine, "engine call returned");
            result
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(engine, timeout_ms = timeout.as_millis() as u64, "engine call timed out");
            Err(CantorError::EngineTimeout {
                engine: engine.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(CantorError::EngineUnavailable {
            engine: engine.to_string(),
            reason: "engine worker exited without a result".to_string(),
        }),
    }
}
