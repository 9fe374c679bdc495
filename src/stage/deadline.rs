//! Recognize calls, optionally bounded by a deadline
//!
//! The engine call itself cannot be cancelled. With a deadline it runs on a
//! worker thread that owns the checked-out handle; if the caller gives up,
//! the handle only goes back to the pool once the engine returns.

use crossbeam_channel::{bounded, RecvTimeoutError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{dispatcher, warn, Dispatch, Span};

use super::pool::PooledHandle;
use crate::engine::RecognitionResult;
use crate::error::EngineError;

/// Run recognition on the calling thread, turning a panic into an error
pub(crate) fn recognize_guarded(
    handle: &mut PooledHandle,
    image: &[u8],
) -> Result<RecognitionResult, EngineError> {
    match panic::catch_unwind(AssertUnwindSafe(|| handle.recognize(image))) {
        Ok(result) => result,
        Err(payload) => {
            handle.poison();
            Err(EngineError::Panicked(panic_message(payload.as_ref())))
        }
    }
}

/// Run recognition on a worker thread and wait until `deadline`.
///
/// `budget` is the configured timeout the deadline was derived from; it is
/// what a `TimedOut` error reports.
pub(crate) fn recognize_with_deadline(
    mut handle: PooledHandle,
    image: Arc<[u8]>,
    deadline: Instant,
    budget: Duration,
) -> Result<RecognitionResult, EngineError> {
    let (tx, rx) = bounded(1);
    let span = Span::current();
    let dispatch = dispatcher::get_default(Dispatch::clone);
    let engine_id = handle.id();

    thread::Builder::new()
        .name(format!("alpr-recognize-{}", engine_id))
        .spawn(move || {
            dispatcher::with_default(&dispatch, || {
                let _enter = span.enter();
                let result = recognize_guarded(&mut handle, &image);
                // The caller may have given up already
                let _ = tx.send(result);
            })
        })
        .map_err(|e| EngineError::backend(format!("failed to spawn recognition worker: {e}")))?;

    match rx.recv_deadline(deadline) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            let ms = budget.as_millis() as u64;
            warn!(
                "ALPR engine #{} did not answer within {} ms; it stays checked out until it returns",
                engine_id, ms
            );
            Err(EngineError::TimedOut(ms))
        }
        Err(RecvTimeoutError::Disconnected) => Err(EngineError::Panicked(
            "recognition worker exited without a result".to_string(),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
