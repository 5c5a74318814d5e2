//! Background agents: ingestion shards, the flush worker and the compaction
//! ticker.
//!
//! Each agent is a named OS thread holding an `Arc` of the engine state.
//! Agents exit when the state's shutdown flag is raised (flush, compaction)
//! or when their request channel closes (ingestion); `Engine::close` joins
//! them all before the final drain.

pub mod compact;
pub mod flush;
pub mod ingest;

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::Result;
use crate::state::EngineState;

/// Spawn a named agent thread running `body` against the shared state.
pub(crate) fn spawn(
    name: &str,
    state: Arc<EngineState>,
    body: impl FnOnce(Arc<EngineState>) + Send + 'static,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(state))?;
    Ok(handle)
}
