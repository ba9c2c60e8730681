//! Background worker daemon for the document-review service.
//!
//! Owns the task queue, the worker pool that runs the Pipeline, startup
//! recovery after an unclean shutdown, and the composition root (`Runtime`)
//! that wires these together with the HTTP/WebSocket API in `rv-bridge`.

pub mod queue;
pub mod recovery;
pub mod runtime;
pub mod worker_pool;
