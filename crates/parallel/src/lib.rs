//! # Parallel
//!
//! Run one async operation over a stream of inputs with at most N calls in
//! flight, and consume results and errors as they complete.
//!
//! ## Layers
//!
//! - [`WorkerPool`] / [`start_pool`]: N Tokio workers share one input
//!   channel. Each outcome goes to a result stream or an error stream; a
//!   supervisor closes both once every worker has exited.
//! - [`Controller`]: owns the input channel and one dispatch task per
//!   generation. `call` submits, `wait` closes the input and drains,
//!   `reset` starts a new generation. All handler invocations run
//!   sequentially on the dispatch task.
//!
//! ```text
//! ┌────────────┐  call()  ┌────────────────┐  Ok / Err  ┌───────────────┐
//! │   caller   │─────────▶│   WorkerPool   │───────────▶│ dispatch task │──▶ on_result / on_error
//! └────────────┘          │ (N workers)    │            │ (sequential)  │
//!                         └────────────────┘            └───────────────┘
//! ```
//!
//! Results arrive in completion order, not submission order. Operation
//! errors are delivered verbatim and never retried.
//!
//! ## Example
//!
//! ```
//! use parallel::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ParallelError> {
//! let controller = Controller::new(
//!     |name: String| async move {
//!         if name.is_empty() {
//!             Err("empty name".to_string())
//!         } else {
//!             Ok(name.len())
//!         }
//!     },
//!     5,
//! )?;
//!
//! controller.on_result(|len| println!("length {}", len));
//! controller.on_error(|err| eprintln!("failed: {}", err));
//!
//! for name in ["James", "Mary", ""] {
//!     controller.call(name.to_string()).await;
//! }
//! controller.wait().await;
//!
//! assert_eq!(controller.stats(), DispatchStats { results: 2, errors: 1 });
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod operation;
pub mod pool;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ControllerConfig, PoolConfig};
    pub use crate::controller::{Controller, ControllerStatus, DispatchStats};
    pub use crate::error::{CallError, ParallelError};
    pub use crate::operation::Operation;
    pub use crate::pool::{start_pool, PoolReport, WorkerPool};
}

// Re-export key types at crate root
pub use config::{ControllerConfig, PoolConfig};
pub use controller::{Controller, ControllerStatus, DispatchStats, ErrorHandler, ResultHandler};
pub use error::{CallError, ParallelError, Result};
pub use operation::Operation;
pub use pool::{start_pool, PoolReport, WorkerPool};
