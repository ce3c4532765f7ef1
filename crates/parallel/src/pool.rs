//! Fixed-size worker pool
//!
//! Fans one input stream out across N Tokio tasks and fans their outcomes
//! back into a result stream and an error stream.
//!
//! ```text
//!                      ┌──────────┐
//!                 ┌───▶│ worker 0 │───┐   Ok(o)  ┌─────────────┐
//! ┌────────────┐  │    └──────────┘   ├─────────▶│ results (O) │
//! │ inputs (I) │──┼───▶   ...         │          └─────────────┘
//! └────────────┘  │    ┌──────────┐   │   Err(e) ┌─────────────┐
//!                 └───▶│ worker N │───┴─────────▶│ errors (E)  │
//!                      └──────────┘              └─────────────┘
//!                            ▲ joined by the supervisor, which closes
//!                              both output streams after the last exit
//! ```

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument};

use crate::config::PoolConfig;
use crate::error::Result;
use crate::operation::Operation;

/// Summary produced by the supervisor once every worker has exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    /// Number of workers that were spawned
    pub workers: usize,
    /// Number of workers that terminated because the operation panicked
    pub panicked: usize,
}

/// A running worker pool.
///
/// Holds the receiving ends of the result and error streams plus the
/// supervisor task. Both streams close once all workers have exited, which
/// only happens after the input channel is closed and drained.
///
/// The input channel is owned by the caller. If it is never closed (and its
/// senders are never dropped) the workers wait for input forever.
pub struct WorkerPool<O, E> {
    results: mpsc::Receiver<O>,
    errors: mpsc::Receiver<E>,
    supervisor: JoinHandle<PoolReport>,
}

impl<O, E> WorkerPool<O, E>
where
    O: Send + 'static,
    E: Send + 'static,
{
    /// Spawn `config.concurrency` workers reading from `inputs`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<I>(
        operation: Arc<dyn Operation<I, O, E>>,
        config: &PoolConfig,
        inputs: async_channel::Receiver<I>,
    ) -> Result<Self>
    where
        I: Send + 'static,
    {
        config.validate()?;

        let (results_tx, results) = mpsc::channel(config.output_buffer);
        let (errors_tx, errors) = mpsc::channel(config.output_buffer);

        let workers: Vec<JoinHandle<()>> = (0..config.concurrency)
            .map(|id| {
                tokio::spawn(
                    run_worker(
                        id,
                        Arc::clone(&operation),
                        inputs.clone(),
                        results_tx.clone(),
                        errors_tx.clone(),
                    )
                    .in_current_span(),
                )
            })
            .collect();

        // The pool's own receiver handle must not keep the channel open
        drop(inputs);

        let supervisor = tokio::spawn(
            async move {
                let workers_count = workers.len();
                let mut panicked = 0;

                for (id, outcome) in join_all(workers).await.into_iter().enumerate() {
                    if let Err(e) = outcome {
                        if e.is_panic() {
                            panicked += 1;
                            error!(worker = id, "Worker panicked: {}", e);
                        } else {
                            debug!(worker = id, "Worker cancelled");
                        }
                    }
                }

                drop(results_tx);
                drop(errors_tx);
                debug!(workers = workers_count, panicked, "Workers exited, output streams closed");

                PoolReport {
                    workers: workers_count,
                    panicked,
                }
            }
            .in_current_span(),
        );

        Ok(Self {
            results,
            errors,
            supervisor,
        })
    }

    /// Take both output streams, detaching the supervisor
    pub fn into_streams(self) -> (mpsc::Receiver<O>, mpsc::Receiver<E>) {
        (self.results, self.errors)
    }

    /// Take both output streams and the supervisor handle
    pub fn split(self) -> (mpsc::Receiver<O>, mpsc::Receiver<E>, JoinHandle<PoolReport>) {
        (self.results, self.errors, self.supervisor)
    }
}

/// Start a pool with default channel capacities.
///
/// Returns the result stream and the error stream. Both close after `inputs`
/// is closed and every in-flight call has been delivered.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), parallel::ParallelError> {
/// let (tx, rx) = async_channel::bounded(1);
/// let (mut results, _errors) = parallel::start_pool(
///     |n: u32| async move { Ok::<_, std::io::Error>(n * 2) },
///     4,
///     rx,
/// )?;
///
/// tokio::spawn(async move {
///     for n in 0..3 {
///         tx.send(n).await.unwrap();
///     }
/// });
///
/// let mut sum = 0;
/// while let Some(n) = results.recv().await {
///     sum += n;
/// }
/// assert_eq!(sum, 6);
/// # Ok(())
/// # }
/// ```
pub fn start_pool<I, O, E, Op>(
    operation: Op,
    concurrency: usize,
    inputs: async_channel::Receiver<I>,
) -> Result<(mpsc::Receiver<O>, mpsc::Receiver<E>)>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
    Op: Operation<I, O, E>,
{
    let operation: Arc<dyn Operation<I, O, E>> = Arc::new(operation);
    let pool = WorkerPool::start(operation, &PoolConfig::new(concurrency), inputs)?;
    Ok(pool.into_streams())
}

async fn run_worker<I, O, E>(
    id: usize,
    operation: Arc<dyn Operation<I, O, E>>,
    inputs: async_channel::Receiver<I>,
    results: mpsc::Sender<O>,
    errors: mpsc::Sender<E>,
) where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    debug!(worker = id, "Worker started");

    // recv() fails only once the channel is closed and empty
    while let Ok(input) = inputs.recv().await {
        let delivered = match operation.call(input).await {
            Ok(output) => results.send(output).await.is_ok(),
            Err(err) => errors.send(err).await.is_ok(),
        };

        if !delivered {
            debug!(worker = id, "Output stream dropped, worker stopping");
            break;
        }
    }

    debug!(worker = id, "Worker exited");
}
