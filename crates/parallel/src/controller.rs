//! Controller: submit / wait / reset lifecycle over a worker pool
//!
//! A controller owns one generation at a time. A generation is an input
//! channel, a [`WorkerPool`] reading from it, and a dispatch task that drains
//! the pool's result and error streams into the installed handlers.
//!
//! ```text
//! call() ──▶ inputs ──▶ WorkerPool ──▶ results ─┐
//!                                  └─▶ errors  ─┴─▶ dispatch task ──▶ handlers
//! ```
//!
//! Generation lifecycle:
//!
//! ```text
//! Running ──wait()──▶ Draining ──(both streams closed)──▶ Stopped ──reset()──▶ Running (n + 1)
//! ```
//!
//! Every handler invocation happens on the dispatch task, one at a time, so
//! handlers can mutate captured state without locking. The flip side is that
//! a slow handler stalls the dispatch task, which fills the output channels,
//! which blocks the workers, which blocks `call()`.
//!
//! A panicking handler fails its generation: the panic is caught on the
//! dispatch task, the remaining outcomes of that generation are discarded,
//! and further calls are rejected until `wait()` and `reset()`. The same
//! happens when every worker of a generation has panicked.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};

use crate::config::ControllerConfig;
use crate::error::{CallError, ParallelError, Result};
use crate::operation::Operation;
use crate::pool::{PoolReport, WorkerPool};

/// Result handler installed with [`Controller::on_result`]
pub type ResultHandler<O> = Box<dyn FnMut(O) + Send>;

/// Error handler installed with [`Controller::on_error`]
pub type ErrorHandler<E> = Box<dyn FnMut(E) + Send>;

/// Lifecycle status of the current generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    /// Accepting calls
    Running,
    /// Input closed, in-flight calls still being delivered
    Draining,
    /// Every outcome delivered; ready for reset
    Stopped,
    /// A handler or every worker panicked; outcomes are no longer delivered
    /// and calls are rejected until reset
    Failed,
}

/// Deliveries dispatched during the current generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    /// Results dispatched
    pub results: u64,
    /// Errors dispatched
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    results: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            results: self.results.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Handler slots shared by every generation of a controller
struct Handlers<O, E> {
    result: Mutex<Option<ResultHandler<O>>>,
    error: Mutex<Option<ErrorHandler<E>>>,
}

impl<O, E> Handlers<O, E> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            error: Mutex::new(None),
        }
    }

    /// Returns false when the handler panicked
    fn deliver_result(&self, output: O) -> bool {
        match self.result.lock().as_mut() {
            Some(handler) => panic::catch_unwind(AssertUnwindSafe(|| handler(output))).is_ok(),
            None => {
                trace!("No result handler installed, discarding result");
                true
            }
        }
    }

    /// Returns false when the handler panicked
    fn deliver_error(&self, err: E) -> bool {
        match self.error.lock().as_mut() {
            Some(handler) => panic::catch_unwind(AssertUnwindSafe(|| handler(err))).is_ok(),
            None => {
                trace!("No error handler installed, discarding error");
                true
            }
        }
    }
}

struct Generation<I> {
    number: u64,
    stopped: bool,
    inputs: async_channel::Sender<I>,
    drained: watch::Receiver<bool>,
    failed: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl<I> Generation<I> {
    fn is_drained(&self) -> bool {
        // A dropped sender means the dispatch task is gone
        *self.drained.borrow() || self.drained.has_changed().is_err()
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
            || (!*self.drained.borrow() && self.drained.has_changed().is_err())
    }
}

/// Runs an operation with bounded parallelism and delivers outcomes to
/// serialized handlers.
///
/// # Handlers
///
/// Without handlers, results and errors are silently discarded. Install an
/// error handler unless dropping failures is really what you want.
///
/// Install handlers before the first [`call`](Self::call); an outcome
/// dispatched before installation is discarded. Installing again replaces the
/// previous handler. Handlers survive [`reset`](Self::reset).
///
/// A handler runs while its slot is locked. Installing a result handler from
/// another task blocks until the running result handler returns (likewise for
/// error handlers), and a handler that installs a handler of the same kind on
/// its own controller deadlocks.
///
/// A handler that panics fails the generation; see
/// [`ControllerStatus::Failed`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use parallel::Controller;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), parallel::ParallelError> {
/// let controller = Controller::new(
///     |n: u64| async move { Ok::<_, String>(n * n) },
///     4,
/// )?;
///
/// let squares = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&squares);
/// controller.on_result(move |n| sink.lock().push(n));
///
/// for n in 1..=3 {
///     controller.call(n).await;
/// }
/// controller.wait().await;
///
/// let mut squares = squares.lock().clone();
/// squares.sort_unstable();
/// assert_eq!(squares, vec![1, 4, 9]);
/// # Ok(())
/// # }
/// ```
pub struct Controller<I, O, E> {
    config: ControllerConfig,
    operation: Arc<dyn Operation<I, O, E>>,
    handlers: Arc<Handlers<O, E>>,
    state: Mutex<Generation<I>>,
}

impl<I, O, E> Controller<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    /// Create a controller running `operation` on up to `concurrency` tasks.
    ///
    /// Generation 1 starts immediately, so this must be called from within a
    /// Tokio runtime.
    pub fn new<Op>(operation: Op, concurrency: usize) -> Result<Self>
    where
        Op: Operation<I, O, E>,
    {
        Self::with_config(operation, ControllerConfig::new(concurrency))
    }

    /// Create a controller from a full configuration
    pub fn with_config<Op>(operation: Op, config: ControllerConfig) -> Result<Self>
    where
        Op: Operation<I, O, E>,
    {
        config.validate()?;

        let operation: Arc<dyn Operation<I, O, E>> = Arc::new(operation);
        let handlers = Arc::new(Handlers::new());
        let generation = start_generation(&config, &operation, &handlers, 1)?;

        Ok(Self {
            config,
            operation,
            handlers,
            state: Mutex::new(generation),
        })
    }

    /// Submit one input.
    ///
    /// Suspends while every worker is busy and the input channel is full.
    ///
    /// # Panics
    ///
    /// Panics when called after [`wait`](Self::wait) without an intervening
    /// [`reset`](Self::reset), or once the generation has failed. Use
    /// [`try_call`](Self::try_call) to get the input back instead.
    pub async fn call(&self, input: I) {
        match self.try_call(input).await {
            Ok(()) => {}
            Err(CallError::Stopped(_)) => panic!(
                "Controller '{}' received a call after wait(); call reset() first",
                self.config.name
            ),
            Err(CallError::Failed(_)) => panic!(
                "Controller '{}' generation failed because a handler or every worker panicked; \
                 call wait() then reset()",
                self.config.name
            ),
        }
    }

    /// Submit one input, handing it back if the generation has been stopped
    /// or has failed
    pub async fn try_call(&self, input: I) -> std::result::Result<(), CallError<I>> {
        let (inputs, number) = {
            let state = self.state.lock();
            if state.is_failed() {
                return Err(CallError::Failed(input));
            }
            if state.stopped {
                return Err(CallError::Stopped(input));
            }
            (state.inputs.clone(), state.number)
        };

        inputs.send(input).await.map_err(|e| {
            let input = e.into_inner();
            let state = self.state.lock();
            // Closed without wait(): every worker is gone
            if state.is_failed() || (state.number == number && !state.stopped) {
                CallError::Failed(input)
            } else {
                CallError::Stopped(input)
            }
        })
    }

    /// Install the result handler, replacing any previous one
    pub fn on_result<F>(&self, handler: F)
    where
        F: FnMut(O) + Send + 'static,
    {
        *self.handlers.result.lock() = Some(Box::new(handler));
    }

    /// Install the error handler, replacing any previous one
    pub fn on_error<F>(&self, handler: F)
    where
        F: FnMut(E) + Send + 'static,
    {
        *self.handlers.error.lock() = Some(Box::new(handler));
    }

    /// Stop accepting calls and wait until every pending outcome has been
    /// delivered to the handlers.
    ///
    /// Idempotent: later calls close nothing and return once the drain has
    /// completed, immediately if it already has.
    #[instrument(skip(self), fields(controller = %self.config.name))]
    pub async fn wait(&self) {
        let (mut drained, failed) = {
            let mut state = self.state.lock();
            if !state.stopped {
                state.stopped = true;
                state.inputs.close();
                debug!(generation = state.number, "Input closed, draining");
            }
            (state.drained.clone(), Arc::clone(&state.failed))
        };

        if drained.wait_for(|done| *done).await.is_err() {
            warn!("Dispatch task ended before draining");
        } else if failed.load(Ordering::Acquire) {
            warn!("Generation failed; some outcomes were not delivered");
        }
    }

    /// Start a fresh generation after [`wait`](Self::wait) has completed.
    ///
    /// Returns [`ParallelError::NotStopped`] while the current generation is
    /// still running or draining; the live generation is left untouched. A
    /// failed generation can be reset once `wait()` has returned.
    /// Must be called from within a Tokio runtime.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.stopped || !state.is_drained() {
            return Err(ParallelError::NotStopped {
                generation: state.number,
            });
        }

        let next = state.number + 1;
        *state = start_generation(&self.config, &self.operation, &self.handlers, next)?;
        debug!(controller = %self.config.name, generation = next, "Controller reset");
        Ok(())
    }

    /// Status of the current generation
    pub fn status(&self) -> ControllerStatus {
        let state = self.state.lock();
        if state.is_failed() {
            ControllerStatus::Failed
        } else if !state.stopped {
            ControllerStatus::Running
        } else if state.is_drained() {
            ControllerStatus::Stopped
        } else {
            ControllerStatus::Draining
        }
    }

    /// Current generation number, starting at 1
    pub fn generation(&self) -> u64 {
        self.state.lock().number
    }

    /// Deliveries dispatched so far in the current generation
    pub fn stats(&self) -> DispatchStats {
        self.state.lock().counters.snapshot()
    }

    /// Controller name used in logs
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration the controller was built with
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
}

fn start_generation<I, O, E>(
    config: &ControllerConfig,
    operation: &Arc<dyn Operation<I, O, E>>,
    handlers: &Arc<Handlers<O, E>>,
    number: u64,
) -> Result<Generation<I>>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    let span = info_span!("controller", controller = %config.name, generation = number);
    let _entered = span.enter();

    let (inputs, inputs_rx) = async_channel::bounded(config.input_buffer);
    let (results, errors, supervisor) =
        WorkerPool::start(Arc::clone(operation), &config.pool(), inputs_rx)?.split();

    let counters = Arc::new(Counters::default());
    let failed = Arc::new(AtomicBool::new(false));
    let (drained_tx, drained) = watch::channel(false);

    tokio::spawn(
        dispatch(
            results,
            errors,
            supervisor,
            Arc::clone(handlers),
            Arc::clone(&counters),
            Arc::clone(&failed),
            drained_tx,
        )
        .in_current_span(),
    );

    info!(concurrency = config.concurrency, "Generation started");

    Ok(Generation {
        number,
        stopped: false,
        inputs,
        drained,
        failed,
        counters,
    })
}

/// Deliver every outcome of one generation, then signal the drain.
///
/// Exits only after both streams have closed; the two closes may arrive in
/// either order. Once a handler has panicked, later outcomes are drained
/// without being delivered so the workers never block.
async fn dispatch<O, E>(
    mut results: mpsc::Receiver<O>,
    mut errors: mpsc::Receiver<E>,
    supervisor: JoinHandle<PoolReport>,
    handlers: Arc<Handlers<O, E>>,
    counters: Arc<Counters>,
    failed: Arc<AtomicBool>,
    drained: watch::Sender<bool>,
) {
    let (mut results_open, mut errors_open) = (true, true);

    while results_open || errors_open {
        tokio::select! {
            output = results.recv(), if results_open => match output {
                Some(_) if failed.load(Ordering::Acquire) => {
                    trace!("Generation failed, discarding result");
                }
                Some(output) => {
                    counters.results.fetch_add(1, Ordering::Relaxed);
                    if !handlers.deliver_result(output) {
                        error!("Result handler panicked; generation failed");
                        failed.store(true, Ordering::Release);
                    }
                }
                None => results_open = false,
            },
            err = errors.recv(), if errors_open => match err {
                Some(_) if failed.load(Ordering::Acquire) => {
                    trace!("Generation failed, discarding error");
                }
                Some(err) => {
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                    if !handlers.deliver_error(err) {
                        error!("Error handler panicked; generation failed");
                        failed.store(true, Ordering::Release);
                    }
                }
                None => errors_open = false,
            },
        }
    }

    match supervisor.await {
        Ok(report) if report.panicked == report.workers => {
            error!(workers = report.workers, "Every worker panicked; generation failed");
            failed.store(true, Ordering::Release);
        }
        Ok(report) if report.panicked > 0 => {
            warn!(
                panicked = report.panicked,
                workers = report.workers,
                "Operation panicked; affected inputs were not delivered"
            );
        }
        Ok(_) => {}
        Err(e) => error!("Pool supervisor failed: {}", e),
    }

    let stats = counters.snapshot();
    info!(
        results = stats.results,
        errors = stats.errors,
        "Generation drained"
    );

    drained.send_replace(true);
}
