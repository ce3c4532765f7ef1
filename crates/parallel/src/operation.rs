//! The unit of work executed by the pool

use std::future::Future;

use async_trait::async_trait;

/// An async function from one input to one result or one error.
///
/// The pool calls it from `concurrency` tasks at once, so implementations
/// must not rely on exclusive access to any state they share.
///
/// Every `Fn(I) -> impl Future<Output = Result<O, E>>` closure is an
/// operation. Stateful operations can implement the trait directly:
///
/// ```
/// use async_trait::async_trait;
/// use parallel::Operation;
///
/// struct Doubler;
///
/// #[async_trait]
/// impl Operation<u32, u32, String> for Doubler {
///     async fn call(&self, input: u32) -> Result<u32, String> {
///         input.checked_mul(2).ok_or_else(|| "overflow".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Operation<I, O, E>: Send + Sync + 'static {
    /// Run the operation for a single input
    async fn call(&self, input: I) -> Result<O, E>;
}

#[async_trait]
impl<I, O, E, F, Fut> Operation<I, O, E> for F
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
{
    async fn call(&self, input: I) -> Result<O, E> {
        (self)(input).await
    }
}
