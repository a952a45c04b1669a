//! Pluggable completion primitive
//!
//! Every submission and every payload-store operation hands back a
//! [`Completion`], built by the process-wide [`CompletionPrimitive`] that is
//! current at the moment of the call. The primitive can be swapped at
//! runtime with [`use_completion`]; completions already created keep the
//! primitive they were built with.

use crate::error::ExecutionError;
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::info;

/// Type-erased settled value
pub type ErasedValue = Box<dyn Any + Send>;

/// Type-erased pending completion produced by a primitive
pub type ErasedCompletion = BoxFuture<'static, Result<ErasedValue, ExecutionError>>;

/// Body run once, synchronously, when a completion is constructed
pub type Executor = Box<dyn FnOnce(Settler) + Send>;

type SettleFn = Box<dyn FnOnce(Result<ErasedValue, ExecutionError>) + Send>;

/// One-shot handle that settles a pending completion.
///
/// Settling consumes the handle. Dropping it unsettled makes the
/// completion fail with [`ExecutionError::Abandoned`].
pub struct Settler {
    settle: SettleFn,
}

impl Settler {
    pub fn new(settle: impl FnOnce(Result<ErasedValue, ExecutionError>) + Send + 'static) -> Self {
        Self {
            settle: Box::new(settle),
        }
    }

    pub fn resolve<T: Any + Send>(self, value: T) {
        (self.settle)(Ok(Box::new(value)))
    }

    pub fn reject(self, error: ExecutionError) {
        (self.settle)(Err(error))
    }

    pub fn settle<T: Any + Send>(self, result: Result<T, ExecutionError>) {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }
}

impl fmt::Debug for Settler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler").finish_non_exhaustive()
    }
}

/// Constructor for pending completions
pub trait CompletionPrimitive: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Create a pending completion and run `executor` with its settler
    fn construct(&self, executor: Executor) -> ErasedCompletion;
}

/// Default primitive backed by `tokio::sync::oneshot`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCompletion;

impl CompletionPrimitive for TokioCompletion {
    fn name(&self) -> &'static str {
        "tokio"
    }

    fn construct(&self, executor: Executor) -> ErasedCompletion {
        let (tx, rx) = tokio::sync::oneshot::channel();
        executor(Settler::new(move |result| {
            let _ = tx.send(result);
        }));
        async move { rx.await.unwrap_or(Err(ExecutionError::Abandoned)) }.boxed()
    }
}

/// Runtime-agnostic primitive backed by `futures::channel::oneshot`
#[derive(Debug, Default, Clone, Copy)]
pub struct FuturesCompletion;

impl CompletionPrimitive for FuturesCompletion {
    fn name(&self) -> &'static str {
        "futures"
    }

    fn construct(&self, executor: Executor) -> ErasedCompletion {
        let (tx, rx) = futures::channel::oneshot::channel();
        executor(Settler::new(move |result| {
            let _ = tx.send(result);
        }));
        rx.map(|received| received.unwrap_or(Err(ExecutionError::Abandoned)))
            .boxed()
    }
}

static CURRENT: Lazy<RwLock<Arc<dyn CompletionPrimitive>>> =
    Lazy::new(|| RwLock::new(Arc::new(TokioCompletion)));

/// The primitive new completions will be built with
pub fn current_completion() -> Arc<dyn CompletionPrimitive> {
    CURRENT.read().clone()
}

/// Replace the process-wide completion primitive.
///
/// The candidate must settle a resolved probe immediately; otherwise it is
/// rejected and the current primitive stays in place.
pub fn use_completion(candidate: Arc<dyn CompletionPrimitive>) -> Result<(), ExecutionError> {
    let probe = candidate.construct(Box::new(|settler| settler.resolve(())));

    match probe.now_or_never() {
        Some(Ok(value)) if value.is::<()>() => {}
        _ => {
            return Err(ExecutionError::InvalidArgument(format!(
                "completion primitive '{}' must settle a resolved completion immediately",
                candidate.name()
            )))
        }
    }

    let mut current = CURRENT.write();
    info!(from = current.name(), to = candidate.name(), "Switching completion primitive");
    *current = candidate;
    Ok(())
}

/// Restore the default primitive
pub fn reset_completion() {
    *CURRENT.write() = Arc::new(TokioCompletion);
}

/// A pending result of type `T`
///
/// Await it directly, or chain with [`Completion::then`].
#[must_use = "completions do nothing unless awaited"]
pub struct Completion<T> {
    inner: ErasedCompletion,
    primitive: Arc<dyn CompletionPrimitive>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send> Completion<T> {
    /// Build with the current primitive, running `executor` immediately
    pub fn new(executor: impl FnOnce(Settler) + Send + 'static) -> Self {
        Self::with_primitive(current_completion(), executor)
    }

    pub fn with_primitive(
        primitive: Arc<dyn CompletionPrimitive>,
        executor: impl FnOnce(Settler) + Send + 'static,
    ) -> Self {
        let inner = primitive.construct(Box::new(executor));
        Self {
            inner,
            primitive,
            _marker: PhantomData,
        }
    }

    pub fn resolved(value: T) -> Self {
        Self::new(move |settler| settler.resolve(value))
    }

    pub fn rejected(error: ExecutionError) -> Self {
        Self::new(move |settler| settler.reject(error))
    }

    /// Name of the primitive this completion was built with
    pub fn primitive_name(&self) -> &'static str {
        self.primitive.name()
    }

    /// Chain a continuation that runs once this completion resolves.
    /// A rejection skips `f` and passes through unchanged.
    pub fn then<U, F>(self, f: F) -> Completion<U>
    where
        U: Any + Send,
        F: FnOnce(T) -> Result<U, ExecutionError> + Send + 'static,
    {
        let inner = self.inner;
        let chained = async move {
            let value = downcast::<T>(inner.await?)?;
            f(value).map(|next| Box::new(next) as ErasedValue)
        }
        .boxed();

        Completion {
            inner: chained,
            primitive: self.primitive,
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Send> Future for Completion<T> {
    type Output = Result<T, ExecutionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner
            .as_mut()
            .poll(cx)
            .map(|settled| settled.and_then(downcast::<T>))
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("primitive", &self.primitive.name())
            .finish_non_exhaustive()
    }
}

fn downcast<T: Any>(value: ErasedValue) -> Result<T, ExecutionError> {
    value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        ExecutionError::Configuration(format!(
            "completion settled with a value that is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;

    struct NeverSettles;

    impl CompletionPrimitive for NeverSettles {
        fn name(&self) -> &'static str {
            "never"
        }

        fn construct(&self, _executor: Executor) -> ErasedCompletion {
            future::pending().boxed()
        }
    }

    fn tokio_primitive() -> Arc<dyn CompletionPrimitive> {
        Arc::new(TokioCompletion)
    }

    #[tokio::test]
    async fn test_resolve_and_reject() {
        let ok: Completion<u32> = Completion::with_primitive(tokio_primitive(), |s| s.resolve(7u32));
        assert_eq!(ok.await.unwrap(), 7);

        let err: Completion<u32> = Completion::with_primitive(tokio_primitive(), |s| {
            s.reject(ExecutionError::InvalidArgument("bad".to_string()))
        });
        assert!(err.await.unwrap_err().is_invalid_argument());
    }

    #[tokio::test]
    async fn test_settled_later_from_another_task() {
        let completion: Completion<String> = Completion::with_primitive(tokio_primitive(), |s| {
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                s.resolve("late".to_string());
            });
        });
        assert_eq!(completion.await.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_dropped_settler_is_abandoned() {
        let completion: Completion<()> = Completion::with_primitive(tokio_primitive(), drop);
        assert!(matches!(completion.await, Err(ExecutionError::Abandoned)));
    }

    #[tokio::test]
    async fn test_then_chains_and_skips_on_rejection() {
        let doubled = Completion::<u32>::with_primitive(tokio_primitive(), |s| s.resolve(21u32))
            .then(|n: u32| Ok(n * 2));
        assert_eq!(doubled.primitive_name(), "tokio");
        assert_eq!(doubled.await.unwrap(), 42);

        let skipped = Completion::<u32>::with_primitive(tokio_primitive(), |s| {
            s.reject(ExecutionError::Abandoned)
        })
        .then(|_: u32| -> Result<u32, ExecutionError> { panic!("continuation must not run") });
        assert!(matches!(skipped.await, Err(ExecutionError::Abandoned)));
    }

    #[test]
    fn test_futures_primitive_without_tokio() {
        let completion: Completion<&'static str> =
            Completion::with_primitive(Arc::new(FuturesCompletion), |s| s.resolve("done"));
        assert_eq!(completion.primitive_name(), "futures");
        assert_eq!(futures::executor::block_on(completion).unwrap(), "done");
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let completion: Completion<u32> =
            Completion::with_primitive(tokio_primitive(), |s| s.resolve("not a number"));
        assert!(matches!(completion.await, Err(ExecutionError::Configuration(_))));
    }

    #[test]
    fn test_use_completion_rejects_broken_primitive() {
        let err = use_completion(Arc::new(NeverSettles)).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_ne!(current_completion().name(), "never");
    }
}
