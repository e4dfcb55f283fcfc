//! One-shot request promises
//!
//! Asynchronous requests travel the stream action queue as a value plus a
//! one-shot resolver. The stream task resolves or rejects each promise
//! exactly once; dropping an unresolved promise rejects it implicitly
//! (the awaiting side observes `Error::StreamClosed`).

use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// A request value paired with a resolve-once completion channel.
#[derive(Debug)]
pub struct Promise<T> {
    value: T,
    done: Option<oneshot::Sender<Result<()>>>,
}

impl<T> Promise<T> {
    /// Create a promise around `value`, returning the completion future.
    pub fn new(value: T) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                value,
                done: Some(tx),
            },
            Completion(rx),
        )
    }

    /// Borrow the carried value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume the promise, returning the carried value.
    ///
    /// The completion side observes `StreamClosed` if the promise was
    /// still pending.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Whether the promise has not yet been resolved or rejected.
    pub fn is_pending(&self) -> bool {
        self.done.is_some()
    }

    /// Resolve the promise. Subsequent calls are no-ops.
    pub fn resolve(&mut self) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Reject the promise with `err`. Subsequent calls are no-ops.
    pub fn reject(&mut self, err: Error) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(Err(err));
        }
    }
}

/// The awaiting half of a [`Promise`].
#[derive(Debug)]
pub struct Completion(oneshot::Receiver<Result<()>>);

impl Completion {
    /// Wait for the promise to settle.
    pub async fn wait(self) -> Result<()> {
        match self.0.await {
            Ok(result) => result,
            // The promise was dropped unresolved: the stream went away.
            Err(_) => Err(Error::StreamClosed),
        }
    }

    /// Poll without waiting; `None` while still pending.
    pub fn try_wait(&mut self) -> Option<Result<()>> {
        match self.0.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::StreamClosed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve() {
        let (mut promise, completion) = Promise::new(7u32);
        assert_eq!(*promise.value(), 7);
        assert!(promise.is_pending());

        promise.resolve();
        assert!(!promise.is_pending());
        assert!(completion.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_reject() {
        let (mut promise, completion) = Promise::new("sub");
        promise.reject(Error::StreamClosed);
        assert_eq!(completion.wait().await, Err(Error::StreamClosed));
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let (mut promise, completion) = Promise::new(());
        promise.resolve();
        // Second settle attempts must not panic or override the first.
        promise.reject(Error::StreamClosed);
        promise.resolve();
        assert!(completion.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_rejects() {
        let (promise, completion) = Promise::new(());
        drop(promise);
        assert_eq!(completion.wait().await, Err(Error::StreamClosed));
    }

    #[tokio::test]
    async fn test_try_wait() {
        let (mut promise, mut completion) = Promise::new(());
        assert!(completion.try_wait().is_none());
        promise.resolve();
        assert_eq!(completion.try_wait(), Some(Ok(())));
    }
}
