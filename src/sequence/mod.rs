//! Asynchronous sequences and cancellation.
//!
//! An [`AsyncSequence`] is a re-openable stream factory: every `open` call
//! starts a fresh pull over the underlying data, so one sequence value can
//! appear in several places of an expression tree.
pub mod algebra;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::Notify;

use crate::error::{QueryError, Result};
use crate::expr::{TypeToken, Value};

/// Stream of values pulled from a sequence.
pub type ValueStream = BoxStream<'static, Result<Value>>;

/// Cooperative cancellation shared by every await point of one request.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<SignalState>,
}

#[derive(Default)]
struct SignalState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once the signal has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QueryError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Completes when the signal fires.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl PartialEq for CancellationSignal {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

type OpenFn = dyn Fn(&CancellationSignal) -> Result<ValueStream> + Send + Sync;

/// A plain (non-translated) asynchronous sequence.
#[derive(Clone)]
pub struct AsyncSequence {
    element: TypeToken,
    label: Arc<str>,
    open: Arc<OpenFn>,
}

impl AsyncSequence {
    /// Sequence backed by a stream factory.
    pub fn from_fn<F>(element: TypeToken, label: &str, open: F) -> Self
    where
        F: Fn(&CancellationSignal) -> Result<ValueStream> + Send + Sync + 'static,
    {
        Self {
            element,
            label: Arc::from(label),
            open: Arc::new(open),
        }
    }

    /// Sequence over values already held in memory.
    pub fn from_values(element: TypeToken, values: Vec<Value>) -> Self {
        let values: Arc<[Value]> = Arc::from(values);
        Self::from_shared(element, values)
    }

    pub fn from_shared(element: TypeToken, values: Arc<[Value]>) -> Self {
        let label = format!("memory[{}]", values.len());
        Self::from_fn(element, &label, move |cancel| {
            let values = values.clone();
            let cancel = cancel.clone();
            let stream = stream::iter(0..values.len()).map(move |i| -> Result<Value> {
                cancel.check()?;
                Ok(values[i].clone())
            });
            Ok(stream.boxed())
        })
    }

    pub fn element_type(&self) -> &TypeToken {
        &self.element
    }

    /// The sequence's type as seen from the async surface.
    pub fn sequence_type(&self) -> TypeToken {
        TypeToken::async_queryable(self.element.clone())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn open(&self, cancel: &CancellationSignal) -> Result<ValueStream> {
        cancel.check()?;
        (self.open)(cancel)
    }

    /// Pulls every element, honouring cancellation between items.
    pub async fn collect(&self, cancel: &CancellationSignal) -> Result<Vec<Value>> {
        let mut stream = self.open(cancel)?;
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            cancel.check()?;
            out.push(item?);
        }
        Ok(out)
    }
}

impl fmt::Debug for AsyncSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSequence")
            .field("element", &self.element)
            .field("label", &self.label)
            .finish()
    }
}

impl PartialEq for AsyncSequence {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.open, &other.open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_values_can_be_reopened() {
        let seq = AsyncSequence::from_values(
            TypeToken::Int32,
            vec![Value::from(1), Value::from(2), Value::from(3)],
        );
        let cancel = CancellationSignal::new();
        assert_eq!(seq.collect(&cancel).await.unwrap().len(), 3);
        assert_eq!(seq.collect(&cancel).await.unwrap().len(), 3);
        assert_eq!(seq.label(), "memory[3]");
    }

    #[tokio::test]
    async fn test_cancelled_signal_stops_collection() {
        let seq = AsyncSequence::from_values(TypeToken::Int32, vec![Value::from(1)]);
        let cancel = CancellationSignal::new();
        cancel.cancel();
        assert_eq!(seq.collect(&cancel).await, Err(QueryError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_future_completes_after_cancel() {
        let cancel = CancellationSignal::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        cancel.cancel();
        handle.await.unwrap();
        assert!(cancel.is_cancelled());
    }
}
