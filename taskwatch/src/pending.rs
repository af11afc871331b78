//! Handles for scheduled background work.
//!
//! Gateway operations and log appends are scheduled the moment they are
//! requested. The returned [`Pending`] only observes the result: the caller
//! either awaits it or detaches it with an error sink. Dropping a `Pending`
//! does not cancel the work; the producers trace every failure themselves, so
//! a dropped handle never loses an error silently.
//!
//! # Example
//!
//! ```no_run
//! use taskwatch::gateway::Gateway;
//! use taskwatch::task::Task;
//!
//! # async fn example(gateway: Gateway) -> Result<(), taskwatch::gateway::GatewayError> {
//! let task = Task::new("Buy milk", "2 liters").unwrap();
//!
//! // Wait for the write to hit the disk.
//! gateway.append_one("alice", &task).await?;
//!
//! // Or let it finish in the background.
//! gateway
//!     .append_one("alice", &task)
//!     .detach(|err| eprintln!("write failed: {err}"));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;

/// Boxed future returned by a [`Pending`].
pub type PendingFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'static>>;

/// Result of a unit of work that is already running.
#[must_use = "a Pending should be awaited or detached"]
pub struct Pending<T, E> {
    label: &'static str,
    future: PendingFuture<T, E>,
}

impl<T, E> Pending<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new<F>(label: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            label,
            future: Box::pin(future),
        }
    }

    /// Short name of the operation, for diagnostics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Waits for the work to finish.
    ///
    /// # Errors
    ///
    /// Returns whatever error the operation produced.
    pub async fn wait(self) -> Result<T, E> {
        self.future.await
    }

    /// Lets the work finish in the background and hands any failure to
    /// `sink`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn detach<F>(self, sink: F)
    where
        F: FnOnce(E) + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(err) = self.future.await {
                sink(err);
            }
        });
    }
}

impl<T, E> IntoFuture for Pending<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = PendingFuture<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.future
    }
}

impl<T, E> fmt::Debug for Pending<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").field("label", &self.label).finish()
    }
}
