//! Serial work dispatcher
//!
//! A [`SerialWorkDispatcher`] owns a FIFO of work items and hands them, one
//! at a time and in offer order, to a [`WorkHandler`]. Processing happens on
//! a single drain task spawned onto the tokio runtime that was current when
//! the dispatcher was started:
//!
//! 1. `offer` enqueues an item and, when the dispatcher is active and the
//!    gate is open, schedules a drain unless one is already scheduled
//! 2. The drain re-checks the gate before every item and stops as soon as
//!    it closes, leaving the remaining items queued
//! 3. A closed gate is re-checked only on the next `offer` or an explicit
//!    [`resume`](SerialWorkDispatcher::resume)
//!
//! At most one handler invocation is in flight per dispatcher. `shutdown`
//! cancels the drain immediately and discards everything still queued.

use crate::error::DispatcherError;
use crate::types::DispatcherState;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Gate = Arc<dyn Fn() -> bool + Send + Sync>;
type Hook = Arc<dyn Fn() + Send + Sync>;

/// Processes the items of a [`SerialWorkDispatcher`]
///
/// The returned flag reports whether processing succeeded. It is logged
/// only; the item is consumed either way.
#[async_trait]
pub trait WorkHandler<T: Send + 'static>: Send + Sync {
    /// Process one item
    async fn handle(&self, item: T) -> bool;
}

#[async_trait]
impl<T, F, Fut> WorkHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn handle(&self, item: T) -> bool {
        (self)(item).await
    }
}

struct Inner<T> {
    state: DispatcherState,
    queue: VecDeque<T>,
    /// A drain task is running or about to run
    scheduled: bool,
    runtime: Option<Handle>,
    drain: Option<JoinHandle<()>>,
}

/// Single-consumer, gated, strictly ordered work queue
pub struct SerialWorkDispatcher<T: Send + 'static> {
    name: Arc<str>,
    handler: Arc<dyn WorkHandler<T>>,
    gate: Gate,
    prepare: Option<Hook>,
    cleanup: Option<Hook>,
    inner: Arc<Mutex<Inner<T>>>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> SerialWorkDispatcher<T> {
    /// Create a dispatcher in the `Created` state with an always-open gate
    pub fn new(name: impl Into<String>, handler: impl WorkHandler<T> + 'static) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            handler: Arc::new(handler),
            gate: Arc::new(|| true),
            prepare: None,
            cleanup: None,
            inner: Arc::new(Mutex::new(Inner {
                state: DispatcherState::Created,
                queue: VecDeque::new(),
                scheduled: false,
                runtime: None,
                drain: None,
            })),
            cancel: CancellationToken::new(),
        }
    }

    /// Only process items while `gate` returns true
    #[must_use]
    pub fn with_gate(mut self, gate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    /// Run `hook` once when the dispatcher starts, before any item is handled
    #[must_use]
    pub fn on_prepare(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.prepare = Some(Arc::new(hook));
        self
    }

    /// Run `hook` once when the dispatcher shuts down
    #[must_use]
    pub fn on_cleanup(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.cleanup = Some(Arc::new(hook));
        self
    }

    /// Name used in log events
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> DispatcherState {
        self.lock().state
    }

    /// Number of items waiting to be handled
    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether a drain task is currently scheduled
    pub fn is_draining(&self) -> bool {
        self.lock().scheduled
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        lock_inner(&self.inner)
    }

    /// Activate the dispatcher
    ///
    /// Runs the prepare hook, then drains items offered before the start.
    /// Returns `Ok(false)` if the dispatcher is already active.
    ///
    /// # Errors
    ///
    /// - [`DispatcherError::StartAfterShutdown`] once shut down
    /// - [`DispatcherError::NoRuntime`] when called outside a tokio runtime
    pub fn start(&self) -> Result<bool, DispatcherError> {
        {
            let mut inner = self.lock();
            match inner.state {
                DispatcherState::Shutdown => {
                    return Err(DispatcherError::StartAfterShutdown {
                        name: self.name.to_string(),
                    });
                }
                DispatcherState::Active => return Ok(false),
                DispatcherState::Created => {}
            }
            let runtime = Handle::try_current().map_err(|_| DispatcherError::NoRuntime {
                name: self.name.to_string(),
            })?;
            inner.runtime = Some(runtime);
            inner.state = DispatcherState::Active;
            // Hold off drains until prepare has run
            inner.scheduled = true;
        }

        tracing::info!(dispatcher = %self.name, "Dispatcher started");
        if let Some(prepare) = &self.prepare {
            prepare();
        }

        self.lock().scheduled = false;
        self.resume();
        Ok(true)
    }

    /// Queue `item` for processing
    ///
    /// Returns false (dropping the item) once the dispatcher is shut down.
    pub fn offer(&self, item: T) -> bool {
        {
            let mut inner = self.lock();
            if inner.state == DispatcherState::Shutdown {
                tracing::warn!(dispatcher = %self.name, "Offer rejected, dispatcher is shut down");
                return false;
            }
            inner.queue.push_back(item);
            if inner.state != DispatcherState::Active || inner.scheduled {
                return true;
            }
        }

        if (self.gate)() {
            self.schedule();
        } else {
            tracing::debug!(dispatcher = %self.name, "Gate closed, item queued");
        }
        true
    }

    /// Re-check the gate and drain queued items if it is open
    ///
    /// Returns true if a drain was scheduled by this call.
    pub fn resume(&self) -> bool {
        {
            let inner = self.lock();
            if inner.state != DispatcherState::Active || inner.scheduled || inner.queue.is_empty() {
                return false;
            }
        }
        (self.gate)() && self.schedule()
    }

    /// Stop processing for good
    ///
    /// Cancels the in-flight handler, runs the cleanup hook and discards
    /// queued items. Returns false if already shut down.
    pub fn shutdown(&self) -> bool {
        let (discarded, drain) = {
            let mut inner = self.lock();
            if inner.state == DispatcherState::Shutdown {
                return false;
            }
            inner.state = DispatcherState::Shutdown;
            inner.scheduled = false;
            inner.runtime = None;
            (std::mem::take(&mut inner.queue), inner.drain.take())
        };

        self.cancel.cancel();
        if let Some(drain) = drain {
            drain.abort();
        }
        if let Some(cleanup) = &self.cleanup {
            cleanup();
        }

        tracing::info!(
            dispatcher = %self.name,
            discarded = discarded.len(),
            "Dispatcher shut down"
        );
        drop(discarded);
        true
    }

    /// Spawn a drain task unless one is already scheduled
    fn schedule(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != DispatcherState::Active || inner.scheduled || inner.queue.is_empty() {
            return false;
        }
        let Some(runtime) = inner.runtime.clone() else {
            return false;
        };

        inner.scheduled = true;
        let drain = Drain {
            name: self.name.clone(),
            handler: self.handler.clone(),
            gate: self.gate.clone(),
            inner: self.inner.clone(),
        };
        inner.drain = Some(runtime.spawn(drain.run(self.cancel.clone())));
        tracing::debug!(dispatcher = %self.name, queued = inner.queue.len(), "Drain scheduled");
        true
    }
}

impl<T: Send + 'static> Drop for SerialWorkDispatcher<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock_inner<T>(inner: &Mutex<Inner<T>>) -> MutexGuard<'_, Inner<T>> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State moved into the drain task
struct Drain<T> {
    name: Arc<str>,
    handler: Arc<dyn WorkHandler<T>>,
    gate: Gate,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: Send + 'static> Drain<T> {
    async fn run(self, cancel: CancellationToken) {
        let mut handled = 0usize;
        loop {
            if cancel.is_cancelled() {
                return;
            }

            if !(self.gate)() && !self.reopen_after_close() {
                tracing::debug!(dispatcher = %self.name, handled, "Gate closed, drain paused");
                return;
            }

            let next = {
                let mut inner = lock_inner(&self.inner);
                if inner.state != DispatcherState::Active {
                    return;
                }
                let next = inner.queue.pop_front();
                if next.is_none() {
                    inner.scheduled = false;
                }
                next
            };
            let Some(item) = next else {
                tracing::debug!(dispatcher = %self.name, handled, "Queue drained");
                return;
            };

            let handling = AssertUnwindSafe(self.handler.handle(item)).catch_unwind();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(dispatcher = %self.name, "Handler cancelled by shutdown");
                    return;
                }
                outcome = handling => outcome,
            };
            handled += 1;

            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(dispatcher = %self.name, "Handler reported failure, item dropped");
                }
                Err(_) => {
                    tracing::error!(dispatcher = %self.name, "Handler panicked, item dropped");
                }
            }
        }
    }

    /// Give up the scheduled slot after the gate closed
    ///
    /// An offer racing with the closing gate sees the slot taken and does
    /// not schedule, so the gate is checked once more after releasing it.
    /// Returns true if this task reclaimed the slot and should keep going.
    fn reopen_after_close(&self) -> bool {
        lock_inner(&self.inner).scheduled = false;
        if !(self.gate)() {
            return false;
        }

        let mut inner = lock_inner(&self.inner);
        if inner.state != DispatcherState::Active || inner.scheduled || inner.queue.is_empty() {
            return false;
        }
        inner.scheduled = true;
        true
    }
}
