//! Lifecycle management for backend-owned objects.
//!
//! Every object the host hands out (track, playlist, artwork, collection) is
//! wrapped in a [`Handle`]. Work against the object happens inside an
//! [`OperationGuard`] bracket; [`Handle::close`] cancels producers rooted at
//! the handle, waits for every open bracket (including child handles) to end,
//! releases the backend object, and finally returns the parent's bracket.

use crate::cancel::CancelToken;
use crate::error::{BridgeError, BridgeResult};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// A backend reference that must be released explicitly.
pub trait Resource: Send + Sync + 'static {
    /// Release the backend reference. Called at most once per handle.
    fn release(&self) -> BridgeResult<()>;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
struct Lifecycle {
    pending: usize,
    phase: Phase,
}

struct HandleInner {
    label: String,
    state: Mutex<Lifecycle>,
    changed: Condvar,
    cancel: CancelToken,
    resource: Mutex<Option<Arc<dyn Resource>>>,
    parent: Option<Handle>,
}

/// Shared reference to one backend object's lifecycle state.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("Handle")
            .field("label", &self.inner.label)
            .field("pending", &state.pending)
            .field("phase", &state.phase)
            .field("has_parent", &self.inner.parent.is_some())
            .finish_non_exhaustive()
    }
}

impl HandleInner {
    fn lock_state(&self) -> MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Lifecycle>) -> MutexGuard<'a, Lifecycle> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Handle {
    /// Wrap a backend object. `resource` is `None` for objects addressed only
    /// by identifier.
    pub fn new(label: impl Into<String>, resource: Option<Arc<dyn Resource>>) -> Self {
        Self::build(label.into(), resource, None)
    }

    /// A handle with no backend reference to release.
    pub fn detached(label: impl Into<String>) -> Self {
        Self::new(label, None)
    }

    fn build(label: String, resource: Option<Arc<dyn Resource>>, parent: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                label,
                state: Mutex::new(Lifecycle {
                    pending: 0,
                    phase: Phase::Open,
                }),
                changed: Condvar::new(),
                cancel: CancelToken::new(),
                resource: Mutex::new(resource),
                parent,
            }),
        }
    }

    /// Create a handle owned by this one. The parent counts the child as one
    /// pending operation until the child has fully closed.
    pub fn spawn_child(
        &self,
        label: impl Into<String>,
        resource: Option<Arc<dyn Resource>>,
    ) -> BridgeResult<Handle> {
        self.begin_operation()?;
        Ok(Self::build(label.into(), resource, Some(self.clone())))
    }

    /// Open an operation bracket. The bracket ends when the guard drops.
    pub fn acquire(&self) -> BridgeResult<OperationGuard> {
        self.begin_operation()?;
        Ok(OperationGuard {
            handle: self.clone(),
        })
    }

    fn begin_operation(&self) -> BridgeResult<()> {
        let mut state = self.inner.lock_state();
        if state.phase != Phase::Open {
            return Err(BridgeError::Closed {
                label: self.inner.label.clone(),
            });
        }
        state.pending += 1;
        Ok(())
    }

    fn finish_operation(&self) {
        let mut state = self.inner.lock_state();
        debug_assert!(state.pending > 0, "unbalanced operation on {}", self.inner.label);
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.inner.changed.notify_all();
        }
    }

    /// Cancel producers, wait for pending work, release the backend object and
    /// notify the parent. Safe to call more than once.
    pub fn close(&self) {
        {
            let mut state = self.inner.lock_state();
            match state.phase {
                Phase::Closed => return,
                Phase::Closing => {
                    while state.phase != Phase::Closed {
                        state = self.inner.wait(state);
                    }
                    return;
                }
                Phase::Open => state.phase = Phase::Closing,
            }
        }

        self.inner.cancel.cancel();

        {
            let mut state = self.inner.lock_state();
            if state.pending > 0 {
                tracing::debug!(
                    handle = %self.inner.label,
                    pending = state.pending,
                    "waiting for pending operations before release"
                );
            }
            while state.pending > 0 {
                state = self.inner.wait(state);
            }
        }

        let resource = self
            .inner
            .resource
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(resource) = resource {
            if let Err(err) = resource.release() {
                tracing::warn!(
                    handle = %self.inner.label,
                    error = %err,
                    "backend release failed"
                );
            }
        }

        if let Some(parent) = &self.inner.parent {
            parent.finish_operation();
        }

        let mut state = self.inner.lock_state();
        state.phase = Phase::Closed;
        self.inner.changed.notify_all();
        tracing::trace!(handle = %self.inner.label, "handle closed");
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Number of open brackets, counting live child handles.
    pub fn pending(&self) -> usize {
        self.inner.lock_state().pending
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().phase == Phase::Closed
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    pub fn parent(&self) -> Option<&Handle> {
        self.inner.parent.as_ref()
    }
}

/// An open operation bracket on a [`Handle`].
#[must_use = "the bracket ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct OperationGuard {
    handle: Handle,
}

impl OperationGuard {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The backend object, available for as long as the bracket is open.
    pub fn resource(&self) -> Option<Arc<dyn Resource>> {
        self.handle
            .inner
            .resource
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}
