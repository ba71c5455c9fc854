use crate::object::AutomationObject;
use std::sync::Arc;
use tunebridge_core::BridgeResult;

/// Process-wide activation of the host's automation subsystem.
pub trait AutomationRuntime: Send + Sync {
    fn initialize(&self) -> BridgeResult<()>;

    fn uninitialize(&self);

    /// Create the top-level object registered under `prog_id`.
    fn create_object(&self, prog_id: &str) -> BridgeResult<Arc<dyn AutomationObject>>;
}

/// Keeps the runtime initialized for as long as it lives.
pub struct RuntimeSession {
    runtime: Arc<dyn AutomationRuntime>,
}

impl RuntimeSession {
    pub fn begin(runtime: Arc<dyn AutomationRuntime>) -> BridgeResult<Self> {
        runtime.initialize()?;
        tracing::debug!("automation runtime initialized");
        Ok(Self { runtime })
    }

    pub fn runtime(&self) -> &dyn AutomationRuntime {
        self.runtime.as_ref()
    }
}

impl Drop for RuntimeSession {
    fn drop(&mut self) {
        self.runtime.uninitialize();
        tracing::debug!("automation runtime uninitialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tunebridge_core::BridgeError;

    #[derive(Default)]
    struct CountingRuntime {
        fail: bool,
        initialized: AtomicUsize,
        uninitialized: AtomicUsize,
    }

    impl AutomationRuntime for CountingRuntime {
        fn initialize(&self) -> BridgeResult<()> {
            if self.fail {
                return Err(BridgeError::transport("runtime unavailable"));
            }
            self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn uninitialize(&self) {
            self.uninitialized.fetch_add(1, Ordering::SeqCst);
        }

        fn create_object(&self, prog_id: &str) -> BridgeResult<Arc<dyn AutomationObject>> {
            Err(BridgeError::not_found(prog_id))
        }
    }

    #[test]
    fn session_brackets_runtime() {
        let runtime = Arc::new(CountingRuntime::default());
        let session = RuntimeSession::begin(runtime.clone()).unwrap();
        assert_eq!(runtime.initialized.load(Ordering::SeqCst), 1);
        assert!(session.runtime().create_object("Missing.Application").is_err());
        drop(session);
        assert_eq!(runtime.uninitialized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_initialize_does_not_uninitialize() {
        let runtime = Arc::new(CountingRuntime {
            fail: true,
            ..Default::default()
        });
        assert!(RuntimeSession::begin(runtime.clone()).is_err());
        assert_eq!(runtime.uninitialized.load(Ordering::SeqCst), 0);
    }
}
