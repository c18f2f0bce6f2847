//! Fan-out of module-updated and archive-rejected events.

use std::sync::{Arc, Mutex};

use module_core::RevisionTag;

use crate::linkage::LinkageContext;

#[derive(Clone)]
pub struct ModuleRecord {
    pub name: String,
    pub revision: RevisionTag,
    pub linkage: Arc<LinkageContext>,
    pub creation_time_millis: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidName,
    MalformedDescriptor,
    ArchiveIoException,
    NoCompiler,
    CompileFailure,
    LinkageFailure,
    HigherRevisionAvailable,
    HashMismatch,
}

#[derive(Clone)]
pub enum LoaderEvent {
    ModuleUpdated {
        new: Option<ModuleRecord>,
        old: Option<ModuleRecord>,
    },
    ArchiveRejected {
        module_name: String,
        reason: RejectReason,
        cause: Option<String>,
    },
}

pub trait Listener: Send + Sync {
    fn on_event(&self, event: &LoaderEvent);
}

/// Copy-on-write set of listeners; delivery is synchronous on the caller's
/// thread, which for [`crate::ModuleLoader`] is always the thread holding
/// its mutex.
#[derive(Default)]
pub struct ListenerBus {
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn Listener>) {
        let mut guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        let mut next = guard.clone();
        next.push(listener);
        *guard = next;
    }

    pub fn publish(&self, event: LoaderEvent) {
        let snapshot = self
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for listener in &snapshot {
            listener.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl Listener for Counter {
        fn on_event(&self, _event: &LoaderEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn delivers_to_every_registered_listener() {
        let bus = ListenerBus::new();
        let a = Arc::new(Counter(AtomicUsize::new(0)));
        let b = Arc::new(Counter(AtomicUsize::new(0)));
        bus.add(a.clone());
        bus.add(b.clone());

        bus.publish(LoaderEvent::ArchiveRejected {
            module_name: "x".into(),
            reason: RejectReason::CompileFailure,
            cause: None,
        });

        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }
}
