//! Lifecycle event listeners
//!
//! Persistent multi-subscriber notifications for process error and exit
//! events, deliberately separate from the one-shot completion path in the
//! pending table. Registration is additive; only `dispose` clears the set.

use std::sync::{Arc, Mutex};

use crate::error::ChannelError;

type ErrorListener = Arc<dyn Fn(&ChannelError) + Send + Sync>;
type ExitListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerSet {
    error: Mutex<Vec<ErrorListener>>,
    exit: Mutex<Vec<ExitListener>>,
}

impl ListenerSet {
    pub fn on_error(&self, listener: impl Fn(&ChannelError) + Send + Sync + 'static) {
        self.error
            .lock()
            .expect("listener lock poisoned")
            .push(Arc::new(listener));
    }

    pub fn on_exit(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.exit
            .lock()
            .expect("listener lock poisoned")
            .push(Arc::new(listener));
    }

    pub fn fire_error(&self, error: &ChannelError) {
        // Snapshot under the lock, call outside it so listeners may touch the
        // channel again.
        let listeners: Vec<_> = self
            .error
            .lock()
            .expect("listener lock poisoned")
            .iter()
            .cloned()
            .collect();
        for listener in listeners {
            listener(error);
        }
    }

    pub fn fire_exit(&self) {
        let listeners: Vec<_> = self
            .exit
            .lock()
            .expect("listener lock poisoned")
            .iter()
            .cloned()
            .collect();
        for listener in listeners {
            listener();
        }
    }

    pub fn clear(&self) {
        self.error.lock().expect("listener lock poisoned").clear();
        self.exit.lock().expect("listener lock poisoned").clear();
    }
}
