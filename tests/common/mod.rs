//! Shared helpers for integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;

pub fn init_test(name: &str) {
    microthread::test_utils::init_test_logging();
    microthread::test_phase!(name);
}

/// Ordered event log shared between microthreads.
#[derive(Clone, Default)]
pub struct Trace<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Trace<T> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, event: T) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<T> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
