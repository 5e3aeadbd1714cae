use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct Shared {
    active: AtomicBool,
    last_key: Mutex<Option<char>>,
    valid_keys: Vec<char>,
}

/// One-slot response register filled from the key capture thread.
///
/// Only the most recent valid key pressed while the listener is active is
/// kept; presses while inactive are dropped rather than queued. Cloning gives
/// another handle to the same register.
#[derive(Clone)]
pub struct ResponseListener {
    shared: Arc<Shared>,
}

impl ResponseListener {
    pub fn new(valid_keys: impl IntoIterator<Item = char>) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                last_key: Mutex::new(None),
                valid_keys: valid_keys.into_iter().collect(),
            }),
        }
    }

    /// Capture-side callback.
    pub fn on_press(&self, key: char) {
        if !self.shared.valid_keys.contains(&key) {
            return;
        }
        let mut slot = self.slot();
        if self.is_active() {
            *slot = Some(key);
        }
    }

    /// Toggles the window. Either edge empties the slot, and the flag only
    /// changes under the slot lock so a press cannot land across the edge.
    pub fn set_active(&self, active: bool) {
        let mut slot = self.slot();
        self.shared.active.store(active, Ordering::SeqCst);
        slot.take();
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Get-and-clear.
    pub fn take_response(&self) -> Option<char> {
        self.slot().take()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<char>> {
        self.shared
            .last_key
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}
