use std::io;
use std::sync::{Arc, Mutex};

/// External marker line (parallel-port style). Codes are held until `lower`.
pub trait TriggerLine {
    fn raise(&mut self, code: u16) -> io::Result<()>;
    fn lower(&mut self) -> io::Result<()>;
}

/// Marker line with no hardware behind it. Raised codes are traced and kept so
/// a clone can inspect them.
#[derive(Clone, Default)]
pub struct NullTrigger {
    raised: Arc<Mutex<Vec<u16>>>,
}

impl NullTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raised(&self) -> Vec<u16> {
        self.raised.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TriggerLine for NullTrigger {
    fn raise(&mut self, code: u16) -> io::Result<()> {
        tracing::trace!(code, "trigger raised");
        self.raised
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(code);
        Ok(())
    }

    fn lower(&mut self) -> io::Result<()> {
        tracing::trace!("trigger lowered");
        Ok(())
    }
}
