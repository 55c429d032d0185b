//! Generic `ColorSender` trait for devices that accept a color/gate code.

use std::sync::{Arc, Mutex};

use keyslot_types::KeyslotError;

/// A device that accepts one color code at a time.
pub trait ColorSender: Send {
    /// Stable identifier for this sender, e.g. `"/dev/ttyUSB0"`.
    fn id(&self) -> &str;

    /// Deliver `code` to the device.
    ///
    /// # Errors
    ///
    /// Returns [`KeyslotError::Transport`] if the code could not be written.
    fn send_color(&mut self, code: &str) -> Result<(), KeyslotError>;
}

/// Keeps every sent code in memory.  Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<String>>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codes sent so far, oldest first.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ColorSender for RecordingSender {
    fn id(&self) -> &str {
        "recording"
    }

    fn send_color(&mut self, code: &str) -> Result<(), KeyslotError> {
        self.sent
            .lock()
            .map_err(|_| KeyslotError::Internal("recording sender lock poisoned".into()))?
            .push(code.to_string());
        Ok(())
    }
}
