use parking_lot::RwLock;

/// The agent handle stamped on outgoing messages. Last write wins; nothing
/// outlives the process.
#[derive(Debug, Default)]
pub struct SessionState {
    handle: RwLock<Option<String>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the handle. No validation: empty and arbitrary strings are accepted.
    pub fn set_handle(&self, handle: impl Into<String>) {
        *self.handle.write() = Some(handle.into());
    }

    /// Current handle, or `None` when unset.
    pub fn handle(&self) -> Option<String> {
        self.handle.read().clone()
    }
}
