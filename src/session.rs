//! Per-connection session state

/// State accumulated over one SMTP connection.
///
/// `helo_name` survives for the whole connection; `sender` and
/// `recipients` belong to the current mail transaction and are cleared
/// together. Recipients can only accumulate while a sender is set.
#[derive(Debug, Default)]
pub struct Session {
    pub helo_name: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the current transaction, keeping the HELO name.
    pub fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }

    /// True once MAIL has been accepted and not yet cleared.
    pub fn in_transaction(&self) -> bool {
        self.sender.is_some()
    }
}
