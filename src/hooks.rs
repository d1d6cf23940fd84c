//! Lifecycle hooks and message body accumulation
//!
//! Every protocol milestone can notify an externally supplied callback.
//! All hooks are optional; an absent hook is simply skipped. A hook
//! returning `Err` is not turned into a protocol reply - it aborts the
//! session as a fatal error, so hooks own their own failure policy.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

pub type HookResult = anyhow::Result<()>;

/// Hook taking one protocol string (HELO name, address, or data line).
pub type TextHook = Box<dyn Fn(&str) -> HookResult + Send + Sync>;

/// Hook receiving the current transaction snapshot: sender and recipients.
pub type EnvelopeHook = Box<dyn Fn(Option<&str>, &[String]) -> HookResult + Send + Sync>;

/// Hook receiving a completed message: body, sender, recipients.
pub type DataHook = Box<dyn Fn(MailBody, &str, &[String]) -> HookResult + Send + Sync>;

/// One optional callback per lifecycle event.
///
/// `data_line` sees each body line after dot-unstuffing, terminator
/// included; `data` fires exactly once per cleanly terminated message,
/// before the transaction is cleared.
#[derive(Default)]
pub struct Hooks {
    pub helo: Option<TextHook>,
    pub mail: Option<TextHook>,
    pub rcpt: Option<TextHook>,
    pub data: Option<DataHook>,
    pub data_line: Option<TextHook>,
    pub rset: Option<EnvelopeHook>,
    pub noop: Option<EnvelopeHook>,
    pub quit: Option<EnvelopeHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A received message body, as handed to the data-complete hook.
///
/// Where it lives depends on the engine's `use_temporary_file` setting;
/// either way the content is the same dot-unstuffed line sequence with
/// line endings as the client sent them.
pub enum MailBody {
    Memory(String),
    File(File),
}

impl MailBody {
    /// Consume the body and return its full text.
    pub fn into_string(self) -> std::io::Result<String> {
        match self {
            MailBody::Memory(s) => Ok(s),
            MailBody::File(mut f) => {
                let mut s = String::new();
                f.read_to_string(&mut s)?;
                Ok(s)
            }
        }
    }
}

/// Accumulation target for the DATA phase.
///
/// The temp file is unnamed and vanishes when dropped, so an aborted
/// transfer leaves nothing behind.
pub(crate) enum BodySink {
    Memory(String),
    File(File),
}

impl BodySink {
    pub(crate) fn new(use_temporary_file: bool) -> std::io::Result<Self> {
        if use_temporary_file {
            Ok(BodySink::File(tempfile::tempfile()?))
        } else {
            Ok(BodySink::Memory(String::new()))
        }
    }

    pub(crate) fn push(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            BodySink::Memory(s) => {
                s.push_str(line);
                Ok(())
            }
            BodySink::File(f) => f.write_all(line.as_bytes()),
        }
    }

    /// Rewind and hand over the accumulated body.
    pub(crate) fn finish(self) -> std::io::Result<MailBody> {
        match self {
            BodySink::Memory(s) => Ok(MailBody::Memory(s)),
            BodySink::File(mut f) => {
                f.seek(SeekFrom::Start(0))?;
                Ok(MailBody::File(f))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_round_trip() {
        let mut sink = BodySink::new(false).unwrap();
        sink.push("Subject: hi\n").unwrap();
        sink.push("\n").unwrap();
        sink.push("body\n").unwrap();
        let body = sink.finish().unwrap();
        assert_eq!(body.into_string().unwrap(), "Subject: hi\n\nbody\n");
    }

    #[test]
    fn file_sink_round_trip() {
        let mut sink = BodySink::new(true).unwrap();
        sink.push("Subject: hi\r\n").unwrap();
        sink.push("body\r\n").unwrap();
        let body = sink.finish().unwrap();
        assert_eq!(body.into_string().unwrap(), "Subject: hi\r\nbody\r\n");
    }

    #[test]
    fn hooks_default_to_absent() {
        let hooks = Hooks::new();
        assert!(hooks.helo.is_none());
        assert!(hooks.data.is_none());
        assert!(hooks.quit.is_none());
    }
}
