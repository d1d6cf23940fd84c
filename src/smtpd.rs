//! SMTP session engine
//!
//! One [`Smtpd`] drives one connection: it greets, reads command lines
//! through the bounded [`LineReader`], checks sequencing against the
//! [`Session`] state, runs the configured hooks, and answers on the wire.
//! Protocol violations get a numbered reply after a fixed throttle delay
//! and the loop keeps going; read-boundary and write failures end the
//! session as [`SessionError`]s without a goodbye.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time;

use crate::error::SessionError;
use crate::hooks::{BodySink, Hooks};
use crate::reader::LineReader;
use crate::session::Session;

/// Engine settings, applied to every connection served.
pub struct SmtpdConfig {
    /// Name announced in the greeting and the HELO reply.
    pub domain: String,
    /// Per-read idle timeout. Restarts on every read, so it bounds client
    /// silence, not session length.
    pub input_timeout: Duration,
    /// Maximum bytes buffered while no line terminator has arrived.
    pub line_length_limit: usize,
    /// Byte cap on a message body; `None` means unlimited.
    pub max_message_size: Option<usize>,
    /// Fixed delay before any 5xx reply is sent.
    pub error_interval: Duration,
    /// Spill message bodies to an unnamed temp file instead of memory.
    pub use_temporary_file: bool,
}

impl Default for SmtpdConfig {
    fn default() -> Self {
        Self {
            domain: "mocksmtpd".to_string(),
            input_timeout: Duration::from_secs(120),
            line_length_limit: 1024,
            max_message_size: None,
            error_interval: Duration::from_secs(5),
            use_temporary_file: false,
        }
    }
}

/// What the command loop should do after a handler ran.
enum Action {
    /// Send the reply and read the next command.
    Reply(String),
    /// Throttle, send the error reply, and read the next command.
    Reject(String),
    /// Send the farewell and end the session.
    Close(String),
}

/// The session engine. Stateless across connections; all per-connection
/// state lives on the stack of [`Smtpd::serve`].
pub struct Smtpd {
    config: SmtpdConfig,
    hooks: Hooks,
}

impl Smtpd {
    pub fn new(config: SmtpdConfig, hooks: Hooks) -> Self {
        Self { config, hooks }
    }

    pub fn config(&self) -> &SmtpdConfig {
        &self.config
    }

    /// Serve one connection until QUIT, EOF, or a fatal error.
    pub async fn serve<S>(&self, stream: S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = LineReader::new(
            read_half,
            self.config.input_timeout,
            self.config.line_length_limit,
        );
        let mut session = Session::new();

        send(
            &mut writer,
            &format!("220 {} service ready", self.config.domain),
        )
        .await?;

        while let Some(line) = reader.read_line().await? {
            let (verb, arg) = split_command(chomp(&line));
            let Some(verb) = verb else {
                // Blank lines draw no reply at all.
                continue;
            };
            let action = match verb.to_ascii_uppercase().as_str() {
                "HELO" | "EHLO" => self.comm_helo(arg, &mut session)?,
                "MAIL" => self.comm_mail(arg, &mut session)?,
                "RCPT" => self.comm_rcpt(arg, &mut session)?,
                "DATA" => {
                    self.comm_data(arg, &mut session, &mut reader, &mut writer)
                        .await?
                }
                "RSET" => self.comm_rset(arg, &mut session)?,
                "NOOP" => self.comm_noop(arg, &session)?,
                "QUIT" => self.comm_quit(arg, &session)?,
                _ => Action::Reject("502 Error: command not implemented".to_string()),
            };
            match action {
                Action::Reply(msg) => send(&mut writer, &msg).await?,
                Action::Reject(msg) => {
                    self.throttle().await;
                    send(&mut writer, &msg).await?;
                }
                Action::Close(msg) => {
                    send(&mut writer, &msg).await?;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn comm_helo(&self, arg: Option<&str>, session: &mut Session) -> Result<Action, SessionError> {
        let mut tokens = arg.unwrap_or("").split_whitespace();
        let name = match (tokens.next(), tokens.next()) {
            (Some(name), None) => name,
            _ => return Ok(Action::Reject("501 Syntax: HELO hostname".to_string())),
        };
        if let Some(hook) = &self.hooks.helo {
            hook(name)?;
        }
        session.helo_name = Some(name.to_string());
        Ok(Action::Reply(format!("250 {}", self.config.domain)))
    }

    fn comm_mail(&self, arg: Option<&str>, session: &mut Session) -> Result<Action, SessionError> {
        if session.in_transaction() {
            return Ok(Action::Reject("503 Error: nested MAIL command".to_string()));
        }
        let sender = arg
            .and_then(|a| strip_prefix_ci(a, "FROM:"))
            .and_then(parse_addr);
        let Some(sender) = sender else {
            return Ok(Action::Reject(
                "501 Syntax: MAIL FROM: <address>".to_string(),
            ));
        };
        if let Some(hook) = &self.hooks.mail {
            hook(&sender)?;
        }
        session.sender = Some(sender);
        Ok(Action::Reply("250 Ok".to_string()))
    }

    fn comm_rcpt(&self, arg: Option<&str>, session: &mut Session) -> Result<Action, SessionError> {
        if !session.in_transaction() {
            return Ok(Action::Reject("503 Error: need MAIL command".to_string()));
        }
        let rcpt = arg
            .and_then(|a| strip_prefix_ci(a, "TO:"))
            .and_then(parse_addr);
        let Some(rcpt) = rcpt else {
            return Ok(Action::Reject("501 Syntax: RCPT TO: <address>".to_string()));
        };
        if let Some(hook) = &self.hooks.rcpt {
            hook(&rcpt)?;
        }
        session.recipients.push(rcpt);
        Ok(Action::Reply("250 Ok".to_string()))
    }

    /// The DATA sub-protocol: collect body lines until the lone-dot
    /// terminator, unstuffing leading dots and enforcing the size cap.
    async fn comm_data<R, W>(
        &self,
        arg: Option<&str>,
        session: &mut Session,
        reader: &mut LineReader<R>,
        writer: &mut W,
    ) -> Result<Action, SessionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if session.recipients.is_empty() {
            return Ok(Action::Reject("503 Error: need RCPT command".to_string()));
        }
        if arg.is_some() {
            return Ok(Action::Reject("501 Syntax: DATA".to_string()));
        }

        send(writer, "354 End data with <CR><LF>.<CR><LF>").await?;

        // Only accumulate when someone will receive the result.
        let mut sink = match &self.hooks.data {
            Some(_) => Some(BodySink::new(self.config.use_temporary_file)?),
            None => None,
        };
        let mut size = 0usize;
        loop {
            let Some(mut line) = reader.read_line().await? else {
                return Err(SessionError::UnexpectedEof);
            };
            if chomp(&line) == "." {
                break;
            }
            if line.starts_with('.') {
                line.remove(0);
            }
            size += line.len();
            if let Some(max) = self.config.max_message_size {
                if size > max {
                    // Partial body is dropped with the sink; the open
                    // transaction stays as it was.
                    return Ok(Action::Reject("552 Error: message too large".to_string()));
                }
            }
            if let Some(hook) = &self.hooks.data_line {
                hook(&line)?;
            }
            if let Some(sink) = sink.as_mut() {
                sink.push(&line)?;
            }
        }

        if let (Some(hook), Some(sink)) = (&self.hooks.data, sink.take()) {
            let body = sink.finish()?;
            hook(
                body,
                session.sender.as_deref().unwrap_or(""),
                &session.recipients,
            )?;
        }
        session.reset();
        Ok(Action::Reply("250 Ok".to_string()))
    }

    fn comm_rset(&self, arg: Option<&str>, session: &mut Session) -> Result<Action, SessionError> {
        if arg.is_some() {
            return Ok(Action::Reject("501 Syntax: RSET".to_string()));
        }
        if let Some(hook) = &self.hooks.rset {
            hook(session.sender.as_deref(), &session.recipients)?;
        }
        session.reset();
        Ok(Action::Reply("250 Ok".to_string()))
    }

    fn comm_noop(&self, arg: Option<&str>, session: &Session) -> Result<Action, SessionError> {
        if arg.is_some() {
            return Ok(Action::Reject("501 Syntax: NOOP".to_string()));
        }
        if let Some(hook) = &self.hooks.noop {
            hook(session.sender.as_deref(), &session.recipients)?;
        }
        Ok(Action::Reply("250 Ok".to_string()))
    }

    fn comm_quit(&self, arg: Option<&str>, session: &Session) -> Result<Action, SessionError> {
        if arg.is_some() {
            return Ok(Action::Reject("501 Syntax: QUIT".to_string()));
        }
        if let Some(hook) = &self.hooks.quit {
            hook(session.sender.as_deref(), &session.recipients)?;
        }
        Ok(Action::Close("221 Bye".to_string()))
    }

    async fn throttle(&self) {
        if !self.config.error_interval.is_zero() {
            time::sleep(self.config.error_interval).await;
        }
    }
}

async fn send<W>(writer: &mut W, msg: &str) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{msg}\r\n").as_bytes())
        .await
        .map_err(|e| SessionError::Reply {
            reply: msg.to_string(),
            source: e,
        })
}

/// Strip one trailing `\r\n` or `\n`.
fn chomp(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Split a command line at the first whitespace run: verb plus raw rest.
///
/// An empty line has no verb. A line starting with whitespace yields an
/// empty verb, which dispatch answers with 502 like any unknown command.
fn split_command(line: &str) -> (Option<&str>, Option<&str>) {
    if line.is_empty() {
        return (None, None);
    }
    let mut parts = line.splitn(2, |c: char| c.is_ascii_whitespace());
    let verb = parts.next();
    let arg = parts.next().map(str::trim_start);
    (verb, arg)
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Extract a mail address from the text after `FROM:`/`TO:`.
///
/// Angle-bracket form keeps everything between the brackets with interior
/// whitespace removed; a bare address must be a single token. `None` means
/// unparseable.
fn parse_addr(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(inner) = s.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
        return Some(inner.chars().filter(|c| !c.is_whitespace()).collect());
    }
    if s.contains(char::is_whitespace) {
        return None;
    }
    Some(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_addr_bracketed() {
        assert_eq!(parse_addr("<a@example.com>").as_deref(), Some("a@example.com"));
        assert_eq!(parse_addr("  <a@example.com>  ").as_deref(), Some("a@example.com"));
    }

    #[test]
    fn parse_addr_strips_whitespace_inside_brackets() {
        assert_eq!(parse_addr("< a @ example.com >").as_deref(), Some("a@example.com"));
    }

    #[test]
    fn parse_addr_null_sender() {
        assert_eq!(parse_addr("<>").as_deref(), Some(""));
    }

    #[test]
    fn parse_addr_bare_token() {
        assert_eq!(parse_addr("a@example.com").as_deref(), Some("a@example.com"));
    }

    #[test]
    fn parse_addr_rejects_bare_with_spaces() {
        assert_eq!(parse_addr("a b@example.com"), None);
    }

    #[test]
    fn parse_addr_rejects_empty() {
        assert_eq!(parse_addr(""), None);
        assert_eq!(parse_addr("   "), None);
    }

    #[test]
    fn split_command_two_tokens_max() {
        assert_eq!(split_command("MAIL FROM:<a@b> X=1"), (Some("MAIL"), Some("FROM:<a@b> X=1")));
        assert_eq!(split_command("NOOP"), (Some("NOOP"), None));
        assert_eq!(split_command(""), (None, None));
    }

    #[test]
    fn split_command_collapses_separating_whitespace() {
        assert_eq!(split_command("MAIL   FROM:<a@b>"), (Some("MAIL"), Some("FROM:<a@b>")));
    }

    #[test]
    fn split_command_leading_whitespace_gives_empty_verb() {
        let (verb, _) = split_command(" HELO x");
        assert_eq!(verb, Some(""));
    }

    #[test]
    fn chomp_strips_one_terminator() {
        assert_eq!(chomp("DATA\r\n"), "DATA");
        assert_eq!(chomp("DATA\n"), "DATA");
        assert_eq!(chomp("DATA"), "DATA");
        assert_eq!(chomp(".\r\n"), ".");
    }

    #[test]
    fn strip_prefix_ci_matches_any_case() {
        assert_eq!(strip_prefix_ci("FROM:<a@b>", "FROM:"), Some("<a@b>"));
        assert_eq!(strip_prefix_ci("from:<a@b>", "FROM:"), Some("<a@b>"));
        assert_eq!(strip_prefix_ci("FROG:<a@b>", "FROM:"), None);
        assert_eq!(strip_prefix_ci("FR", "FROM:"), None);
    }
}
