//! # mocksmtpd
//!
//! A mock SMTP server: it speaks enough of the protocol to accept mail
//! from a real client, then hands each fully received message to whatever
//! hooks the host installed. The bundled binary renders messages into a
//! static HTML inbox for eyeballing what an application would have sent.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use mocksmtpd::{Hooks, MailBody, SessionError, SmtpServer, Smtpd, SmtpdConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let mut hooks = Hooks::new();
//!     hooks.data = Some(Box::new(|body: MailBody, sender: &str, _: &[String]| {
//!         println!("mail from {sender}:\n{}", body.into_string()?);
//!         Ok(())
//!     }));
//!
//!     let config = SmtpdConfig {
//!         domain: "mail.example.com".to_string(),
//!         error_interval: Duration::from_secs(1),
//!         ..SmtpdConfig::default()
//!     };
//!     SmtpServer::new(Smtpd::new(config, hooks))
//!         .run("127.0.0.1:2525")
//!         .await
//! }
//! ```
//!
//! ## Supported SMTP commands
//!
//! `HELO`/`EHLO`, `MAIL FROM`, `RCPT TO` (multiple recipients), `DATA`
//! (with dot-unstuffing and an optional size cap), `RSET`, `NOOP`, `QUIT`.
//!
//! ## Notes
//!
//! - Sessions are independent; one task per connection.
//! - Reads are bounded by a per-read idle timeout and a line length limit;
//!   a client that stalls or floods gets disconnected, never buffered
//!   without limit.
//! - Error replies are throttled by a fixed delay to slow down abusive
//!   clients.
//! - No AUTH, no TLS, no relaying. This server exists to be sent to, not
//!   to deliver anything.

pub mod daemon;
pub mod error;
pub mod hooks;
pub mod inbox;
pub mod reader;
pub mod server;
pub mod session;
pub mod smtpd;
pub mod utils;

pub use error::SessionError;
pub use hooks::{Hooks, MailBody};
pub use inbox::Inbox;
pub use reader::LineReader;
pub use server::SmtpServer;
pub use session::Session;
pub use smtpd::{Smtpd, SmtpdConfig};
pub use utils::Logger;
