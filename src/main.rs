use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use structopt::StructOpt;

use mocksmtpd::daemon;
use mocksmtpd::{Hooks, Inbox, Logger, MailBody, SmtpServer, Smtpd, SmtpdConfig};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "mocksmtpd",
    about = "A mock SMTP server that renders received mail into an HTML inbox"
)]
struct Opt {
    /// Run as daemon
    #[structopt(short = "d", long = "daemon")]
    daemon: bool,

    /// Listening port
    #[structopt(short = "p", long = "port", default_value = "25")]
    port: u16,

    /// Listening address
    #[structopt(short = "a", long = "address", default_value = "0.0.0.0")]
    address: String,

    /// Server name announced in the greeting and HELO reply
    #[structopt(long = "server-name", default_value = "mocksmtpd")]
    server_name: String,

    /// Directory received mail is rendered into
    #[structopt(long = "inbox", default_value = "inbox", parse(from_os_str))]
    inbox: PathBuf,

    /// Log file path (recommended with --daemon, where stdout is detached)
    #[structopt(long = "logs", parse(from_os_str))]
    log_file: Option<PathBuf>,

    /// Pid file used by daemon mode and the stop command
    #[structopt(
        long = "pid-file",
        default_value = "/tmp/mocksmtpd.pid",
        parse(from_os_str)
    )]
    pid_file: PathBuf,

    /// Seconds a client may stay silent before the session is dropped
    #[structopt(long = "timeout", default_value = "120")]
    timeout: u64,

    /// Maximum bytes buffered while waiting for a line terminator
    #[structopt(long = "line-limit", default_value = "1024")]
    line_limit: usize,

    /// Maximum message size in bytes (unlimited when absent)
    #[structopt(long = "max-size")]
    max_size: Option<usize>,

    /// Seconds to wait before answering a protocol error
    #[structopt(long = "error-interval", default_value = "5")]
    error_interval: u64,

    /// Spill message bodies to a temporary file instead of memory
    #[structopt(long = "use-file")]
    use_file: bool,

    /// Control command: "stop" terminates a running daemon
    #[structopt(name = "COMMAND")]
    command: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    if let Some(command) = opt.command.as_deref() {
        if command != "stop" {
            anyhow::bail!("unknown command: {command}");
        }
        daemon::stop(&opt.pid_file)?;
        println!("stop signal sent");
        return Ok(());
    }

    // Fork before the runtime exists; a tokio runtime does not survive one.
    if opt.daemon {
        daemon::daemonize(&opt.pid_file)?;
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let result = runtime.block_on(run(&opt));
    if opt.daemon {
        daemon::remove_pid_file(&opt.pid_file);
    }
    result
}

async fn run(opt: &Opt) -> anyhow::Result<()> {
    let logger = Arc::new(Logger::new(opt.log_file.clone())?);
    let inbox = Arc::new(Inbox::new(opt.inbox.clone()));
    inbox.ensure_created()?;

    let mut hooks = Hooks::new();
    {
        let logger = Arc::clone(&logger);
        let inbox = Arc::clone(&inbox);
        hooks.data = Some(Box::new(move |body: MailBody, sender: &str, recipients: &[String]| {
            logger.log(&format!("mail received from {sender}"));
            let source = body.into_string()?;
            let path = inbox.save(&source, sender, recipients)?;
            logger.log(&format!("mail rendered to {}", path.display()));
            Ok(())
        }));
    }

    let config = SmtpdConfig {
        domain: opt.server_name.clone(),
        input_timeout: Duration::from_secs(opt.timeout),
        line_length_limit: opt.line_limit,
        max_message_size: opt.max_size,
        error_interval: Duration::from_secs(opt.error_interval),
        use_temporary_file: opt.use_file,
    };
    let server = SmtpServer::new(Smtpd::new(config, hooks));

    let addr = format!("{}:{}", opt.address, opt.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    logger.log(&format!("{} listening on {addr}", opt.server_name));
    logger.log(&format!("inbox directory: {}", inbox.dir().display()));

    server.run_until(listener, shutdown_signal()).await?;
    logger.log("shutting down");
    Ok(())
}

/// Resolves on SIGINT from a terminal or SIGTERM from `mocksmtpd stop`.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
