//! Per-connection accept loop
//!
//! Binds a listener and hands each accepted connection to its own task
//! running [`Smtpd::serve`]. Sessions are independent; one failing never
//! disturbs the accept loop or its siblings.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::error::SessionError;
use crate::smtpd::Smtpd;

pub struct SmtpServer {
    smtpd: Arc<Smtpd>,
}

impl SmtpServer {
    pub fn new(smtpd: Smtpd) -> Self {
        Self {
            smtpd: Arc::new(smtpd),
        }
    }

    /// Bind `addr` and serve until the process ends.
    pub async fn run(&self, addr: &str) -> Result<(), SessionError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, std::future::pending()).await
    }

    /// Serve on a pre-bound listener until the process ends.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), SessionError> {
        self.serve_on(listener, std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then stop accepting and return.
    /// Sessions already in flight run to completion on their own tasks.
    pub async fn run_until(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), SessionError> {
        self.serve_on(listener, shutdown).await
    }

    async fn serve_on(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), SessionError> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => return Ok(()),
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let smtpd = self.smtpd.clone();
                            tokio::spawn(async move {
                                match smtpd.serve(stream).await {
                                    Ok(()) => {}
                                    Err(e) if e.is_disconnect() => {
                                        eprintln!("session {peer}: {e}");
                                    }
                                    Err(e) => {
                                        eprintln!("session {peer} aborted: {e}");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            eprintln!("error accepting connection: {e}");
                        }
                    }
                }
            }
        }
    }
}
