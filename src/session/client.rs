// Session orchestrator. Drives the connection through its states:
//
//   Connecting -> AwaitingHandshake -> CommandLoop -> Terminating
//
// The command loop runs as its own task so it can be raced against a
// termination signal; whichever fires first wins. On a signal the task is
// abandoned, not joined: the only external state needing guaranteed release
// is the socket and the lock file, and both are handled by the main flow's
// teardown.

use crate::session::config::Config;
use crate::session::error::ProtocolError;
use crate::session::protocol::{self, Command, OpenFrame};
use crate::session::registry::TokenRegistry;
use crate::session::sink;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Run one editing session for `target`. Returns Ok on a graceful close or
/// a termination signal; any protocol or I/O failure is an error. The
/// caller releases the instance lock after this returns.
pub async fn run_session(config: &Config, target: &Path) -> Result<()> {
    let target = std::path::absolute(target)
        .with_context(|| format!("failed to resolve {}", target.display()))?;

    let mut registry = TokenRegistry::new();
    let token = registry.register(&target);

    // Connecting. A user-facing client does not speculatively reconnect.
    let endpoint = format!("{}:{}", config.host, config.port);
    info!("connecting to {endpoint}");
    let stream = TcpStream::connect(&endpoint)
        .await
        .with_context(|| format!("failed to connect to editor at {endpoint}"))?;
    let (read_half, mut write_half) = stream.into_split();

    // AwaitingHandshake: send the open frame, then block for one line.
    let display_name = config.display_name.clone().unwrap_or_else(|| {
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| target.display().to_string())
    });
    let real_path = target.display().to_string();

    let mut file = tokio::fs::File::open(&target)
        .await
        .with_context(|| format!("failed to open {}", target.display()))?;
    let len = file
        .metadata()
        .await
        .with_context(|| format!("failed to stat {}", target.display()))?
        .len();

    info!("opening {} ({len} bytes, token {token})", target.display());
    let frame = OpenFrame {
        display_name: &display_name,
        real_path: &real_path,
        token: &token,
    };
    protocol::write_open(&mut write_half, &frame, config.layout, len, &mut file)
        .await
        .context("failed to send open frame")?;

    let mut reader = BufReader::new(read_half);
    let mut handshake = String::new();
    let n = reader
        .read_line(&mut handshake)
        .await
        .context("failed to read editor handshake")?;
    if n == 0 {
        bail!("editor closed the connection before the handshake");
    }
    info!("editor handshake: {}", handshake.trim());

    if config.wait || config.new_window || config.file_type.is_some() || config.line.is_some() {
        debug!("window/cursor options are accepted but not sent to the editor");
    }

    // CommandLoop: race the command task against a termination signal.
    let worker = tokio::spawn(command_loop(reader, registry));
    let outcome = tokio::select! {
        joined = worker => match joined {
            Ok(result) => result,
            Err(e) => Err(anyhow!("command loop task failed: {e}")),
        },
        _ = shutdown_signal() => {
            info!("termination signal received, shutting down");
            Ok(())
        }
    };

    // Terminating: close the connection first; the caller then releases the
    // lock. Cleanup failures are logged, never escalated.
    if let Err(e) = write_half.shutdown().await {
        warn!("failed to close connection: {e}");
    }
    outcome
}

/// Read command frames in arrival order until the editor closes the session
/// or an error occurs. Owns the read half and the token registry.
async fn command_loop<R>(mut reader: R, registry: TokenRegistry) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match protocol::read_command(&mut reader).await? {
            Command::Save { token, len } => {
                let dest = registry
                    .resolve(&token)
                    .ok_or_else(|| ProtocolError::UnknownToken {
                        token: token.clone(),
                    })?
                    .to_path_buf();
                sink::commit(len, &mut reader, &dest)
                    .await
                    .with_context(|| format!("failed to save {}", dest.display()))?;
                info!("saved {len} bytes to {}", dest.display());
            }
            Command::Close { token } => {
                debug!(
                    "editor closed the session{}",
                    token.map(|t| format!(" (token {t})")).unwrap_or_default()
                );
                return Ok(());
            }
            Command::Unknown(name) => {
                debug!("ignoring unrecognized command {name:?}");
            }
        }
    }
}

/// Completes when the process receives an interrupt or termination request.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let ctrl_c = tokio::signal::ctrl_c();
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
