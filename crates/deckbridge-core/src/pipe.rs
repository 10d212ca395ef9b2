//! Listener for device events relayed through a named pipe.
//!
//! The device layer invokes the trampoline script on key-down, which writes
//! one pre-serialized JSON line into the pipe. This module owns the pipe's
//! lifecycle and forwards each line unchanged onto the outbound queue.

use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::sync::watch;

use crate::events::OutboundSender;

/// Back-off between reads while no writer is attached. Also bounds shutdown
/// latency.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Create the pipe at its well-known path. A pipe left behind by a previous
/// run is fine; any other failure aborts startup.
pub fn create(path: &Path) -> Result<(), anyhow::Error> {
    match mkfifo(path, Mode::from_bits_truncate(0o644)) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(err) => Err(anyhow!("failed to create pipe {}: {}", path.display(), err)),
    }
}

/// Read trampoline messages until `stop` fires, then remove the pipe.
///
/// Each read chunk is split on newlines and every non-empty trimmed line is
/// one complete message; the trampoline writes one line per invocation, so
/// partial lines across reads do not occur in practice.
pub async fn run(
    path: &Path,
    queue: OutboundSender,
    mut stop: watch::Receiver<bool>,
    read_buffer: usize,
) -> Result<(), anyhow::Error> {
    let mut receiver = pipe::OpenOptions::new().open_receiver(path)?;
    info!("Listening on pipe {}", path.display());

    let mut buf = vec![0u8; read_buffer.max(1)];
    let result = loop {
        tokio::select! {
            _ = stop.changed() => break Ok(()),
            read = receiver.read(&mut buf) => match read {
                // No writer attached right now; the trampoline opens the pipe
                // once per message.
                Ok(0) => tokio::time::sleep(POLL_INTERVAL).await,
                Ok(n) => {
                    for line in String::from_utf8_lossy(&buf[..n]).split('\n') {
                        let line = line.trim();
                        if !line.is_empty() {
                            debug!("Pipe message: {}", line);
                            queue.push(line.to_owned());
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => break Err(anyhow!("pipe read failed: {}", err)),
            },
        }
    };

    drop(receiver);
    if let Err(err) = std::fs::remove_file(path) {
        warn!("Failed to remove pipe {}: {}", path.display(), err);
    }
    info!("Pipe listener stopped");
    result
}
