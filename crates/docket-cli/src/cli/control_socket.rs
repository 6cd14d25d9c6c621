//! Control socket: server (during `docket run`) and client (for `docket cancel`).
//! Protocol: one line per command: "cancel <id>".
//!
//! The first `docket run` binds the default path. Further runs against the same
//! state dir find it answering and bind `control-<pid>.sock` beside it; the
//! client sends to every control socket in the directory.

use anyhow::Result;
use docket_core::executor::JobControl;
use docket_core::tracker::JobId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

fn parse_cancel(line: &str) -> Option<JobId> {
    line.trim().strip_prefix("cancel ")?.trim().parse().ok()
}

/// `control.sock` -> `control-<pid>.sock` in the same directory.
fn per_process_path(default: &Path, pid: u32) -> PathBuf {
    let stem = default
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("control");
    default.with_file_name(format!("{stem}-{pid}.sock"))
}

/// Whether `name` is the default socket file or a per-process sibling of it.
fn is_control_socket(default: &Path, name: &str) -> bool {
    let Some(stem) = default.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let Some(rest) = name.strip_prefix(stem) else {
        return false;
    };
    rest == ".sock"
        || rest
            .strip_prefix('-')
            .and_then(|r| r.strip_suffix(".sock"))
            .is_some_and(|pid| !pid.is_empty() && pid.bytes().all(|b| b.is_ascii_digit()))
}

/// A bound control socket. [`ControlListener::shutdown`] stops it and removes its file.
pub struct ControlListener {
    path: PathBuf,
    handle: JoinHandle<()>,
}

impl ControlListener {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shutdown(self) {
        self.handle.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Listens for "cancel <id>" lines and calls `job_control.request_cancel(id)`
/// for each. Malformed lines are ignored.
///
/// Binds `default` unless another live run already listens there, in which
/// case a per-process socket next to it is used. Only a socket nobody answers
/// on is removed.
pub async fn spawn_control_listener(
    job_control: Arc<JobControl>,
    default: impl AsRef<Path>,
) -> Result<ControlListener> {
    let default = default.as_ref();
    if let Some(dir) = default.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let path = if UnixStream::connect(default).await.is_ok() {
        per_process_path(default, std::process::id())
    } else {
        default.to_path_buf()
    };
    // Left behind by a run that exited without cleaning up (or a reused pid).
    if path.exists() && UnixStream::connect(&path).await.is_err() {
        let _ = std::fs::remove_file(&path);
    }
    let listener = UnixListener::bind(&path)?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let control = Arc::clone(&job_control);
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            if let Some(id) = parse_cancel(&line) {
                                let running = control.request_cancel(id);
                                tracing::info!(job_id = id, running, "cancel requested over control socket");
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(ControlListener { path, handle })
}

/// Sends "cancel <job_id>\n" to the control socket. No-op if the path does not exist.
pub async fn send_cancel(socket_path: &Path, job_id: JobId) -> Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }
    let mut stream = UnixStream::connect(socket_path).await?;
    let msg = format!("cancel {}\n", job_id);
    tokio::io::AsyncWriteExt::write_all(&mut stream, msg.as_bytes()).await?;
    Ok(())
}

/// Sends the cancel to every run listening beside `default`. Returns how many
/// sockets took it; dead sockets are skipped.
pub async fn send_cancel_all(default: &Path, job_id: JobId) -> Result<usize> {
    let Some(dir) = default.parent() else {
        return Ok(0);
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut delivered = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_str().is_some_and(|n| is_control_socket(default, n)) {
            continue;
        }
        let path = entry.path();
        match send_cancel(&path, job_id).await {
            Ok(()) => delivered += 1,
            Err(e) => tracing::debug!(path = %path.display(), "control socket send: {}", e),
        }
    }
    Ok(delivered)
}
