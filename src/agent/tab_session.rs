//! Tab Session (C3, §4.3): owns one PTY, forwards output into the
//! sequenced buffer, handles resize/kill, and writes an optional log file.
//!
//! PTY wiring follows the corpus's `portable_pty` session pattern: a
//! blocking reader thread forwards bytes, a writer task drains an mpsc
//! queue onto the PTY's writer, and a blocking wait thread reaps the child
//! and reports its exit.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Local;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agent::buffer::SequencedBuffer;
use crate::agent::model::Status;
use crate::bus::{BusEvent, EventBus};

/// Sanitizes a path fragment for inclusion in a log file name: replaces
/// `/`, `\`, `:` with `_` and trims leading underscores (§4.3).
pub fn sanitize_for_log_name(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    replaced.trim_start_matches('_').to_string()
}

struct RunningPty {
    master: Box<dyn MasterPty + Send>,
    writer_tx: mpsc::Sender<Vec<u8>>,
    killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    wait_handle: JoinHandle<()>,
    log_file: Option<Arc<StdMutex<std::fs::File>>>,
    exited: Arc<AtomicBool>,
}

impl Drop for RunningPty {
    fn drop(&mut self) {
        if let Ok(mut killer) = self.killer.lock() {
            let _ = killer.kill();
        }
        self.reader_handle.abort();
        self.writer_handle.abort();
        self.wait_handle.abort();
    }
}

pub struct TabSession {
    agent_id: String,
    tab_id: String,
    agent_name: String,
    tab_name: String,
    work_dir: PathBuf,
    shell_program: String,
    log_dir: Option<PathBuf>,
    buffer: Arc<SequencedBuffer>,
    bus: Arc<EventBus>,
    on_status: Arc<dyn Fn(Status) + Send + Sync>,
    pty: StdMutex<Option<RunningPty>>,
}

impl TabSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        tab_id: impl Into<String>,
        agent_name: impl Into<String>,
        tab_name: impl Into<String>,
        work_dir: PathBuf,
        shell_program: String,
        log_dir: Option<PathBuf>,
        buffer: Arc<SequencedBuffer>,
        bus: Arc<EventBus>,
        on_status: Arc<dyn Fn(Status) + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent_id: agent_id.into(),
            tab_id: tab_id.into(),
            agent_name: agent_name.into(),
            tab_name: tab_name.into(),
            work_dir,
            shell_program,
            log_dir,
            buffer,
            bus,
            on_status,
            pty: StdMutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.pty.lock().expect("tab session mutex poisoned").is_some()
    }

    /// Idempotent: returns immediately if a PTY is already running.
    pub fn start(self: &Arc<Self>, cols: u16, rows: u16) -> std::io::Result<()> {
        {
            let guard = self.pty.lock().expect("tab session mutex poisoned");
            if guard.is_some() {
                return Ok(());
            }
        }

        let pty_system = native_pty_system();
        let pair = pty_system.openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let mut command = CommandBuilder::new(&self.shell_program);
        command.cwd(&self.work_dir);
        command.env("TERM", "xterm-256color");
        command.env("COLORTERM", "truecolor");

        let mut child = pair.slave.spawn_command(command)?;
        let killer = child.clone_killer();
        drop(pair.slave);

        let log_file = self.open_log_file();

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let mut reader = pair.master.try_clone_reader()?;
        let exited = Arc::new(AtomicBool::new(false));

        let this = Arc::clone(self);
        let log_for_reader = log_file.clone();
        let reader_handle = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Some(log) = &log_for_reader {
                            if let Ok(mut file) = log.lock() {
                                let _ = file.write_all(&buf[..n]);
                            }
                        }
                        this.buffer.append(&buf[..n]);
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        continue;
                    }
                    Err(_) => break,
                }
            }
        });

        let writer = pair.master.take_writer()?;
        let writer = Arc::new(StdMutex::new(writer));
        let writer_handle = tokio::spawn(async move {
            while let Some(bytes) = writer_rx.recv().await {
                let writer = Arc::clone(&writer);
                let _ = tokio::task::spawn_blocking(move || {
                    if let Ok(mut guard) = writer.lock() {
                        let _ = guard.write_all(&bytes);
                        let _ = guard.flush();
                    }
                })
                .await;
            }
        });

        let exited_for_wait = Arc::clone(&exited);
        let this = Arc::clone(self);
        let wait_handle = tokio::task::spawn_blocking(move || {
            let _ = child.wait();
            exited_for_wait.store(true, Ordering::SeqCst);
            this.handle_exit();
        });

        let running = RunningPty {
            master: pair.master,
            writer_tx,
            killer: StdMutex::new(killer),
            reader_handle,
            writer_handle,
            wait_handle,
            log_file,
            exited,
        };

        *self.pty.lock().expect("tab session mutex poisoned") = Some(running);
        self.set_status(Status::Running);
        Ok(())
    }

    fn handle_exit(self: &Arc<Self>) {
        self.buffer.flush();
        if let Some(running) = self.pty.lock().expect("tab session mutex poisoned").take() {
            if let Some(log) = &running.log_file {
                if let Ok(mut file) = log.lock() {
                    let _ = file.flush();
                }
            }
        }
        self.set_status(Status::Stopped);
    }

    /// Flush pending output, kill the PTY, and mark the tab stopped.
    pub fn stop(self: &Arc<Self>) {
        self.buffer.flush();
        let running = self.pty.lock().expect("tab session mutex poisoned").take();
        if let Some(running) = running {
            if running.exited.load(Ordering::SeqCst) {
                // Already exited; handle_exit already ran (or is running).
                return;
            }
            if let Ok(mut killer) = running.killer.lock() {
                let _ = killer.kill();
            }
        }
        self.set_status(Status::Stopped);
    }

    /// No-op if the tab is not running.
    pub fn write(&self, data: &[u8]) {
        let guard = self.pty.lock().expect("tab session mutex poisoned");
        if let Some(running) = guard.as_ref() {
            let _ = running.writer_tx.try_send(data.to_vec());
        }
    }

    /// No-op if the tab is not running.
    pub fn resize(&self, cols: u16, rows: u16) {
        let guard = self.pty.lock().expect("tab session mutex poisoned");
        if let Some(running) = guard.as_ref() {
            let _ = running.master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            });
        }
    }

    fn set_status(&self, status: Status) {
        (self.on_status)(status);
        self.bus.publish(BusEvent::TabStatus {
            agent_id: self.agent_id.clone(),
            tab_id: self.tab_id.clone(),
            status,
        });
    }

    fn open_log_file(&self) -> Option<Arc<StdMutex<std::fs::File>>> {
        let log_dir = self.log_dir.as_ref()?;
        let now = Local::now();
        let dir = log_dir
            .join(now.format("%Y-%m").to_string())
            .join(now.format("%d").to_string());
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("failed to create log directory {}: {e}", dir.display());
            return None;
        }

        let file_name = format!(
            "{}_{}_{}_{}.log",
            now.format("%H%M%S"),
            sanitize_for_log_name(&self.agent_name),
            sanitize_for_log_name(&self.tab_name),
            sanitize_for_log_name(&self.work_dir.to_string_lossy()),
        );

        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(&file_name))
        {
            Ok(file) => Some(Arc::new(StdMutex::new(file))),
            Err(e) => {
                tracing::warn!("failed to open log file {file_name}: {e}");
                None
            }
        }
    }
}

pub fn resolve_shell_or_fallback(preferred: &str) -> String {
    if Path::new(preferred).exists() {
        preferred.to_string()
    } else {
        "/bin/bash".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_path_separators_and_leading_underscores() {
        assert_eq!(sanitize_for_log_name("/tmp/work/agent-1"), "tmp_work_agent-1");
        assert_eq!(sanitize_for_log_name("C:\\work"), "C_work");
        assert_eq!(sanitize_for_log_name("__double"), "double");
    }
}
