//! Handle to a running child process

use crate::supervisor::output::{exit_code, ProcessOutput};
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// How long readers may keep draining after the child has exited
///
/// Bounded so that a grandchild holding a pipe open cannot stall collection.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of a bounded wait
#[derive(Debug)]
pub enum WaitOutcome {
    Exited(ProcessOutput),
    /// The limit elapsed; the process group was killed and reaped
    TimedOut(ProcessOutput),
}

/// A running child with its output readers
pub struct ChildHandle {
    child: Child,
    pid: Option<u32>,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
}

impl ChildHandle {
    pub(crate) fn attach(mut child: Child) -> Self {
        let pid = child.id();
        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));

        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(drain(pipe, Arc::clone(&stdout)));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(drain(pipe, Arc::clone(&stderr)));
        }

        Self {
            child,
            pid,
            stdout,
            stderr,
            readers,
        }
    }

    /// OS process id, captured at spawn
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits for the process to exit without collecting output
    pub async fn wait_exit(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Finishes draining both pipes and returns the captured output
    pub async fn collect(&mut self, status: ExitStatus) -> ProcessOutput {
        for reader in &mut self.readers {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut *reader).await.is_err() {
                tracing::warn!("Output pipe still open after exit of pid {:?}", self.pid);
                reader.abort();
            }
        }
        self.readers.clear();

        ProcessOutput {
            stdout: take_text(&self.stdout),
            stderr: take_text(&self.stderr),
            exit_code: exit_code(status),
        }
    }

    /// Waits for exit and collects all output
    pub async fn wait(mut self) -> io::Result<ProcessOutput> {
        let status = self.wait_exit().await?;
        Ok(self.collect(status).await)
    }

    /// Waits at most `limit`, killing the process group when it elapses
    pub async fn wait_with_timeout(mut self, limit: Duration) -> io::Result<WaitOutcome> {
        match tokio::time::timeout(limit, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                Ok(WaitOutcome::Exited(self.collect(status).await))
            }
            Err(_) => {
                tracing::warn!("Process {:?} exceeded {:?}, killing", self.pid, limit);
                let status = self.kill().await?;
                Ok(WaitOutcome::TimedOut(self.collect(status).await))
            }
        }
    }

    /// Asks the process group to exit (SIGTERM)
    pub fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        return self.signal_group(libc::SIGTERM);

        #[cfg(not(unix))]
        return self.child.start_kill();
    }

    /// Kills the process group and reaps the child
    pub async fn kill(&mut self) -> io::Result<ExitStatus> {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL)?;

        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Direct kill of pid {:?} skipped: {}", self.pid, e);
        }
        self.child.wait().await
    }

    /// Terminates, waits up to `grace`, then kills
    pub async fn shutdown(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        if let Err(e) = self.terminate() {
            tracing::warn!("Failed to terminate pid {:?}: {}", self.pid, e);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    "Process {:?} ignored termination for {:?}, killing",
                    self.pid,
                    grace
                );
                self.kill().await
            }
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pgid = pid as libc::pid_t;

        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

fn drain<R>(mut pipe: R, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) => {
                    tracing::debug!("Output pipe read failed: {}", e);
                    break;
                }
            }
        }
    })
}

fn take_text(buffer: &Mutex<Vec<u8>>) -> String {
    match buffer.lock() {
        Ok(mut buf) => String::from_utf8_lossy(&std::mem::take(&mut *buf)).into_owned(),
        Err(_) => String::new(),
    }
}
