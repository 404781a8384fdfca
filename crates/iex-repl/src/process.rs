//! Interpreter process ownership: spawning, line-buffered writes, termination.
//!
//! Provides a trait-based interface over the child process so the engine can
//! be driven by a mock interpreter in tests without spawning a real `iex`.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Fixed shell command that starts the interpreter attached to the
/// project's build tool.
const IEX_COMMAND: &str = "iex -S mix";

/// Narrow interface over the interpreter process.
///
/// The engine only ever needs to queue a line of input or kill the process;
/// everything else (pipes, exit status) stays behind this boundary.
pub trait ReplTransport: Send + Sync {
    /// Queues one line for the interpreter's stdin. A newline is appended.
    ///
    /// Failure means the process side of the channel is gone, which is fatal
    /// for the session.
    fn send_line(&self, line: &str) -> Result<()>;

    /// Force-kills the interpreter process. Idempotent.
    fn terminate(&self);
}

/// A spawned interpreter: the write/terminate handle plus the stream of raw
/// stdout chunks. Chunk boundaries carry no meaning — a chunk may be a
/// partial reply, a whole reply, or several replies.
pub struct ReplConnection {
    pub transport: Arc<dyn ReplTransport>,
    pub output: mpsc::UnboundedReceiver<String>,
}

/// Trait for spawning interpreter processes.
///
/// Production code uses [`IexSpawner`]; tests use [`mock::MockReplSpawner`].
pub trait ReplSpawner: Send + Sync {
    /// Spawns one interpreter process in the given working directory.
    fn spawn_repl(&self, cwd: &Path) -> Result<ReplConnection>;
}

/// Production spawner: runs `iex -S mix` through a shell in the project
/// directory.
pub struct IexSpawner;

impl ReplSpawner for IexSpawner {
    fn spawn_repl(&self, cwd: &Path) -> Result<ReplConnection> {
        info!(cwd = %cwd.display(), "spawning {IEX_COMMAND}");

        let mut child = Command::new("/bin/bash")
            .args(["-c", IEX_COMMAND])
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Spawn)?;

        let stdin = child.stdin.take().ok_or(Error::PipeUnavailable("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(Error::PipeUnavailable("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(Error::PipeUnavailable("stderr"))?;

        // Writer task: serializes all stdin writes behind a channel so
        // `send_line` never blocks the caller.
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = write_rx.recv().await {
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    error!("write to iex stdin failed: {e}");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    error!("flush to iex stdin failed: {e}");
                    break;
                }
            }
        });

        // Reader task: forwards raw stdout chunks. EOF here is the only
        // signal we get for an unexpected process exit; it is logged and the
        // session is effectively dead (no recovery is attempted).
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        warn!("iex closed stdout; session is dead");
                        break;
                    }
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if chunk_tx.send(chunk).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("read from iex stdout failed: {e}");
                        break;
                    }
                }
            }
        });

        // stderr is logged only; it never surfaces to the client.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("iex stderr: {line}");
            }
        });

        Ok(ReplConnection {
            transport: Arc::new(ProcessChannel {
                writer: write_tx,
                child: std::sync::Mutex::new(child),
            }),
            output: chunk_rx,
        })
    }
}

/// Owns the child process handle and the stdin write queue.
struct ProcessChannel {
    writer: mpsc::UnboundedSender<String>,
    child: std::sync::Mutex<Child>,
}

impl ReplTransport for ProcessChannel {
    fn send_line(&self, line: &str) -> Result<()> {
        let mut buffered = String::with_capacity(line.len() + 1);
        buffered.push_str(line);
        buffered.push('\n');
        self.writer.send(buffered).map_err(|_| Error::WriteFailed)
    }

    fn terminate(&self) {
        if let Ok(mut child) = self.child.lock() {
            match child.start_kill() {
                Ok(()) => info!("killed iex process"),
                // Already dead counts as terminated.
                Err(e) => debug!("kill iex: {e}"),
            }
        }
    }
}

pub mod mock {
    //! Mock interpreter for engine and adapter tests.
    //!
    //! Replies to every line sent with either the next scripted chunk or a
    //! plain numbered prompt, so bootstrap and eval sequencing can run
    //! without a real `iex`.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    /// First chunk every mock session emits, mimicking the iex banner.
    const BANNER: &str = "Interactive Elixir (1.16.0) - press Ctrl+C to exit\niex(1)> ";

    /// Mock spawner: records sent lines and plays back scripted replies.
    #[derive(Default)]
    pub struct MockReplSpawner {
        scripted: Arc<Mutex<VecDeque<String>>>,
        sent: Arc<Mutex<Vec<String>>>,
        terminated: Arc<AtomicBool>,
    }

    impl MockReplSpawner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a chunk to be emitted in place of the default prompt for
        /// one future `send_line`.
        pub fn push_reply(&self, chunk: impl Into<String>) {
            self.scripted
                .lock()
                .expect("mock scripted replies mutex poisoned")
                .push_back(chunk.into());
        }

        /// Lines the engine has written so far (newlines stripped).
        pub fn sent_lines(&self) -> Vec<String> {
            self.sent
                .lock()
                .expect("mock sent lines mutex poisoned")
                .clone()
        }

        pub fn terminated(&self) -> bool {
            self.terminated.load(Ordering::SeqCst)
        }
    }

    impl ReplSpawner for MockReplSpawner {
        fn spawn_repl(&self, _cwd: &Path) -> Result<ReplConnection> {
            let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<String>();
            chunk_tx
                .send(BANNER.to_string())
                .map_err(|_| Error::WriteFailed)?;

            Ok(ReplConnection {
                transport: Arc::new(MockTransport {
                    scripted: Arc::clone(&self.scripted),
                    sent: Arc::clone(&self.sent),
                    terminated: Arc::clone(&self.terminated),
                    chunk_tx,
                    counter: AtomicU64::new(1),
                }),
                output: chunk_rx,
            })
        }
    }

    struct MockTransport {
        scripted: Arc<Mutex<VecDeque<String>>>,
        sent: Arc<Mutex<Vec<String>>>,
        terminated: Arc<AtomicBool>,
        chunk_tx: mpsc::UnboundedSender<String>,
        counter: AtomicU64,
    }

    impl ReplTransport for MockTransport {
        fn send_line(&self, line: &str) -> Result<()> {
            if self.terminated.load(Ordering::SeqCst) {
                return Err(Error::WriteFailed);
            }
            self.sent
                .lock()
                .expect("mock sent lines mutex poisoned")
                .push(line.to_string());

            let reply = self
                .scripted
                .lock()
                .expect("mock scripted replies mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                    format!("iex({n})> ")
                });
            self.chunk_tx.send(reply).map_err(|_| Error::WriteFailed)
        }

        fn terminate(&self) {
            self.terminated.store(true, Ordering::SeqCst);
        }
    }
}
