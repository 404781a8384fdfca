//! The REPL engine: bootstrap sequencing, reply/handler correlation, and
//! line-at-a-time evaluation batches.
//!
//! All session state lives behind one lock and is only mutated from two
//! places (an inbound caller request or an inbound output chunk), so the
//! engine behaves as a single logical thread of control. The interpreter is
//! never polled or blocked on; a framed reply is the sole resumption point,
//! and at most one line is ever in flight at a time.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::process::{ReplConnection, ReplSpawner, ReplTransport};
use crate::prompt::OutputFramer;

/// Bootstrap progress. Strictly forward; there are no reverse transitions,
/// and failure to reach `LaunchComplete` is fatal to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    /// No process yet.
    PreLaunch,
    /// Process spawned; each framed reply feeds the next bootstrap line.
    ReplStarted,
    /// Script fully written; the next reply acknowledges its last line.
    ReplReady,
    /// Bootstrap done; replies are routed to the eval/handler machinery.
    LaunchComplete,
}

/// The statements fed to the interpreter, one per framed reply, before any
/// command is accepted. Injected at session construction, never ambient.
#[derive(Debug, Clone)]
pub struct BootstrapScript {
    lines: Vec<String>,
}

impl BootstrapScript {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl Default for BootstrapScript {
    /// Prepares iex for machine consumption: no ANSI colors, no elided
    /// inspect output.
    fn default() -> Self {
        Self::new(vec![
            "IEx.configure(colors: [enabled: false])".to_string(),
            "IEx.configure(inspect: [limit: :infinity])".to_string(),
        ])
    }
}

/// One evaluation request, decomposed into lines and drained one line per
/// framed reply.
struct EvalBatch {
    lines: Vec<String>,
    cursor: usize,
}

impl EvalBatch {
    fn new(expression: &str) -> Self {
        Self {
            lines: expression.split('\n').map(str::to_string).collect(),
            cursor: 0,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let line = self.lines.get(self.cursor).cloned();
        if line.is_some() {
            self.cursor += 1;
        }
        line
    }
}

struct EngineState {
    phase: BootstrapPhase,
    script: Vec<String>,
    next_script_line: usize,
    framer: OutputFramer,
    /// FIFO queue of continuations; each fires exactly once with the text of
    /// one framed reply, in request-submission order.
    handlers: VecDeque<oneshot::Sender<String>>,
    evals: VecDeque<EvalBatch>,
    /// True while a written line has not yet been answered by a prompt.
    /// Enforces the one-in-flight-conversation rule.
    awaiting_reply: bool,
}

/// Drives one interpreter process for the lifetime of a debug session.
pub struct ReplEngine {
    transport: Arc<dyn ReplTransport>,
    state: Mutex<EngineState>,
}

impl ReplEngine {
    /// Spawns the interpreter and begins bootstrap. The returned receiver
    /// resolves when the bootstrap script has been acknowledged and the
    /// engine accepts commands; it errors out if the process dies first.
    pub fn start(
        spawner: &dyn ReplSpawner,
        cwd: &Path,
        script: BootstrapScript,
    ) -> Result<(Arc<Self>, oneshot::Receiver<String>)> {
        let ReplConnection {
            transport,
            mut output,
        } = spawner.spawn_repl(cwd)?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let engine = Arc::new(Self {
            transport,
            state: Mutex::new(EngineState {
                phase: BootstrapPhase::ReplStarted,
                script: script.into_lines(),
                next_script_line: 0,
                framer: OutputFramer::new(),
                handlers: VecDeque::from([ready_tx]),
                evals: VecDeque::new(),
                // The banner prompt has not arrived yet.
                awaiting_reply: true,
            }),
        });

        let reader = Arc::clone(&engine);
        tokio::spawn(async move {
            while let Some(chunk) = output.recv().await {
                reader.feed(&chunk);
            }
            reader.output_closed();
        });

        Ok((engine, ready_rx))
    }

    /// Ingests one raw output chunk from the reader task.
    fn feed(&self, chunk: &str) {
        let mut state = self.lock();
        let Some(reply) = state.framer.feed(chunk) else {
            return;
        };
        trace!(kind = ?reply.kind, bytes = reply.text.len(), "framed reply");
        state.awaiting_reply = false;
        self.dispatch(&mut state, &reply.text);
    }

    /// Submits an expression for evaluation. The expression is split into
    /// lines and transmitted one line per framed reply; the receiver resolves
    /// with the final reply text, trailing prompt stripped. Batches run
    /// strictly one at a time; this one queues behind any in flight.
    pub fn eval(&self, expression: &str) -> Result<oneshot::Receiver<String>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        state.handlers.push_back(tx);
        state.evals.push_back(EvalBatch::new(expression));

        // Synthetic "already at a prompt" event so transmission starts
        // without waiting for real process output.
        if let Err(e) = self.pump(&mut state) {
            state.handlers.pop_back();
            state.evals.pop_back();
            return Err(e);
        }
        Ok(rx)
    }

    /// Kills the process and drops every queued continuation silently.
    pub fn terminate(&self) {
        {
            let mut state = self.lock();
            state.handlers.clear();
            state.evals.clear();
        }
        self.transport.terminate();
        info!("session terminated");
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.lock().phase
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine state mutex poisoned")
    }

    /// Routes one framed reply according to the bootstrap phase. Replies
    /// framed before `LaunchComplete` are consumed here and never reach the
    /// handler queue.
    fn dispatch(&self, state: &mut EngineState, reply_text: &str) {
        match state.phase {
            BootstrapPhase::PreLaunch => {
                trace!("reply before spawn ignored");
            }
            BootstrapPhase::ReplStarted => {
                if state.next_script_line < state.script.len() {
                    let line = state.script[state.next_script_line].clone();
                    state.next_script_line += 1;
                    if state.next_script_line == state.script.len() {
                        state.phase = BootstrapPhase::ReplReady;
                    }
                    self.write_line(state, &line);
                } else {
                    // Empty bootstrap script: the first prompt already means
                    // the interpreter is ready.
                    self.complete_launch(state, reply_text);
                }
            }
            BootstrapPhase::ReplReady => {
                self.complete_launch(state, reply_text);
            }
            BootstrapPhase::LaunchComplete => {
                self.dispatch_ready(state, reply_text);
            }
        }
    }

    fn complete_launch(&self, state: &mut EngineState, reply_text: &str) {
        state.phase = BootstrapPhase::LaunchComplete;
        debug!("bootstrap complete");
        if let Some(tx) = state.handlers.pop_front() {
            let _ = tx.send(reply_text.to_string());
        }
        // Evaluations queued during bootstrap may start now.
        if let Err(e) = self.pump(state) {
            error!("starting queued evaluation failed: {e}");
        }
    }

    /// Reply routing once bootstrap is done: advance the front eval batch,
    /// or complete it and hand the reply to the head continuation.
    fn dispatch_ready(&self, state: &mut EngineState, reply_text: &str) {
        match state.evals.front_mut().map(EvalBatch::next_line) {
            Some(Some(line)) => self.write_line(state, &line),
            Some(None) => {
                state.evals.pop_front();
                let result = OutputFramer::strip_prompt(reply_text);
                if let Some(tx) = state.handlers.pop_front() {
                    let _ = tx.send(result);
                } else {
                    warn!("completed evaluation had no waiting continuation");
                }
                if let Err(e) = self.pump(state) {
                    error!("starting queued evaluation failed: {e}");
                }
            }
            None => {
                if let Some(tx) = state.handlers.pop_front() {
                    let _ = tx.send(reply_text.to_string());
                } else {
                    trace!("unsolicited reply ignored");
                }
            }
        }
    }

    /// Begins transmitting the front batch if the engine is idle at a prompt.
    fn pump(&self, state: &mut EngineState) -> Result<()> {
        if state.awaiting_reply || state.phase != BootstrapPhase::LaunchComplete {
            return Ok(());
        }
        let line = state.evals.front_mut().and_then(EvalBatch::next_line);
        if let Some(line) = line {
            state.awaiting_reply = true;
            self.transport.send_line(&line)?;
        }
        Ok(())
    }

    fn write_line(&self, state: &mut EngineState, line: &str) {
        state.awaiting_reply = true;
        if let Err(e) = self.transport.send_line(line) {
            // Fatal for the session; the stalled state is observable but no
            // recovery is attempted.
            error!("write to interpreter failed: {e}");
        }
    }

    /// Called when the output stream ends: the process exited. Queued
    /// continuations are dropped so waiting callers resolve with an error.
    fn output_closed(&self) {
        let mut state = self.lock();
        if state.phase != BootstrapPhase::LaunchComplete {
            warn!("interpreter exited before the session became ready");
        } else {
            warn!("interpreter output stream closed");
        }
        state.handlers.clear();
        state.evals.clear();
    }
}

impl std::fmt::Debug for ReplEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ReplEngine")
            .field("phase", &state.phase)
            .field("pending_handlers", &state.handlers.len())
            .field("pending_evals", &state.evals.len())
            .finish()
    }
}
