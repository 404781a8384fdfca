//! Request handling: one adapter, at most one live session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dap::events::{Event, OutputEventBody, StoppedEventBody};
use dap::prelude::*;
use dap::types::{
    Breakpoint, Capabilities, Message, OutputEventCategory, Scope, StoppedEventReason, Thread,
};
use iex_repl::manifest;
use iex_repl::{BootstrapScript, Error as ReplError, ReplEngine, ReplSpawner};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::debugger::{self, LineDebugger, Stop};
use crate::handles::Handles;
use crate::stack::{placeholder_variables, synthesize_frames};

/// The debuggee is presented as a single thread.
const THREAD_ID: i64 = 1;

pub struct IexDebugAdapter {
    session: Arc<Mutex<Option<DebugSession>>>,
    event_tx: Arc<Mutex<Option<mpsc::Sender<Event>>>>,
    spawner: Arc<dyn ReplSpawner>,
    /// Breakpoints requested before launch, installed into the session's
    /// debugger once it exists.
    pending_breakpoints: Arc<Mutex<HashMap<PathBuf, Vec<usize>>>>,
}

/// Everything owned by one launch: the live REPL, the line cursor over the
/// launched source, and the variable-reference registry.
pub struct DebugSession {
    pub engine: Arc<ReplEngine>,
    pub debugger: LineDebugger,
    pub handles: Handles,
}

impl IexDebugAdapter {
    pub fn new(event_tx: mpsc::Sender<Event>, spawner: Arc<dyn ReplSpawner>) -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
            event_tx: Arc::new(Mutex::new(Some(event_tx))),
            spawner,
            pending_breakpoints: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn set_event_sender(&self, tx: mpsc::Sender<Event>) {
        let mut event_tx = self.event_tx.lock().await;
        *event_tx = Some(tx);
    }

    async fn send_event(&self, event: Event) {
        let event_tx = self.event_tx.lock().await;
        if let Some(ref tx) = *event_tx {
            let _ = tx.send(event).await;
        }
    }

    async fn send_console(&self, output: String) {
        self.send_event(Event::Output(OutputEventBody {
            category: Some(OutputEventCategory::Console),
            output,
            group: None,
            variables_reference: None,
            source: None,
            line: None,
            column: None,
            data: None,
        }))
        .await;
    }

    async fn send_stopped(&self, reason: StoppedEventReason, text: Option<String>) {
        self.send_event(Event::Stopped(StoppedEventBody {
            reason,
            thread_id: Some(THREAD_ID),
            all_threads_stopped: Some(true),
            text,
            description: None,
            preserve_focus_hint: None,
            hit_breakpoint_ids: None,
        }))
        .await;
    }

    /// Emits the events for where the cursor landed. Every cursor move is
    /// echoed to the debug console as `line: {n}` before the stop itself.
    async fn report_stop(&self, stop: Stop) {
        match stop {
            Stop::Step { line } => {
                self.send_console(format!("line: {line}\n")).await;
                self.send_stopped(StoppedEventReason::Step, None).await;
            }
            Stop::Exception { line } => {
                self.send_console(format!("line: {line}\n")).await;
                self.send_stopped(StoppedEventReason::String("exception".to_string()), None)
                    .await;
                self.send_event(Event::Output(OutputEventBody {
                    category: Some(OutputEventCategory::Stderr),
                    output: format!("exception in line: {line}\n"),
                    group: None,
                    variables_reference: None,
                    source: None,
                    line: None,
                    column: None,
                    data: None,
                }))
                .await;
            }
            Stop::EndOfSource => {
                self.send_event(Event::Terminated(None)).await;
            }
        }
    }

    pub async fn handle_request(&self, request: Request) -> Response {
        let body = match request.command {
            Command::Initialize(_) => {
                // Ready for breakpoints as soon as the client hears back.
                self.send_event(Event::Initialized).await;
                ResponseBody::Initialize(Capabilities {
                    supports_configuration_done_request: Some(true),
                    supports_step_back: Some(false),
                    supports_terminate_request: Some(true),
                    ..Default::default()
                })
            }
            Command::Launch(ref args) => {
                let data = args.additional_data.as_ref();
                let Some(mix_file) = data
                    .and_then(|d| d.get("mixFile"))
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from)
                else {
                    return self
                        .make_error_response(&request, "launch requires a mixFile".to_string());
                };
                let stop_on_entry = data
                    .and_then(|d| d.get("stopOnEntry"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                // Explicit cwd wins; otherwise the project is wherever the
                // mix file lives.
                let project_dir = data
                    .and_then(|d| d.get("cwd"))
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from)
                    .or_else(|| {
                        mix_file
                            .parent()
                            .filter(|p| !p.as_os_str().is_empty())
                            .map(Path::to_path_buf)
                    })
                    .unwrap_or_else(|| PathBuf::from("."));

                info!(mix_file = %mix_file.display(), stop_on_entry, "launching iex session");

                let mut debugger = match LineDebugger::load(&mix_file) {
                    Ok(debugger) => debugger,
                    Err(e) => {
                        return self.make_error_response(
                            &request,
                            format!("failed to read {}: {}", mix_file.display(), e),
                        );
                    }
                };

                for (path, lines) in self.pending_breakpoints.lock().await.drain() {
                    debugger.install_breakpoints(path, lines);
                }

                report_compiled_modules(&project_dir);

                let (engine, ready) = match ReplEngine::start(
                    self.spawner.as_ref(),
                    &project_dir,
                    BootstrapScript::default(),
                ) {
                    Ok(started) => started,
                    Err(e) => {
                        error!("spawn failed: {e}");
                        return self.make_error_response(
                            &request,
                            format!("failed to start iex: {}", e),
                        );
                    }
                };
                if ready.await.is_err() {
                    let e = ReplError::StartupAborted;
                    error!("launch failed: {e}");
                    return self.make_error_response(&request, e.to_string());
                }

                let mut new_session = DebugSession {
                    engine,
                    debugger,
                    handles: Handles::new(),
                };

                if stop_on_entry {
                    let line = new_session.debugger.stop_on_entry();
                    self.send_console(format!("line: {line}\n")).await;
                    self.send_stopped(StoppedEventReason::String("entry".to_string()), None)
                        .await;
                } else {
                    // No entry stop requested: run until a breakpoint or an
                    // exception line, or straight to termination.
                    let stop = new_session.debugger.run();
                    self.report_stop(stop).await;
                }

                let mut session = self.session.lock().await;
                *session = Some(new_session);

                ResponseBody::Launch
            }
            Command::SetBreakpoints(ref args) => {
                let Some(ref path) = args.source.path else {
                    return self.make_error_response(
                        &request,
                        "setBreakpoints requires a source path".to_string(),
                    );
                };
                let path = PathBuf::from(path);
                // Client lines are 1-based; the cursor is 0-based.
                let requested: Vec<usize> = args
                    .breakpoints
                    .as_ref()
                    .map(|bps| {
                        bps.iter()
                            .map(|bp| bp.line.max(1) as usize - 1)
                            .collect()
                    })
                    .unwrap_or_default();

                let reported = match debugger::adjust_positions(&path, &requested) {
                    Ok(reported) => reported,
                    Err(e) => {
                        return self.make_error_response(
                            &request,
                            format!("failed to read {}: {}", path.display(), e),
                        );
                    }
                };
                let positions: Vec<usize> = reported.iter().map(|bp| bp.line).collect();

                let mut session_opt = self.session.lock().await;
                if let Some(ref mut session) = *session_opt {
                    session.debugger.install_breakpoints(path, positions);
                } else {
                    self.pending_breakpoints.lock().await.insert(path, positions);
                }

                ResponseBody::SetBreakpoints(dap::responses::SetBreakpointsResponse {
                    breakpoints: reported
                        .into_iter()
                        .map(|bp| Breakpoint {
                            verified: bp.verified,
                            line: Some(bp.line as i64 + 1),
                            ..Default::default()
                        })
                        .collect(),
                })
            }
            Command::ConfigurationDone => ResponseBody::ConfigurationDone,
            Command::Threads => ResponseBody::Threads(dap::responses::ThreadsResponse {
                threads: vec![Thread {
                    id: THREAD_ID,
                    name: "thread 1".to_string(),
                }],
            }),
            Command::StackTrace(_) => {
                let session_opt = self.session.lock().await;
                let stack_frames = if let Some(ref session) = *session_opt {
                    synthesize_frames(
                        session.debugger.source_file(),
                        session.debugger.current_line_text(),
                        session.debugger.current_line() as i64 + 1,
                    )
                } else {
                    vec![]
                };
                let total_frames = Some(stack_frames.len() as i64);
                ResponseBody::StackTrace(dap::responses::StackTraceResponse {
                    stack_frames,
                    total_frames,
                })
            }
            Command::Scopes(ref args) => {
                let mut session_opt = self.session.lock().await;
                let scopes = if let Some(ref mut session) = *session_opt {
                    let frame = args.frame_id;
                    vec![
                        Scope {
                            name: "Local".to_string(),
                            variables_reference: session.handles.create(format!("local_{frame}")),
                            expensive: false,
                            ..Default::default()
                        },
                        Scope {
                            name: "Closure".to_string(),
                            variables_reference: session
                                .handles
                                .create(format!("closure_{frame}")),
                            expensive: false,
                            ..Default::default()
                        },
                        Scope {
                            name: "Global".to_string(),
                            variables_reference: session.handles.create(format!("global_{frame}")),
                            expensive: true,
                            ..Default::default()
                        },
                    ]
                } else {
                    vec![]
                };
                ResponseBody::Scopes(dap::responses::ScopesResponse { scopes })
            }
            Command::Variables(ref args) => {
                let mut session_opt = self.session.lock().await;
                let mut variables = vec![];
                if let Some(ref mut session) = *session_opt {
                    if let Some(id) = session
                        .handles
                        .get(args.variables_reference)
                        .map(str::to_string)
                    {
                        variables = placeholder_variables(&id, &mut session.handles);
                    }
                }
                ResponseBody::Variables(dap::responses::VariablesResponse { variables })
            }
            Command::Continue(_) => {
                let stop = {
                    let mut session_opt = self.session.lock().await;
                    session_opt.as_mut().map(|session| session.debugger.run())
                };
                if let Some(stop) = stop {
                    self.report_stop(stop).await;
                }
                ResponseBody::Continue(dap::responses::ContinueResponse {
                    all_threads_continued: Some(true),
                })
            }
            Command::Next(_) => {
                let stop = {
                    let mut session_opt = self.session.lock().await;
                    session_opt.as_mut().map(|session| session.debugger.step())
                };
                if let Some(stop) = stop {
                    self.report_stop(stop).await;
                }
                ResponseBody::Next
            }
            Command::Evaluate(ref args) => {
                let receiver = {
                    let session_opt = self.session.lock().await;
                    match *session_opt {
                        Some(ref session) => session.engine.eval(&args.expression),
                        None => {
                            return self
                                .make_error_response(&request, "no active session".to_string());
                        }
                    }
                };
                let receiver = match receiver {
                    Ok(rx) => rx,
                    Err(e) => {
                        error!("evaluate failed: {e}");
                        self.send_event(Event::Terminated(None)).await;
                        return self
                            .make_error_response(&request, format!("evaluate failed: {}", e));
                    }
                };
                match receiver.await {
                    Ok(result) => ResponseBody::Evaluate(dap::responses::EvaluateResponse {
                        result,
                        type_field: None,
                        presentation_hint: None,
                        variables_reference: 0,
                        named_variables: None,
                        indexed_variables: None,
                        memory_reference: None,
                    }),
                    Err(_) => {
                        self.send_event(Event::Terminated(None)).await;
                        return self.make_error_response(
                            &request,
                            "iex exited during evaluation".to_string(),
                        );
                    }
                }
            }
            Command::Terminate(_) | Command::Disconnect(_) => {
                let mut session = self.session.lock().await;
                if let Some(session) = session.take() {
                    session.engine.terminate();
                }
                ResponseBody::Disconnect
            }
            _ => return self.make_error_response(&request, "Not implemented".to_string()),
        };

        Response {
            request_seq: request.seq,
            success: true,
            body: Some(body),
            error: None,
            message: None,
        }
    }

    fn make_error_response(&self, request: &Request, message: String) -> Response {
        Response {
            request_seq: request.seq,
            success: false,
            body: None,
            error: Some(Message {
                id: 0,
                format: message.clone(),
                variables: HashMap::new(),
                send_telemetry: None,
                show_user: None,
                url: None,
                url_label: None,
            }),
            message: Some(dap::responses::ResponseMessage::Error(message)),
        }
    }
}

/// Logs what the project's Mix build compiled, if a `_build` directory with
/// compile manifests is present. Purely informational; a missing or partial
/// build never blocks the launch.
fn report_compiled_modules(project_dir: &Path) {
    let build_dir = project_dir.join("_build");
    if !build_dir.is_dir() {
        return;
    }
    let manifests = match manifest::find_manifests(&build_dir) {
        Ok(found) => found,
        Err(e) => {
            warn!("manifest scan failed: {e}");
            return;
        }
    };
    for path in manifests {
        match manifest::parse_manifest(&path) {
            Ok(entries) => {
                for entry in entries {
                    info!(module = %entry.module, source = %entry.source, "compiled module");
                }
            }
            Err(e) => warn!("skipping manifest: {e}"),
        }
    }
}
