//! Interactive converter sessions over a duplex message transport
//!
//! One `StreamHandler::run` call owns one terminal. Output chunks flow to the
//! client as `output` events while a separate task forwards client input,
//! resize and cancel messages into the terminal. The event sequence is always
//! `started output* (exited | error)`, or a lone `error` when the request is
//! rejected before anything is spawned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::domain::command::{generate_operation_id, ToolKind};
use crate::domain::events::{ClientMessage, StreamEvent, Utf8Decoder};
use crate::domain::requests::RetocRequest;
use crate::domain::types::OperationResponse;
use crate::error::{Error, Result, TimeoutReason};
use crate::infra::pty::{Terminal, TerminalCommand, TerminalFactory, TerminalSize};
use crate::infra::tool_registry::ToolRegistry;
use crate::service::command::{build_retoc, check_absolute, BuiltCommand, CommandArg};
use crate::service::operations::OperationRegistry;

/// Events buffered towards the transport before the output pump waits
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long to keep forwarding output after the child has exited
const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long a stalled transport may delay the terminal event
const FINAL_EVENT_GRACE: Duration = Duration::from_secs(1);

/// Validated, ready-to-start session
struct PreparedSession {
    operation_id: String,
    built: BuiltCommand,
    cwd: Option<PathBuf>,
    size: TerminalSize,
    timeout_seconds: Option<u64>,
}

/// Why the session stopped
enum Outcome {
    Exited(i32),
    Cancelled,
    Disconnected,
    TimedOut(u64),
    Failed(Error),
}

/// Why the input pump stopped
enum InputEnd {
    CancelRequested,
    Closed,
}

/// Enforces at most one `started` and exactly one terminal event
struct EventEmitter {
    tx: mpsc::Sender<StreamEvent>,
    started: bool,
    finished: bool,
}

impl EventEmitter {
    fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            started: false,
            finished: false,
        }
    }

    fn sender(&self) -> mpsc::Sender<StreamEvent> {
        self.tx.clone()
    }

    /// Record `event` against the sequence rules; `false` means suppress it
    fn admit(&mut self, event: &StreamEvent) -> bool {
        if self.finished {
            return false;
        }
        match event {
            StreamEvent::Started { .. } if self.started => return false,
            StreamEvent::Started { .. } => self.started = true,
            StreamEvent::Output { .. } if !self.started => return false,
            _ => {}
        }
        if event.is_terminal() {
            self.finished = true;
        }
        true
    }

    /// Forward `event`, waiting for transport capacity. Returns `false` if the
    /// event was suppressed or the transport is gone.
    async fn emit(&mut self, event: StreamEvent) -> bool {
        self.admit(&event) && self.tx.send(event).await.is_ok()
    }

    /// Forward the terminal event, giving up if the transport stays full
    async fn finish(&mut self, event: StreamEvent) {
        if timeout(FINAL_EVENT_GRACE, self.emit(event)).await.is_err() {
            debug!("Transport stalled; dropped terminal event");
        }
    }
}

/// Runs converter sessions inside pseudo-terminals
pub struct StreamHandler {
    config: Arc<Config>,
    registry: Arc<ToolRegistry>,
    terminals: Arc<dyn TerminalFactory>,
    operations: Arc<OperationRegistry>,
}

impl StreamHandler {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<ToolRegistry>,
        terminals: Arc<dyn TerminalFactory>,
        operations: Arc<OperationRegistry>,
    ) -> Self {
        Self {
            config,
            registry,
            terminals,
            operations,
        }
    }

    /// Drive one session to completion.
    ///
    /// `inbound` carries client messages; its closure counts as a disconnect.
    /// Events are sent on `events`, which is dropped when the session ends.
    pub async fn run(
        &self,
        request: RetocRequest,
        inbound: mpsc::Receiver<ClientMessage>,
        events: mpsc::Sender<StreamEvent>,
    ) {
        let mut emitter = EventEmitter::new(events);

        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Rejected stream request: {}", e);
                emitter.emit(StreamEvent::error(e.to_info())).await;
                return;
            }
        };

        let span = info_span!("stream", operation_id = %prepared.operation_id);
        self.run_prepared(prepared, inbound, &mut emitter)
            .instrument(span)
            .await;
    }

    fn prepare(&self, request: RetocRequest) -> Result<PreparedSession> {
        let size = TerminalSize::new(
            request.cols.unwrap_or(self.config.pty_cols),
            request.rows.unwrap_or(self.config.pty_rows),
        );
        let timeout_seconds = request.timeout_seconds.filter(|secs| *secs > 0);

        if request.tty_probe {
            return Ok(PreparedSession {
                operation_id: generate_operation_id(),
                built: tty_probe_command(),
                cwd: None,
                size,
                timeout_seconds,
            });
        }

        let command = request.into_command(None)?;
        if let Some(dir) = &command.working_directory {
            check_absolute("workingDirectory", dir)?;
        }
        let executable = self.registry.resolve(ToolKind::Converter)?;
        let built = build_retoc(&command, &self.config, &executable)?;

        Ok(PreparedSession {
            operation_id: command.operation_id,
            built,
            cwd: command.working_directory,
            size,
            timeout_seconds,
        })
    }

    async fn run_prepared(
        &self,
        prepared: PreparedSession,
        inbound: mpsc::Receiver<ClientMessage>,
        emitter: &mut EventEmitter,
    ) {
        let operation_id = prepared.operation_id.clone();
        let terminal: Arc<dyn Terminal> = Arc::from(self.terminals.create());

        let command = TerminalCommand {
            program: prepared.built.executable_path.clone(),
            args: prepared.built.arguments(),
            cwd: prepared.cwd.clone(),
            env: HashMap::new(),
        };
        if let Err(e) = terminal.start(&command, prepared.size) {
            warn!("Failed to start session: {}", e);
            emitter.emit(StreamEvent::error(e.to_info())).await;
            terminal.dispose();
            return;
        }

        let record = OperationResponse::pending(&operation_id, ToolKind::Converter.as_str(), "stream");
        let running = self.operations.track(&operation_id);
        let api_cancel = running.cancel_token().clone();
        let clock = Instant::now();
        let command_line = prepared.built.command_line();
        info!("Session started: {}", command_line);
        emitter
            .emit(StreamEvent::started(&operation_id, &command_line))
            .await;

        let pump_cancel = CancellationToken::new();
        let input_task = tokio::spawn(pump_input(terminal.clone(), inbound, pump_cancel.clone()));

        let outcome = self
            .forward(&terminal, prepared.timeout_seconds, input_task, &api_cancel, emitter)
            .await;
        pump_cancel.cancel();

        let record = match outcome {
            Outcome::Exited(code) => {
                info!("Session exited with code {} after {:?}", code, clock.elapsed());
                emitter
                    .finish(StreamEvent::exited(code, clock.elapsed()))
                    .await;
                record.succeed(json!({ "exitCode": code }))
            }
            other => {
                if let Err(e) = terminal.kill() {
                    debug!("Kill after stop returned: {}", e);
                }
                let error = match other {
                    Outcome::TimedOut(seconds) => Error::Timeout(TimeoutReason::Elapsed { seconds }),
                    Outcome::Failed(e) => e,
                    _ => Error::Cancelled,
                };
                if matches!(error, Error::Cancelled) {
                    info!("Session cancelled");
                } else {
                    warn!("Session ended with error: {}", error);
                }
                let info = error.to_info();
                emitter.finish(StreamEvent::error(info.clone())).await;
                record.fail(info)
            }
        };

        terminal.dispose();
        self.operations.complete(record).await;
    }

    /// Forward output until the child exits or the session is stopped.
    ///
    /// Sends to the transport are raced against the stop conditions, so a
    /// client that stops reading cannot hold the session open.
    async fn forward(
        &self,
        terminal: &Arc<dyn Terminal>,
        timeout_seconds: Option<u64>,
        mut input_task: JoinHandle<InputEnd>,
        api_cancel: &CancellationToken,
        emitter: &mut EventEmitter,
    ) -> Outcome {
        let read_cancel = CancellationToken::new();
        let mut output = match terminal.read_output(read_cancel.clone()) {
            Ok(output) => output,
            Err(e) => {
                input_task.abort();
                return Outcome::Failed(e);
            }
        };

        let never = CancellationToken::new();
        let exit = terminal.wait_for_exit(&never);
        tokio::pin!(exit);

        let deadline = async {
            match timeout_seconds {
                Some(secs) => sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let tx = emitter.sender();
        let mut decoder = Utf8Decoder::new();
        let mut pending: Option<StreamEvent> = None;
        let mut output_open = true;
        let mut input_open = true;

        let outcome = loop {
            let idle = pending.is_none();
            tokio::select! {
                chunk = output.next(), if output_open && idle => match chunk {
                    Some(Ok(bytes)) => {
                        debug!("Forwarding {} byte(s) of output", bytes.len());
                        pending = decoder.decode(&bytes).map(StreamEvent::output);
                    }
                    Some(Err(e)) => break Outcome::Failed(e),
                    None => {
                        output_open = false;
                        pending = decoder.finish().map(StreamEvent::output);
                    }
                },
                permit = tx.reserve(), if !idle => match (permit, pending.take()) {
                    (Ok(permit), Some(event)) => {
                        if emitter.admit(&event) {
                            permit.send(event);
                        }
                    }
                    (Ok(_), None) => {}
                    (Err(_), _) => break Outcome::Disconnected,
                },
                code = &mut exit => match code {
                    Ok(code) => break Outcome::Exited(code),
                    Err(e) => break Outcome::Failed(e),
                },
                end = &mut input_task, if input_open => {
                    input_open = false;
                    match end {
                        Ok(InputEnd::CancelRequested) => break Outcome::Cancelled,
                        Ok(InputEnd::Closed) => break Outcome::Disconnected,
                        Err(e) => break Outcome::Failed(Error::Internal(format!("input pump failed: {}", e))),
                    }
                },
                _ = api_cancel.cancelled() => break Outcome::Cancelled,
                _ = &mut deadline => break Outcome::TimedOut(timeout_seconds.unwrap_or_default()),
            }
        };

        if input_open {
            input_task.abort();
        }

        if let Outcome::Exited(_) = outcome {
            // Output written just before exit may still be in flight.
            let drain = async {
                if let Some(event) = pending.take() {
                    if !emitter.emit(event).await {
                        return;
                    }
                }
                if output_open {
                    while let Some(Ok(bytes)) = output.next().await {
                        if let Some(text) = decoder.decode(&bytes) {
                            if !emitter.emit(StreamEvent::output(text)).await {
                                return;
                            }
                        }
                    }
                }
                if let Some(text) = decoder.finish() {
                    emitter.emit(StreamEvent::output(text)).await;
                }
            };
            if timeout(EXIT_DRAIN_GRACE, drain).await.is_err() {
                debug!("Output still open after exit; a descendant may hold the terminal");
            }
        }
        read_cancel.cancel();

        outcome
    }
}

/// Forward client messages into the terminal until cancel or disconnect
async fn pump_input(
    terminal: Arc<dyn Terminal>,
    mut inbound: mpsc::Receiver<ClientMessage>,
    cancel: CancellationToken,
) -> InputEnd {
    loop {
        let message = tokio::select! {
            message = inbound.recv() => message,
            _ = cancel.cancelled() => return InputEnd::Closed,
        };
        match message {
            Some(ClientMessage::Input(data)) => {
                if let Err(e) = terminal.write_input(&data, &cancel).await {
                    debug!("Dropped {} byte(s) of input: {}", data.len(), e);
                }
            }
            Some(ClientMessage::Resize { cols, rows }) => {
                if let Err(e) = terminal.resize(TerminalSize::new(cols, rows)) {
                    debug!("Resize to {}x{} failed: {}", cols, rows, e);
                }
            }
            Some(ClientMessage::Cancel) => return InputEnd::CancelRequested,
            None => return InputEnd::Closed,
        }
    }
}

/// Fixed command reporting whether stdin and stdout are terminals
fn tty_probe_command() -> BuiltCommand {
    #[cfg(unix)]
    {
        let mut built = BuiltCommand::new("/bin/sh");
        built.push(CommandArg::token("-c")).push(CommandArg::value(
            "if [ -t 0 ] && [ -t 1 ]; then echo 'tty: yes'; else echo 'tty: no'; fi",
        ));
        built
    }
    #[cfg(windows)]
    {
        let mut built = BuiltCommand::new("powershell.exe");
        built
            .push(CommandArg::token("-NoProfile"))
            .push(CommandArg::token("-Command"))
            .push(CommandArg::value(
                "if ([Console]::IsOutputRedirected) { 'tty: no' } else { 'tty: yes' }",
            ));
        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::pty::OutputStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum FakeEnd {
        Exit(i32),
        ReadFails,
        /// Runs until killed
        Hang,
    }

    #[derive(Debug, Clone)]
    struct FakeScript {
        fail_start: bool,
        chunks: Vec<Bytes>,
        end: FakeEnd,
    }

    struct FakeTerminal {
        script: FakeScript,
        killed: CancellationToken,
        inputs: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl Terminal for FakeTerminal {
        fn start(&self, command: &TerminalCommand, _size: TerminalSize) -> Result<()> {
            if self.script.fail_start {
                return Err(Error::ProcessStart {
                    executable: command.program.display().to_string(),
                    reason: "fake spawn failure".to_string(),
                });
            }
            Ok(())
        }

        fn read_output(&self, _cancel: CancellationToken) -> Result<OutputStream> {
            let mut items: Vec<Result<Bytes>> = self
                .script
                .chunks
                .iter()
                .map(|c| Ok(c.clone()))
                .collect();
            match self.script.end {
                FakeEnd::Exit(_) => Ok(stream::iter(items).boxed()),
                FakeEnd::ReadFails => {
                    items.push(Err(Error::Pty("read failed".to_string())));
                    Ok(stream::iter(items).boxed())
                }
                FakeEnd::Hang => {
                    // Stays open until the session is killed.
                    let killed = self.killed.clone();
                    let tail = stream::once(async move { killed.cancelled().await })
                        .filter_map(|_| async { None::<Result<Bytes>> });
                    Ok(stream::iter(items).chain(tail).boxed())
                }
            }
        }

        async fn write_input(&self, data: &[u8], _cancel: &CancellationToken) -> Result<()> {
            self.inputs.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn resize(&self, _size: TerminalSize) -> Result<()> {
            Ok(())
        }

        async fn wait_for_exit(&self, cancel: &CancellationToken) -> Result<i32> {
            match self.script.end {
                FakeEnd::Exit(code) => {
                    // Let queued output go first, as a real child would.
                    sleep(Duration::from_millis(5)).await;
                    Ok(code)
                }
                FakeEnd::ReadFails | FakeEnd::Hang => {
                    tokio::select! {
                        _ = self.killed.cancelled() => Ok(-1),
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                    }
                }
            }
        }

        fn kill(&self) -> Result<()> {
            self.killed.cancel();
            Ok(())
        }

        fn dispose(&self) {
            self.killed.cancel();
        }
    }

    struct FakeFactory {
        script: FakeScript,
        inputs: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl TerminalFactory for FakeFactory {
        fn create(&self) -> Box<dyn Terminal> {
            Box::new(FakeTerminal {
                script: self.script.clone(),
                killed: CancellationToken::new(),
                inputs: self.inputs.clone(),
            })
        }
    }

    fn handler(script: FakeScript) -> (StreamHandler, Arc<OperationRegistry>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let inputs = Arc::new(Mutex::new(Vec::new()));
        let operations = Arc::new(OperationRegistry::new(16));
        // Any absolute existing file serves as the converter for fake terminals.
        let exe = std::env::current_exe().unwrap();
        let registry = ToolRegistry::with_paths([(ToolKind::Converter, exe)]);
        let handler = StreamHandler::new(
            Arc::new(Config::default()),
            Arc::new(registry),
            Arc::new(FakeFactory {
                script,
                inputs: inputs.clone(),
            }),
            operations.clone(),
        );
        (handler, operations, inputs)
    }

    fn text_chunks(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    fn info_request() -> RetocRequest {
        RetocRequest {
            command_type: Some("Info".to_string()),
            input_path: Some(absolute("in.utoc")),
            output_path: Some(absolute("out")),
            ..Default::default()
        }
    }

    fn absolute(name: &str) -> String {
        std::env::temp_dir().join(name).display().to_string()
    }

    /// Run a session, optionally sending client messages, and collect its events
    async fn collect(
        handler: &StreamHandler,
        request: RetocRequest,
        client: Vec<ClientMessage>,
    ) -> Vec<StreamEvent> {
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::channel(8);
        let sender = tokio::spawn(async move {
            for message in client {
                sleep(Duration::from_millis(20)).await;
                if input_tx.send(message).await.is_err() {
                    break;
                }
            }
            // Keep the connection open until the session ends.
            input_tx.closed().await;
        });

        let run = handler.run(request, input_rx, event_tx);
        let gather = async {
            let mut events = Vec::new();
            while let Some(event) = event_rx.recv().await {
                events.push(event);
            }
            events
        };
        let ((), events) = tokio::join!(run, gather);
        sender.abort();
        events
    }

    fn matches_grammar(events: &[StreamEvent]) -> bool {
        match events {
            [StreamEvent::Error { .. }] => true,
            [StreamEvent::Started { .. }, middle @ .., last] => {
                last.is_terminal()
                    && middle
                        .iter()
                        .all(|e| matches!(e, StreamEvent::Output { .. }))
            }
            _ => false,
        }
    }

    fn output_text(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Output { data, .. } => Some(data.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_successful_session() {
        let (handler, operations, _) = handler(FakeScript {
            fail_start: false,
            chunks: text_chunks(&["info ", "ok\r\n"]),
            end: FakeEnd::Exit(0),
        });

        let events = collect(&handler, info_request(), Vec::new()).await;
        assert!(matches_grammar(&events));
        match &events[0] {
            StreamEvent::Started { command_line, operation_id, .. } => {
                assert!(command_line.contains("info"));
                assert!(operation_id.starts_with("op_"));
            }
            other => panic!("expected started, got {:?}", other),
        }
        assert_eq!(output_text(&events), "info ok\r\n");
        assert!(matches!(events.last(), Some(StreamEvent::Exited { exit_code: 0, .. })));
        assert_eq!(operations.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_is_a_lone_error() {
        let (handler, operations, _) = handler(FakeScript {
            fail_start: false,
            chunks: Vec::new(),
            end: FakeEnd::Exit(0),
        });
        let mut request = info_request();
        request.input_path = Some("relative/in.utoc".to_string());

        let events = collect(&handler, request, Vec::new()).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Error { code, message, .. } => {
                assert_eq!(code, "VALIDATION_ERROR");
                assert!(message.contains("inputPath"));
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert!(operations.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_secret_is_redacted_in_started_event() {
        let (handler, _, _) = handler(FakeScript {
            fail_start: false,
            chunks: Vec::new(),
            end: FakeEnd::Exit(0),
        });
        let key = format!("0x{}", "cd".repeat(32));
        let mut request = info_request();
        request.aes_key = Some(key.clone());

        let events = collect(&handler, request, Vec::new()).await;
        let json = serde_json::to_string(&events).unwrap();
        assert!(!json.contains(&key));
        assert!(json.contains("********"));
    }

    #[tokio::test]
    async fn test_client_cancel_kills_and_reports() {
        let (handler, operations, inputs) = handler(FakeScript {
            fail_start: false,
            chunks: text_chunks(&["working"]),
            end: FakeEnd::Hang,
        });

        let events = collect(
            &handler,
            info_request(),
            vec![
                ClientMessage::Input(b"y\r".to_vec()),
                ClientMessage::Resize { cols: 80, rows: 24 },
                ClientMessage::Cancel,
            ],
        )
        .await;

        assert!(matches_grammar(&events));
        match events.last() {
            Some(StreamEvent::Error { code, .. }) => assert_eq!(code, "OPERATION_CANCELLED"),
            other => panic!("expected cancellation error, got {:?}", other),
        }
        assert_eq!(inputs.lock().unwrap().as_slice(), &[b"y\r".to_vec()]);
        let history = operations.list().await;
        assert_eq!(history[0].error.as_ref().unwrap().code, "OPERATION_CANCELLED");
    }

    #[tokio::test]
    async fn test_disconnect_stops_session() {
        let (handler, _, _) = handler(FakeScript {
            fail_start: false,
            chunks: Vec::new(),
            end: FakeEnd::Hang,
        });
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::channel(8);

        let run = tokio::spawn(async move { handler.run(info_request(), input_rx, event_tx).await });
        assert!(matches!(event_rx.recv().await, Some(StreamEvent::Started { .. })));
        drop(input_tx);

        timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert!(matches!(event_rx.recv().await, Some(StreamEvent::Error { .. })));
        assert!(event_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_timeout_ends_with_process_timeout() {
        let (handler, _, _) = handler(FakeScript {
            fail_start: false,
            chunks: Vec::new(),
            end: FakeEnd::Hang,
        });
        let mut request = info_request();
        request.timeout_seconds = Some(1);

        let events = collect(&handler, request, Vec::new()).await;
        assert!(matches_grammar(&events));
        match events.last() {
            Some(StreamEvent::Error { code, .. }) => assert_eq!(code, "PROCESS_TIMEOUT"),
            other => panic!("expected timeout error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_api_cancel_stops_session() {
        let (handler, operations, _) = handler(FakeScript {
            fail_start: false,
            chunks: Vec::new(),
            end: FakeEnd::Hang,
        });
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (_input_tx, input_rx) = mpsc::channel(8);
        let run = tokio::spawn(async move { handler.run(info_request(), input_rx, event_tx).await });

        let operation_id = match event_rx.recv().await {
            Some(StreamEvent::Started { operation_id, .. }) => operation_id,
            other => panic!("expected started, got {:?}", other),
        };
        operations.cancel(&operation_id).unwrap();

        match event_rx.recv().await {
            Some(StreamEvent::Error { code, .. }) => assert_eq!(code, "OPERATION_CANCELLED"),
            other => panic!("expected cancellation error, got {:?}", other),
        }
        timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_multibyte_output_split_across_reads() {
        let text = "─".repeat(5);
        let bytes = text.as_bytes();
        // Cut every character apart, and leave a partial one at the end of a read.
        let chunks = vec![
            Bytes::copy_from_slice(&bytes[..1]),
            Bytes::copy_from_slice(&bytes[1..4]),
            Bytes::copy_from_slice(&bytes[4..8]),
            Bytes::copy_from_slice(&bytes[8..]),
        ];
        let (handler, _, _) = handler(FakeScript {
            fail_start: false,
            chunks,
            end: FakeEnd::Exit(0),
        });

        let events = collect(&handler, info_request(), Vec::new()).await;
        assert!(matches_grammar(&events));
        let output = output_text(&events);
        assert!(!output.contains(char::REPLACEMENT_CHARACTER));
        assert_eq!(output, text);
    }

    /// Start a chatty session whose client never reads past `started`
    async fn stalled_session(
        request: RetocRequest,
    ) -> (Arc<OperationRegistry>, String, JoinHandle<()>, mpsc::Receiver<StreamEvent>) {
        let chunks = (0..200).map(|i| Bytes::from(format!("line {}\r\n", i))).collect();
        let (handler, operations, _) = handler(FakeScript {
            fail_start: false,
            chunks,
            end: FakeEnd::Hang,
        });
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (input_tx, input_rx) = mpsc::channel(8);
        let run = tokio::spawn(async move {
            handler.run(request, input_rx, event_tx).await;
            drop(input_tx);
        });
        let operation_id = match event_rx.recv().await {
            Some(StreamEvent::Started { operation_id, .. }) => operation_id,
            other => panic!("expected started, got {:?}", other),
        };
        // Let the output pump fill the transport.
        sleep(Duration::from_millis(100)).await;
        (operations, operation_id, run, event_rx)
    }

    #[tokio::test]
    async fn test_api_cancel_while_transport_is_full() {
        let (operations, operation_id, run, _event_rx) = stalled_session(info_request()).await;
        assert!(operations.is_running(&operation_id));

        operations.cancel(&operation_id).unwrap();
        timeout(Duration::from_secs(3), run).await.unwrap().unwrap();

        let history = operations.list().await;
        assert_eq!(history[0].error.as_ref().unwrap().code, "OPERATION_CANCELLED");
        assert!(!operations.is_running(&operation_id));
    }

    #[tokio::test]
    async fn test_timeout_while_transport_is_full() {
        let mut request = info_request();
        request.timeout_seconds = Some(1);
        let (operations, _, run, _event_rx) = stalled_session(request).await;

        timeout(Duration::from_secs(4), run).await.unwrap().unwrap();
        let history = operations.list().await;
        assert_eq!(history[0].error.as_ref().unwrap().code, "PROCESS_TIMEOUT");
    }

    #[tokio::test]
    async fn test_emitter_suppresses_events_after_terminal() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut emitter = EventEmitter::new(tx);
        assert!(!emitter.emit(StreamEvent::output("early")).await);
        assert!(emitter.emit(StreamEvent::started("op_1", "x")).await);
        assert!(!emitter.emit(StreamEvent::started("op_1", "x")).await);
        assert!(emitter.emit(StreamEvent::exited(0, Duration::ZERO)).await);
        assert!(!emitter.emit(StreamEvent::output("late")).await);
        drop(emitter);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["started", "exited"]);
    }

    fn script_strategy() -> impl Strategy<Value = (FakeScript, bool)> {
        let end = prop_oneof![
            (-3i32..4).prop_map(FakeEnd::Exit),
            Just(FakeEnd::ReadFails),
            Just(FakeEnd::Hang),
        ];
        (
            any::<bool>(),
            prop::collection::vec("[a-z \\r\\n]{1,12}", 0..20),
            end,
            any::<bool>(),
        )
            .prop_map(|(fail_start, chunks, end, invalid)| {
                (
                    FakeScript {
                        fail_start,
                        chunks: text_chunks(&chunks.iter().map(String::as_str).collect::<Vec<_>>()),
                        end,
                    },
                    invalid,
                )
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn event_sequence_always_matches_grammar((script, invalid) in script_strategy()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let expect_output: String = script
                .chunks
                .iter()
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect();
            let hangs = matches!(script.end, FakeEnd::Hang);
            let exits = matches!(script.end, FakeEnd::Exit(_));
            let starts = !script.fail_start && !invalid;

            let events = runtime.block_on(async {
                let (handler, _, _) = handler(script);
                let mut request = info_request();
                if invalid {
                    request.command_type = Some("Format".to_string());
                }
                let client = if hangs { vec![ClientMessage::Cancel] } else { Vec::new() };
                collect(&handler, request, client).await
            });

            prop_assert!(matches_grammar(&events), "bad sequence: {:?}", events.iter().map(|e| e.kind()).collect::<Vec<_>>());
            prop_assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
            if starts && exits {
                prop_assert_eq!(output_text(&events), expect_output);
                let exited = matches!(events.last(), Some(StreamEvent::Exited { .. }));
                prop_assert!(exited);
            }
            if !starts {
                prop_assert_eq!(events.len(), 1);
            }
        }
    }
}
