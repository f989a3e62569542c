//! src/services/tts_service.rs
//!
//! TtsManager — drives speech-synthesis tasks over the provider's duplex
//! WebSocket protocol. A task walks `pending -> started -> finished|error`;
//! each one is owned by a single spawned driver that multiplexes socket
//! frames and timer-scheduled outbound commands over one queue, so state
//! has exactly one writer. The caller never awaits completion: `start_task`
//! returns as soon as the connection is up and the task is registered, and
//! progress is observed through `task_snapshot`.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_WS_URL: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/inference/";

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("failed to reach the synthesis endpoint: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("api key is not a valid header value")]
    InvalidApiKey,
}

pub type TtsResult<T> = Result<T, TtsError>;

/// Lifecycle states of one synthesis task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Started,
    Finished,
    Error,
}

impl TaskState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

/// Point-in-time view of a task, pollable by its id until the registry
/// entry expires.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub state: TaskState,
    pub output: PathBuf,
    pub message: Option<String>,
}

/// Payload for starting a synthesis task.
#[derive(Deserialize, Clone, Debug)]
pub struct StartTask {
    /// Text segments, synthesized in order.
    pub texts: Vec<String>,
    /// Provider voice id.
    pub voice: String,
    /// Speech rate, 0..=2. Defaults to 1.
    pub speed: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct TtsConfig {
    /// WebSocket inference endpoint.
    pub ws_url: String,
    /// Bearer key for the synthesis service.
    pub api_key: String,
    /// Directory receiving one `<task-id>.mp3` artifact per task.
    pub output_dir: PathBuf,
    /// Delay between consecutive `continue-task` messages.
    pub pacing: Duration,
    /// How long a terminal task stays pollable before its registry entry
    /// is dropped.
    pub retention: Duration,
}

impl TtsConfig {
    pub fn new(ws_url: String, api_key: String, output_dir: PathBuf) -> Self {
        Self {
            ws_url,
            api_key,
            output_dir,
            pacing: Duration::from_secs(1),
            retention: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
struct StatusCell {
    state: TaskState,
    message: Option<String>,
}

struct TaskEntry {
    output: PathBuf,
    status: watch::Receiver<StatusCell>,
}

/// Outbound protocol steps scheduled by the pacer and applied by the
/// task's driver, which drops any step arriving after the task left
/// `started`.
enum Command {
    Continue(String),
    Finish,
}

/// What an inbound text frame means for the task lifecycle.
#[derive(Debug, PartialEq)]
enum ProtocolEvent {
    Started,
    Finished,
    Failed(Option<String>),
    Other,
}

/// TtsManager owns the registry of in-flight tasks and spawns one driver
/// per task. Entries are evicted a grace period after the terminal
/// transition, so the registry stays bounded on long-lived processes.
pub struct TtsManager {
    cfg: TtsConfig,
    tasks: Mutex<HashMap<Uuid, TaskEntry>>,
}

impl TtsManager {
    pub fn new(cfg: TtsConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Open a connection for a new task and register it as `pending`.
    ///
    /// Returns the task id as soon as the handshake succeeds; all protocol
    /// steps run asynchronously afterwards. A handshake failure is the only
    /// error the caller ever sees — later failures only mark the task.
    pub async fn start_task(self: &Arc<Self>, input: StartTask) -> TtsResult<Uuid> {
        let task_id = Uuid::new_v4();

        let mut request = self
            .cfg
            .ws_url
            .as_str()
            .into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("bearer {}", self.cfg.api_key))
            .map_err(|_| TtsError::InvalidApiKey)?;
        request.headers_mut().insert("Authorization", bearer);
        request.headers_mut().insert(
            "X-DashScope-DataInspection",
            HeaderValue::from_static("enable"),
        );

        let (socket, _) = connect_async(request).await?;
        info!(task = %task_id, "synthesis task connected");

        let output = self.cfg.output_dir.join(format!("{task_id}.mp3"));
        let (status_tx, status_rx) = watch::channel(StatusCell {
            state: TaskState::Pending,
            message: None,
        });
        self.tasks.lock().expect("task registry poisoned").insert(
            task_id,
            TaskEntry {
                output: output.clone(),
                status: status_rx,
            },
        );

        let driver = TaskDriver {
            manager: Arc::clone(self),
            id: task_id,
            output,
            texts: input.texts,
            voice: input.voice,
            speed: input.speed.unwrap_or(1.0),
            status_tx,
        };
        tokio::spawn(driver.run(socket));
        Ok(task_id)
    }

    /// Current view of a task, or `None` once the entry has expired (or
    /// never existed).
    pub fn task_snapshot(&self, id: Uuid) -> Option<TaskSnapshot> {
        let tasks = self.tasks.lock().expect("task registry poisoned");
        tasks.get(&id).map(|entry| {
            let cell = entry.status.borrow();
            TaskSnapshot {
                id,
                state: cell.state,
                output: entry.output.clone(),
                message: cell.message.clone(),
            }
        })
    }

    /// Drop the registry entry after the configured retention window.
    fn schedule_eviction(self: &Arc<Self>, id: Uuid) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(manager.cfg.retention).await;
            manager
                .tasks
                .lock()
                .expect("task registry poisoned")
                .remove(&id);
            debug!(task = %id, "evicted finished synthesis task");
        });
    }
}

struct TaskDriver {
    manager: Arc<TtsManager>,
    id: Uuid,
    output: PathBuf,
    texts: Vec<String>,
    voice: String,
    speed: f64,
    status_tx: watch::Sender<StatusCell>,
}

impl TaskDriver {
    /// Single owner of the task's socket and state. Everything that can
    /// change the task funnels through here: inbound frames and the
    /// pacer's scheduled commands.
    async fn run(self, socket: WsStream) {
        let (mut sink, mut stream) = socket.split();
        let mut state = TaskState::Pending;
        let mut artifact: Option<tokio::fs::File> = None;
        // Held open so `commands.recv()` stays pending until the pacer
        // exists; the pacer gets a clone on `task-started`.
        let (commands_tx, mut commands) = mpsc::unbounded_channel::<Command>();

        let run_task = run_task_message(self.id, &self.voice, self.speed);
        if let Err(error) = sink.send(Message::Text(run_task.to_string())).await {
            warn!(task = %self.id, %error, "failed to send run-task");
            self.set_state(&mut state, TaskState::Error, Some(error.to_string()));
            self.manager.schedule_eviction(self.id);
            return;
        }
        debug!(task = %self.id, "sent run-task");

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match classify_event(&text) {
                        ProtocolEvent::Started => {
                            self.set_state(&mut state, TaskState::Started, None);
                            let pacer = Pacer {
                                texts: self.texts.clone(),
                                pacing: self.manager.cfg.pacing,
                                commands: commands_tx.clone(),
                            };
                            tokio::spawn(pacer.run());
                        }
                        ProtocolEvent::Finished => {
                            self.set_state(&mut state, TaskState::Finished, None);
                            break;
                        }
                        ProtocolEvent::Failed(message) => {
                            warn!(task = %self.id, message = message.as_deref().unwrap_or(""), "synthesis task failed");
                            self.set_state(&mut state, TaskState::Error, message);
                            break;
                        }
                        // result-generated and friends carry no state.
                        ProtocolEvent::Other => {}
                    },
                    Some(Ok(Message::Binary(chunk))) => {
                        if let Err(error) = self.append_audio(&mut artifact, &chunk).await {
                            warn!(task = %self.id, %error, "failed to write audio chunk");
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(task = %self.id, %error, "synthesis transport error");
                        if !state.is_terminal() {
                            self.set_state(&mut state, TaskState::Error, Some(error.to_string()));
                        }
                        break;
                    }
                    None => {
                        if !state.is_terminal() {
                            self.set_state(
                                &mut state,
                                TaskState::Error,
                                Some("connection closed before completion".into()),
                            );
                        }
                        break;
                    }
                },
                command = commands.recv() => {
                    // Scheduled steps only apply while the task is live.
                    let message = match command {
                        Some(Command::Continue(text)) if state == TaskState::Started => {
                            continue_task_message(self.id, &text)
                        }
                        Some(Command::Finish) if state == TaskState::Started => {
                            finish_task_message(self.id)
                        }
                        Some(_) => continue,
                        None => continue,
                    };
                    if let Err(error) = sink.send(Message::Text(message.to_string())).await {
                        warn!(task = %self.id, %error, "failed to send protocol step");
                        self.set_state(&mut state, TaskState::Error, Some(error.to_string()));
                        break;
                    }
                }
            }
        }

        let _ = sink.close().await;
        self.manager.schedule_eviction(self.id);
    }

    fn set_state(&self, state: &mut TaskState, next: TaskState, message: Option<String>) {
        *state = next;
        let _ = self.status_tx.send(StatusCell {
            state: next,
            message,
        });
    }

    async fn append_audio(
        &self,
        artifact: &mut Option<tokio::fs::File>,
        chunk: &[u8],
    ) -> std::io::Result<()> {
        if artifact.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.output)
                .await?;
            *artifact = Some(file);
        }
        if let Some(file) = artifact {
            file.write_all(chunk).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

/// Emits one `continue-task` per text at fixed offsets from its start, in
/// input order, then `finish-task` one pacing interval after the slot
/// following the last text. The offsets pace the synthesizer's ingestion;
/// the driver drops any command that arrives after the task left
/// `started`.
struct Pacer {
    texts: Vec<String>,
    pacing: Duration,
    commands: mpsc::UnboundedSender<Command>,
}

impl Pacer {
    async fn run(self) {
        let start = Instant::now();
        let count = self.texts.len() as u32;
        for (index, text) in self.texts.into_iter().enumerate() {
            tokio::time::sleep_until(start + self.pacing * index as u32).await;
            if self.commands.send(Command::Continue(text)).is_err() {
                return;
            }
        }
        tokio::time::sleep_until(start + self.pacing * (count + 1)).await;
        let _ = self.commands.send(Command::Finish);
    }
}

/// Opening control message: declares the task and its audio parameters.
fn run_task_message(task_id: Uuid, voice: &str, speed: f64) -> Value {
    json!({
        "header": {
            "action": "run-task",
            "task_id": task_id.to_string(),
            "streaming": "duplex",
        },
        "payload": {
            "task_group": "audio",
            "task": "tts",
            "function": "SpeechSynthesizer",
            "model": "cosyvoice-v1",
            "parameters": {
                "text_type": "PlainText",
                "voice": voice,
                "format": "mp3",
                "sample_rate": 22050,
                "volume": 50,
                "rate": speed,
                "pitch": 1,
            },
            "input": {},
        },
    })
}

fn continue_task_message(task_id: Uuid, text: &str) -> Value {
    json!({
        "header": {
            "action": "continue-task",
            "task_id": task_id.to_string(),
            "streaming": "duplex",
        },
        "payload": {
            "input": { "text": text },
        },
    })
}

fn finish_task_message(task_id: Uuid) -> Value {
    json!({
        "header": {
            "action": "finish-task",
            "task_id": task_id.to_string(),
            "streaming": "duplex",
        },
        "payload": {
            "input": {},
        },
    })
}

#[derive(Deserialize)]
struct EventFrame {
    header: EventHeader,
}

#[derive(Deserialize)]
struct EventHeader {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Map an inbound text frame onto the task lifecycle. Unparseable frames
/// and unknown events are ignored.
fn classify_event(text: &str) -> ProtocolEvent {
    let Ok(frame) = serde_json::from_str::<EventFrame>(text) else {
        return ProtocolEvent::Other;
    };
    match frame.header.event.as_deref() {
        Some("task-started") => ProtocolEvent::Started,
        Some("task-finished") => ProtocolEvent::Finished,
        Some("task-failed") => ProtocolEvent::Failed(frame.header.error_message),
        _ => ProtocolEvent::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::{advance, timeout};

    #[test]
    fn run_task_message_matches_the_wire_shape() {
        let id = Uuid::new_v4();
        let msg = run_task_message(id, "longxiaochun", 1.5);
        assert_eq!(msg["header"]["action"], "run-task");
        assert_eq!(msg["header"]["task_id"], id.to_string());
        assert_eq!(msg["header"]["streaming"], "duplex");
        assert_eq!(msg["payload"]["function"], "SpeechSynthesizer");
        assert_eq!(msg["payload"]["model"], "cosyvoice-v1");
        assert_eq!(msg["payload"]["parameters"]["voice"], "longxiaochun");
        assert_eq!(msg["payload"]["parameters"]["format"], "mp3");
        assert_eq!(msg["payload"]["parameters"]["sample_rate"], 22050);
        assert_eq!(msg["payload"]["parameters"]["rate"], 1.5);
    }

    #[test]
    fn lifecycle_events_classify() {
        assert_eq!(
            classify_event(r#"{"header":{"event":"task-started"}}"#),
            ProtocolEvent::Started
        );
        assert_eq!(
            classify_event(r#"{"header":{"event":"task-finished"}}"#),
            ProtocolEvent::Finished
        );
        assert_eq!(
            classify_event(r#"{"header":{"event":"task-failed","error_message":"boom"}}"#),
            ProtocolEvent::Failed(Some("boom".into()))
        );
        assert_eq!(
            classify_event(r#"{"header":{"event":"result-generated"}}"#),
            ProtocolEvent::Other
        );
        assert_eq!(classify_event("not json"), ProtocolEvent::Other);
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_schedules_continues_then_a_trailing_finish() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pacer = Pacer {
            texts: vec!["hi".into(), "there".into()],
            pacing: Duration::from_secs(1),
            commands: tx,
        };
        let start = Instant::now();
        tokio::spawn(pacer.run());

        let mut offsets = Vec::new();
        let mut texts = Vec::new();
        loop {
            match rx.recv().await {
                Some(Command::Continue(text)) => {
                    offsets.push(start.elapsed());
                    texts.push(text);
                }
                Some(Command::Finish) => {
                    offsets.push(start.elapsed());
                    break;
                }
                None => panic!("pacer dropped before finishing"),
            }
        }

        assert_eq!(texts, vec!["hi".to_string(), "there".to_string()]);
        assert_eq!(
            offsets,
            vec![
                Duration::from_secs(0),
                Duration::from_secs(1),
                Duration::from_secs(3),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_tasks_leave_the_registry_after_retention() {
        let manager = TtsManager::new(TtsConfig {
            ws_url: "ws://unused.invalid/".into(),
            api_key: "k".into(),
            output_dir: std::env::temp_dir(),
            pacing: Duration::from_secs(1),
            retention: Duration::from_secs(300),
        });
        let id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(StatusCell {
            state: TaskState::Finished,
            message: None,
        });
        drop(status_tx);
        manager.tasks.lock().unwrap().insert(
            id,
            TaskEntry {
                output: std::env::temp_dir().join("x.mp3"),
                status: status_rx,
            },
        );

        manager.schedule_eviction(id);
        // Let the spawned eviction task run once so its retention timer is
        // registered against the current (paused) clock before we advance.
        tokio::task::yield_now().await;
        // Still pollable within the retention window.
        advance(Duration::from_secs(299)).await;
        assert!(manager.task_snapshot(id).is_some());
        advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(manager.task_snapshot(id).is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let manager = TtsManager::new(TtsConfig {
            ws_url: "ws://127.0.0.1:9/".into(),
            api_key: "k".into(),
            output_dir: std::env::temp_dir(),
            pacing: Duration::from_millis(1),
            retention: Duration::from_secs(1),
        });
        let err = manager
            .start_task(StartTask {
                texts: vec!["hi".into()],
                voice: "v".into(),
                speed: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::Transport(_)));
        assert!(manager.tasks.lock().unwrap().is_empty());
    }

    /// Full protocol round trip against an in-process WebSocket server.
    #[tokio::test]
    async fn a_task_walks_the_protocol_to_completion() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let opening = ws.next().await.unwrap().unwrap();
            let opening: Value =
                serde_json::from_str(opening.to_text().unwrap()).unwrap();
            assert_eq!(opening["header"]["action"], "run-task");

            ws.send(Message::Text(
                json!({"header": {"event": "task-started"}}).to_string(),
            ))
            .await
            .unwrap();

            let mut texts = Vec::new();
            while let Some(frame) = ws.next().await {
                let frame = frame.unwrap();
                let Ok(text) = frame.to_text() else { continue };
                let value: Value = serde_json::from_str(text).unwrap();
                match value["header"]["action"].as_str() {
                    Some("continue-task") => {
                        texts.push(value["payload"]["input"]["text"].as_str().unwrap().to_string());
                    }
                    Some("finish-task") => break,
                    _ => {}
                }
            }

            ws.send(Message::Binary(b"audio-bytes".to_vec())).await.unwrap();
            ws.send(Message::Text(
                json!({"header": {"event": "task-finished"}}).to_string(),
            ))
            .await
            .unwrap();
            let _ = ws.close(None).await;
            texts
        });

        let output_dir = tempfile::tempdir().unwrap();
        let manager = TtsManager::new(TtsConfig {
            ws_url: format!("ws://{addr}/"),
            api_key: "test-key".into(),
            output_dir: output_dir.path().to_path_buf(),
            pacing: Duration::from_millis(10),
            retention: Duration::from_secs(60),
        });

        let id = manager
            .start_task(StartTask {
                texts: vec!["hi".into(), "there".into()],
                voice: "longxiaochun".into(),
                speed: Some(1.0),
            })
            .await
            .unwrap();
        assert!(manager.task_snapshot(id).is_some());

        let finished = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(snapshot) = manager.task_snapshot(id) {
                    if snapshot.state.is_terminal() {
                        return snapshot;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(finished.state, TaskState::Finished);

        let texts = server.await.unwrap();
        assert_eq!(texts, vec!["hi".to_string(), "there".to_string()]);

        let audio = tokio::fs::read(finished.output).await.unwrap();
        assert_eq!(audio, b"audio-bytes");
    }

    /// A failure event is terminal for that task only and keeps the
    /// provider's message.
    #[tokio::test]
    async fn a_failed_task_records_the_provider_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            ws.send(Message::Text(
                json!({"header": {"event": "task-failed", "error_message": "voice not found"}})
                    .to_string(),
            ))
            .await
            .unwrap();
            let _ = ws.close(None).await;
        });

        let output_dir = tempfile::tempdir().unwrap();
        let manager = TtsManager::new(TtsConfig {
            ws_url: format!("ws://{addr}/"),
            api_key: "test-key".into(),
            output_dir: output_dir.path().to_path_buf(),
            pacing: Duration::from_millis(10),
            retention: Duration::from_secs(60),
        });

        let id = manager
            .start_task(StartTask {
                texts: vec!["hi".into()],
                voice: "missing".into(),
                speed: None,
            })
            .await
            .unwrap();

        let snapshot = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(snapshot) = manager.task_snapshot(id) {
                    if snapshot.state.is_terminal() {
                        return snapshot;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(snapshot.state, TaskState::Error);
        assert_eq!(snapshot.message.as_deref(), Some("voice not found"));
    }
}
