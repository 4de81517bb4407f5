//! Test harness for the Toolhost Server
//!
//! Each `TestServer` runs the real router in-process on an ephemeral port,
//! with fake tool scripts standing in for the bundled executables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use toolhost_server::{api, check_dependencies, AppState, Config};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Fake converter: `verify` fails, `list` hangs, anything else echoes `<cmd> ok`
pub const FAKE_CONVERTER: &str = r#"case "$1" in
  verify) echo "bad container" 1>&2; exit 3 ;;
  list) echo "listing"; sleep 30 ;;
  *) echo "$1 ok" ;;
esac"#;

/// Server running in the current test's runtime
pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    pub client: reqwest::Client,
    pub tools: TempDir,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with the fake converter configured
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        init_tracing();
        let tools = tempfile::tempdir()?;
        let converter = write_script(tools.path(), "retoc", FAKE_CONVERTER)?;

        let mut config = Config::default();
        config.converter_path = Some(converter.display().to_string());
        configure(&mut config);

        let state = AppState::new(Arc::new(config));
        check_dependencies(&state).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = api::http::create_router(state);
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });

        Ok(Self {
            base_url: format!("http://{}", addr),
            ws_url: format!("ws://{}", addr),
            client: reqwest::Client::new(),
            tools,
            handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Open a stream session and send `request` as the first frame
    pub async fn open_stream(&self, request: serde_json::Value) -> anyhow::Result<WsClient> {
        let (mut ws, _) = connect_async(format!("{}/api/retoc/stream", self.ws_url)).await?;
        ws.send(Message::text(request.to_string())).await?;
        Ok(ws)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Event as seen on the wire
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub operation_id: Option<String>,
    pub command_line: Option<String>,
    pub data: Option<String>,
    pub exit_code: Option<i32>,
    pub duration: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub timestamp: String,
}

/// Read events until a terminal one arrives or the socket closes
pub async fn collect_events(ws: &mut WsClient) -> anyhow::Result<Vec<WireEvent>> {
    let mut events = Vec::new();
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => {
                let event: WireEvent = serde_json::from_str(&text)?;
                let terminal = event.kind == "exited" || event.kind == "error";
                events.push(event);
                if terminal {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(events)
}

/// Concatenated `data` of all output events
pub fn output_text(events: &[WireEvent]) -> String {
    events
        .iter()
        .filter(|e| e.kind == "output")
        .filter_map(|e| e.data.as_deref())
        .collect()
}

/// Write an executable `/bin/sh` script
pub fn write_script(dir: &Path, name: &str, body: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(path)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
