use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;
use voicelink_core::config::SessionConfig;
use voicelink_core::error::ConnectionError;
use voicelink_core::events::{InboundEvent, OutboundEvent};
use voicelink_core::ids::EventId;

use crate::channel::{AgentChannel, AgentSender};
use crate::parse::{
    HandshakeSignal, build_session_update_message, parse_handshake_signal, parse_server_event,
};

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);
const CTRL_QUEUE: usize = 32;
const AUDIO_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

#[derive(Clone, PartialEq, Eq)]
pub struct RealtimeConnectConfig {
    pub ws_url: Url,
    pub api_key: String,
    pub model: String,

    // Safety/timeouts
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl std::fmt::Debug for RealtimeConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConnectConfig")
            .field("ws_url", &self.ws_url.as_str())
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl RealtimeConnectConfig {
    pub fn production(api_key: impl Into<String>) -> Result<Self, ConnectionError> {
        Ok(Self {
            ws_url: Url::parse("wss://api.openai.com/v1/realtime")
                .map_err(|e| ConnectionError::InvalidSettings(format!("realtime url: {e}")))?,
            api_key: api_key.into(),
            model: "gpt-realtime".into(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        })
    }
}

fn build_realtime_ws_url(cfg: &RealtimeConnectConfig) -> Url {
    let mut url = cfg.ws_url.clone();
    url.query_pairs_mut().append_pair("model", &cfg.model);
    url
}

/// Open the websocket, send the session configuration and wait for the
/// agent to acknowledge it. Nothing else is sent before the acknowledgement.
pub async fn connect(
    cfg: &RealtimeConnectConfig,
    session: &SessionConfig,
) -> Result<AgentChannel, ConnectionError> {
    if cfg.api_key.trim().is_empty() {
        return Err(ConnectionError::InvalidSettings("missing API key".into()));
    }
    session
        .validate()
        .map_err(|e| ConnectionError::InvalidSettings(e.to_string()))?;

    let url = build_realtime_ws_url(cfg);
    let mut req = url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectionError::InvalidSettings(format!("websocket request: {e}")))?;
    req.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", cfg.api_key.trim())
            .parse()
            .map_err(|_| ConnectionError::InvalidSettings("invalid API key header".into()))?,
    );

    log::info!(
        "Connecting to agent at {} (model={})",
        url.host_str().unwrap_or("?"),
        cfg.model
    );

    // Connect with a hard timeout so we can't hang on a bad network.
    let connecting = tokio_tungstenite::connect_async(req);
    let (ws, _resp) = tokio::time::timeout(cfg.connect_timeout, connecting)
        .await
        .map_err(|_| ConnectionError::ConnectTimeout)?
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;
    log::info!("Connected to agent");

    let (mut ws_write, mut ws_read) = ws.split();

    let update = build_session_update_message(session, &EventId::new());
    send_with_timeout(&mut ws_write, Message::Text(update.into()))
        .await
        .map_err(ConnectionError::Transport)?;

    let early = tokio::time::timeout(
        cfg.handshake_timeout,
        await_session_updated(&mut ws_write, &mut ws_read),
    )
    .await
    .map_err(|_| ConnectionError::HandshakeTimeout)??;
    log::info!("Session configured");

    Ok(spawn_session_tasks(ws_write, ws_read, early))
}

async fn send_with_timeout(ws_write: &mut WsWrite, msg: Message) -> Result<(), String> {
    match tokio::time::timeout(WS_SEND_TIMEOUT, ws_write.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("websocket send timed out".into()),
    }
}

/// Returns whatever regular events arrived before the acknowledgement so they
/// can be replayed in order once the session is live.
async fn await_session_updated(
    ws_write: &mut WsWrite,
    ws_read: &mut WsRead,
) -> Result<Vec<InboundEvent>, ConnectionError> {
    let mut early = Vec::new();

    loop {
        let Some(msg) = ws_read.next().await else {
            return Err(ConnectionError::ClosedDuringHandshake);
        };
        let msg = msg.map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(b) => String::from_utf8_lossy(&b).to_string(),
            Message::Close(_) => return Err(ConnectionError::ClosedDuringHandshake),
            Message::Ping(p) => {
                send_with_timeout(ws_write, Message::Pong(p))
                    .await
                    .map_err(ConnectionError::Transport)?;
                continue;
            }
            _ => continue,
        };

        match parse_handshake_signal(&text) {
            Some(HandshakeSignal::SessionUpdated) => return Ok(early),
            Some(HandshakeSignal::SessionCreated) => {
                log::info!("Received a session.created event");
            }
            Some(HandshakeSignal::Rejected { message }) => {
                return Err(ConnectionError::Rejected(message));
            }
            None => match parse_server_event(&text) {
                Ok(ev) => early.push(ev),
                Err(e) => log::debug!("Ignoring unreadable handshake frame: {e:#}"),
            },
        }
    }
}

fn spawn_session_tasks(
    ws_write: WsWrite,
    ws_read: WsRead,
    early: Vec<InboundEvent>,
) -> AgentChannel {
    let (ctrl_tx, ctrl_rx) = mpsc::channel::<OutboundEvent>(CTRL_QUEUE);
    let (audio_tx, audio_rx) = mpsc::channel::<OutboundEvent>(AUDIO_QUEUE);
    let (pong_tx, pong_rx) = mpsc::channel::<Message>(8);
    let (evt_tx, evt_rx) = mpsc::channel::<InboundEvent>(EVENT_QUEUE);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer = tokio::spawn(run_writer(
        ws_write,
        pong_rx,
        ctrl_rx,
        audio_rx,
        shutdown_rx.clone(),
    ));
    let reader = tokio::spawn(run_reader(ws_read, pong_tx, evt_tx, early, shutdown_rx));

    AgentChannel::from_parts(
        AgentSender::new(ctrl_tx, audio_tx),
        evt_rx,
        shutdown_tx,
        vec![writer, reader],
    )
}

fn to_message(event: &OutboundEvent) -> Option<Message> {
    match event.to_wire_json(&EventId::new()) {
        Ok(s) => Some(Message::Text(s.into())),
        Err(e) => {
            log::warn!("Dropping unencodable {} event: {e}", event.event_type());
            None
        }
    }
}

// Keeps reads responsive: socket writes never happen on the reader task.
// Control (pongs, tool acknowledgements, approvals) always goes before audio
// so an audio backlog cannot starve it.
async fn run_writer(
    mut ws_write: WsWrite,
    mut pong_rx: mpsc::Receiver<Message>,
    mut ctrl_rx: mpsc::Receiver<OutboundEvent>,
    mut audio_rx: mpsc::Receiver<OutboundEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut pong_closed = false;
    let mut ctrl_closed = false;
    let mut audio_closed = false;

    loop {
        let next_msg: Option<Message> = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                // Flush control that was already accepted; pending audio is stale.
                while let Ok(ev) = ctrl_rx.try_recv() {
                    if let Some(m) = to_message(&ev) {
                        if send_with_timeout(&mut ws_write, m).await.is_err() {
                            break;
                        }
                    }
                }
                break;
            }
            msg = pong_rx.recv(), if !pong_closed => {
                if msg.is_none() {
                    pong_closed = true;
                }
                msg
            }
            ev = ctrl_rx.recv(), if !ctrl_closed => {
                match ev {
                    Some(ev) => to_message(&ev),
                    None => { ctrl_closed = true; None }
                }
            }
            ev = audio_rx.recv(), if !audio_closed => {
                match ev {
                    Some(ev) => to_message(&ev),
                    None => { audio_closed = true; None }
                }
            }
        };

        let Some(msg) = next_msg else {
            if ctrl_closed && audio_closed {
                break;
            }
            continue;
        };

        if let Err(e) = send_with_timeout(&mut ws_write, msg).await {
            log::warn!("Agent websocket write failed: {e}");
            break;
        }
    }

    let _ = ws_write.send(Message::Close(None)).await;
}

async fn run_reader(
    mut ws_read: WsRead,
    pong_tx: mpsc::Sender<Message>,
    evt_tx: mpsc::Sender<InboundEvent>,
    early: Vec<InboundEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    for ev in early {
        if evt_tx.send(ev).await.is_err() {
            return;
        }
    }

    loop {
        let msg = tokio::select! {
            _ = shutdown_rx.changed() => break,
            msg = ws_read.next() => msg,
        };

        let Some(msg) = msg else {
            log::info!("Agent closed the connection");
            break;
        };
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Agent websocket read failed: {e}");
                break;
            }
        };

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(b) => String::from_utf8_lossy(&b).to_string(),
            Message::Close(_) => {
                log::info!("Agent closed the connection");
                break;
            }
            Message::Ping(p) => {
                // If we can't answer, treat it as a disconnect.
                if pong_tx.try_send(Message::Pong(p)).is_err() {
                    log::warn!("Failed to queue pong; dropping connection");
                    break;
                }
                continue;
            }
            _ => continue,
        };

        match parse_server_event(&text) {
            Ok(ev) => {
                if evt_tx.send(ev).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                // Ignore unknown/bad frames.
                log::debug!("Ignoring unreadable agent frame: {e:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    fn local_cfg(addr: std::net::SocketAddr) -> RealtimeConnectConfig {
        RealtimeConnectConfig {
            ws_url: Url::parse(&format!("ws://{addr}/v1/realtime")).unwrap(),
            api_key: "k".into(),
            model: "gpt-realtime".into(),
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
        }
    }

    fn session() -> SessionConfig {
        SessionConfig::new("marin", "be nice")
    }

    #[test]
    fn url_carries_model() {
        let cfg = RealtimeConnectConfig::production("k").unwrap();
        assert_eq!(
            build_realtime_ws_url(&cfg).as_str(),
            "wss://api.openai.com/v1/realtime?model=gpt-realtime"
        );
    }

    #[test]
    fn debug_redacts_api_key() {
        let cfg = RealtimeConnectConfig::production("sk-secret").unwrap();
        assert!(!format!("{cfg:?}").contains("sk-secret"));
    }

    #[tokio::test]
    async fn missing_api_key_is_rejected_before_connecting() {
        let mut cfg = RealtimeConnectConfig::production("").unwrap();
        cfg.ws_url = Url::parse("ws://127.0.0.1:9/").unwrap();
        assert!(matches!(
            connect(&cfg, &session()).await,
            Err(ConnectionError::InvalidSettings(_))
        ));
    }

    #[tokio::test]
    async fn handshake_then_events_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let auth = Arc::new(Mutex::new(None::<String>));
        let auth_srv = auth.clone();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_hdr_async(stream, move |req: &Request, resp: Response| {
                *auth_srv.lock().unwrap() = req
                    .headers()
                    .get("Authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok::<_, ErrorResponse>(resp)
            })
            .await
            .unwrap();

            // First client frame must be the session configuration.
            let first = ws.next().await.unwrap().unwrap();
            let v: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
            assert_eq!(v["type"], "session.update");
            assert_eq!(v["session"]["audio"]["output"]["voice"], "marin");

            for s in [
                r#"{"type":"session.created"}"#,
                r#"{"type":"response.output_audio_transcript.done","transcript":"early"}"#,
                r#"{"type":"session.updated"}"#,
                r#"{"type":"response.output_audio.delta","delta":"AAA="}"#,
            ] {
                ws.send(Message::Text(s.into())).await.unwrap();
            }

            let next = ws.next().await.unwrap().unwrap();
            let v: serde_json::Value = serde_json::from_str(next.to_text().unwrap()).unwrap();
            assert_eq!(v["type"], "response.create");
            assert!(v["event_id"].as_str().unwrap().starts_with("evt_"));

            ws.close(None).await.unwrap();
        });

        let mut channel = connect(&local_cfg(addr), &session()).await.unwrap();
        assert_eq!(auth.lock().unwrap().as_deref(), Some("Bearer k"));

        assert_eq!(
            channel.next_event().await,
            Some(InboundEvent::TranscriptDone {
                transcript: "early".into()
            })
        );
        assert_eq!(
            channel.next_event().await,
            Some(InboundEvent::AudioDelta {
                delta: "AAA=".into()
            })
        );

        channel.send(OutboundEvent::ResponseCreate).await.unwrap();
        assert_eq!(channel.next_event().await, None);

        server.await.unwrap();
        channel.close().await;
    }

    #[tokio::test]
    async fn error_during_handshake_is_a_rejection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let _ = ws
                .send(Message::Text(
                    r#"{"type":"error","error":{"message":"invalid voice"}}"#.into(),
                ))
                .await;
            let _ = ws.next().await;
        });

        let res = connect(&local_cfg(addr), &session()).await;
        assert_eq!(
            res.err(),
            Some(ConnectionError::Rejected("invalid voice".into()))
        );
    }

    #[tokio::test]
    async fn silent_server_times_out_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Read but never acknowledge.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut cfg = local_cfg(addr);
        cfg.handshake_timeout = Duration::from_millis(200);
        assert_eq!(
            connect(&cfg, &session()).await.err(),
            Some(ConnectionError::HandshakeTimeout)
        );
    }

    #[tokio::test]
    async fn close_during_handshake_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        });

        assert_eq!(
            connect(&local_cfg(addr), &session()).await.err(),
            Some(ConnectionError::ClosedDuringHandshake)
        );
    }

    #[tokio::test]
    async fn answers_ping_and_sends_close_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            ws.send(Message::Text(r#"{"type":"session.updated"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Ping(b"hb".to_vec().into())).await.unwrap();

            let mut got_pong = false;
            let mut got_close = false;
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Pong(p) if p.as_ref() == b"hb" => got_pong = true,
                    Message::Close(_) => {
                        got_close = true;
                        break;
                    }
                    _ => {}
                }
            }
            (got_pong, got_close)
        });

        let channel = connect(&local_cfg(addr), &session()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.close().await;

        let (got_pong, got_close) = server.await.unwrap();
        assert!(got_pong);
        assert!(got_close);
    }

    #[tokio::test]
    async fn writer_drains_control_before_queued_audio() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut types = Vec::new();
            let mut seen_tx = Some(seen_tx);
            let mut got_close = false;
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(t) => {
                        let v: serde_json::Value = serde_json::from_str(t.as_str()).unwrap();
                        types.push(v["type"].as_str().unwrap().to_string());
                        if types.len() == 4 {
                            if let Some(tx) = seen_tx.take() {
                                let _ = tx.send(());
                            }
                        }
                    }
                    Message::Close(_) => {
                        got_close = true;
                        break;
                    }
                    _ => {}
                }
            }
            (types, got_close)
        });

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let (ws_write, _ws_read) = ws.split();
        let (_pong_tx, pong_rx) = mpsc::channel(1);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(4);
        let (audio_tx, audio_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let frame = voicelink_core::types::PcmFrame::new(vec![0; 480]);
        for _ in 0..3 {
            audio_tx
                .send(OutboundEvent::audio_append(&frame))
                .await
                .unwrap();
        }
        ctrl_tx.send(OutboundEvent::ResponseCreate).await.unwrap();

        let writer = tokio::spawn(run_writer(ws_write, pong_rx, ctrl_rx, audio_rx, shutdown_rx));
        seen_rx.await.unwrap();
        shutdown_tx.send(true).unwrap();
        writer.await.unwrap();

        let (types, got_close) = server.await.unwrap();
        assert_eq!(
            types,
            [
                "response.create",
                "input_audio_buffer.append",
                "input_audio_buffer.append",
                "input_audio_buffer.append",
            ]
        );
        assert!(got_close);
    }
}
