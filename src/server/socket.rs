//! One WebSocket connection, one session

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use std::fmt::Display;
use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedReceiver;

use super::AppState;
use crate::error::ValidationError;
use crate::ident;
use crate::pipeline::{teardown, SessionPipeline};
use crate::session::{CloseReason, Outbound, Session, StatusSender};

/// First client message
enum Job {
    Text(String),
    Unsupported,
}

pub(crate) async fn handle_socket(socket: WebSocket, remote_addr: SocketAddr, state: AppState) {
    let (sink, stream) = socket.split();
    serve_connection(sink, stream, remote_addr, state).await;
}

/// Run one connection from admission to teardown over any message sink/stream pair
pub(crate) async fn serve_connection<S, R, E>(mut sink: S, mut stream: R, remote_addr: SocketAddr, state: AppState)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let ip = remote_addr.ip();

    let Some(lease) = state.rate_limiter.try_acquire(ip) else {
        warn!("Rejecting connection from {}: rate limited", ip);
        if let Err(e) = sink.send(close_message(&CloseReason::policy("Rate limit exceeded"))).await {
            debug!("Failed to send close to {}: {}", ip, e);
        }
        return;
    };

    let session = register(&state, remote_addr);
    let (out, rx) = StatusSender::channel(session.id.clone());
    let writer = tokio::spawn(forward_outbound(sink, rx, session.id.clone()));
    out.status(format!("Connected: {}", session.id));

    let pipeline = SessionPipeline::new(state.ctx.clone(), session.clone(), out.clone());
    match next_job(&mut stream).await {
        Some(Job::Text(raw)) => {
            let run = pipeline.run(&raw);
            tokio::pin!(run);
            tokio::select! {
                report = &mut run => {
                    debug!("[{}] Stages: {:?}", session.id, report.stages);
                }
                _ = wait_for_disconnect(&mut stream) => {
                    let stage = state.ctx.registry.stage(&session.id);
                    info!(
                        "[{}] Client disconnected during {}",
                        session.id,
                        stage.map(|s| s.to_string()).unwrap_or_default()
                    );
                }
            }
        }
        Some(Job::Unsupported) => {
            pipeline.reject(ValidationError::UnsupportedMessage.into()).await;
        }
        None => {
            info!("[{}] Client left before sending a job", session.id);
            drop(pipeline);
        }
    }

    drop(out);
    if let Err(e) = writer.await {
        warn!("[{}] Writer task failed: {}", session.id, e);
    }
    teardown(&state.ctx, &session).await;
    state.rate_limiter.release(lease);
}

/// Register a session under a fresh identifier
fn register(state: &AppState, remote_addr: SocketAddr) -> Session {
    loop {
        let session = Session::new(ident::generate(), remote_addr, &state.ctx.config.temp_root);
        match state.ctx.registry.insert(session.clone()) {
            Ok(()) => return session,
            Err(e) => debug!("{}, regenerating", e),
        }
    }
}

async fn next_job<R, E>(stream: &mut R) -> Option<Job>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(Job::Text(text.as_str().to_owned())),
            Ok(Message::Binary(_)) => return Some(Job::Unsupported),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => return None,
            Err(e) => {
                debug!("WebSocket read failed: {}", e);
                return None;
            }
        }
    }
    None
}

/// Resolves when the client goes away. Anything else it sends is ignored.
async fn wait_for_disconnect<R, E>(stream: &mut R)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(Message::Text(_)) | Ok(Message::Binary(_)) => debug!("Ignoring message after job"),
            Ok(_) => {}
        }
    }
}

fn close_message(reason: &CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code,
        reason: reason.reason.clone().into(),
    }))
}

/// Drain the session's outbound channel into the socket, in order, until a
/// close is requested or every sender is gone.
pub(crate) async fn forward_outbound<S>(mut sink: S, mut rx: UnboundedReceiver<Outbound>, session_id: String)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Status(line) => {
                if let Err(e) = sink.send(Message::Text(line.into())).await {
                    debug!("[{}] Client gone: {}", session_id, e);
                    return;
                }
            }
            Outbound::Close(reason) => {
                debug!("[{}] Closing with {} ({})", session_id, reason.code, reason.reason);
                if let Err(e) = sink.send(close_message(&reason)).await {
                    debug!("[{}] Failed to send close: {}", session_id, e);
                }
                return;
            }
        }
    }
    if let Err(e) = sink.close().await {
        debug!("[{}] Failed to close socket: {}", session_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, QueueConfig};
    use crate::pipeline::PipelineContext;
    use crate::session::events::close_code;
    use futures::channel::mpsc::{unbounded, UnboundedSender};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    type ClientTx = UnboundedSender<Result<Message, axum::Error>>;

    fn app_state(tweak: impl FnOnce(&mut Config)) -> (AppState, tempfile::TempDir) {
        let temp_root = tempfile::tempdir().unwrap();
        let mut config = Config {
            temp_root: temp_root.path().to_path_buf(),
            ..Default::default()
        };
        tweak(&mut config);
        (AppState::new(Arc::new(PipelineContext::new(config))), temp_root)
    }

    fn peer() -> SocketAddr {
        "192.0.2.7:50000".parse().unwrap()
    }

    /// Start a connection; returns the client's send half and everything the server sent
    fn connect(state: &AppState) -> (ClientTx, tokio::task::JoinHandle<Vec<Message>>) {
        let (client_tx, server_rx) = unbounded::<Result<Message, axum::Error>>();
        let (server_tx, client_rx) = unbounded::<Message>();
        let state = state.clone();
        let handle = tokio::spawn(async move {
            serve_connection(server_tx, server_rx, peer(), state).await;
            client_rx.collect::<Vec<_>>().await
        });
        (client_tx, handle)
    }

    fn texts(messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t.as_str().to_string()),
                _ => None,
            })
            .collect()
    }

    fn close_frame(messages: &[Message]) -> (u16, String) {
        match messages.last() {
            Some(Message::Close(Some(frame))) => (frame.code, frame.reason.as_str().to_string()),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    async fn finish(handle: tokio::task::JoinHandle<Vec<Message>>) -> Vec<Message> {
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_binary_job_rejected_then_reconnect_allowed() {
        let (state, _temp) = app_state(|_| {});

        let (client, handle) = connect(&state);
        client.unbounded_send(Ok(Message::Binary(vec![1, 2, 3].into()))).unwrap();
        let messages = finish(handle).await;

        let lines = texts(&messages);
        assert!(lines[0].starts_with("Connected: "));
        assert!(ident::is_valid(lines[0].trim_start_matches("Connected: ")));
        assert_eq!(lines.last().map(String::as_str), Some("Error: Only text messages are accepted"));
        assert_eq!(close_frame(&messages), (close_code::POLICY, "Unsupported message type".to_string()));
        assert!(state.ctx.registry.is_empty());
        assert!(state.rate_limiter.entry(peer().ip()).is_none());

        // The closed connection no longer holds the address
        let (client, handle) = connect(&state);
        drop(client);
        let messages = finish(handle).await;
        assert!(texts(&messages)[0].starts_with("Connected: "));
    }

    #[tokio::test]
    async fn test_overlapping_connection_rate_limited() {
        let (state, _temp) = app_state(|_| {});
        let _first = state.rate_limiter.try_acquire(peer().ip()).unwrap();

        let (_client, handle) = connect(&state);
        let messages = finish(handle).await;

        assert_eq!(messages.len(), 1);
        assert_eq!(close_frame(&messages), (close_code::POLICY, "Rate limit exceeded".to_string()));
        assert!(state.ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_while_queued_tears_down() {
        let (state, _temp) = app_state(|config| {
            config.queue = QueueConfig {
                queue_when_resources: true,
                max_concurrent: 1,
            };
        });
        let _busy = state.ctx.queue.try_admit().unwrap();

        let (client, handle) = connect(&state);
        let job = json!({
            "ftpinfo": "deploy@ftp.example.com",
            "password": "hunter2",
            "uploadDirectory": "public_html",
            "composercontent": "{}"
        });
        client.unbounded_send(Ok(Message::Text(job.to_string().into()))).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while state.ctx.queue.waiting() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(state.ctx.registry.len(), 1);

        drop(client);
        let messages = finish(handle).await;

        assert_eq!(texts(&messages).last().map(String::as_str), Some("Waiting for a free slot (position 1)"));
        assert_eq!(state.ctx.queue.waiting(), 0);
        assert!(state.ctx.registry.is_empty());
        assert!(state.rate_limiter.entry(peer().ip()).is_none());
    }

    #[tokio::test]
    async fn test_outbound_order_and_close() {
        let (out, rx) = StatusSender::channel("s-1");
        let (sink, mut sent) = futures::channel::mpsc::unbounded::<Message>();

        out.status("Connected: s-1");
        out.status("[1/3] Validating required fields ⚙️");
        out.close(CloseReason::policy("Missing required fields"));
        out.status("never sent");

        forward_outbound(sink, rx, "s-1".to_string()).await;

        assert_eq!(sent.next().await, Some(Message::Text("Connected: s-1".into())));
        assert_eq!(
            sent.next().await,
            Some(Message::Text("[1/3] Validating required fields ⚙️".into()))
        );
        match sent.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, close_code::POLICY);
                assert_eq!(frame.reason.as_str(), "Missing required fields");
            }
            other => panic!("expected close frame, got {:?}", other),
        }
        assert_eq!(sent.next().await, None);
        assert!(out.is_closed());
    }

    #[tokio::test]
    async fn test_writer_stops_when_senders_drop() {
        let (out, rx) = StatusSender::channel("s-2");
        let (sink, mut sent) = futures::channel::mpsc::unbounded::<Message>();

        out.status("Connected: s-2");
        drop(out);
        forward_outbound(sink, rx, "s-2".to_string()).await;

        assert_eq!(sent.next().await, Some(Message::Text("Connected: s-2".into())));
        assert_eq!(sent.next().await, None);
    }

    #[test]
    fn test_close_message() {
        match close_message(&CloseReason::error("Upload failed")) {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, close_code::ERROR);
                assert_eq!(frame.reason.as_str(), "Upload failed");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
