use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, trace, warn};

use commons_sync::{PushChannel, TransportError};
use commons_types::events::{ClientFrame, ServerFrame};
use commons_types::{PushCall, PushEvent};

use crate::error::ClientError;

/// Client sends a Ping every 15 seconds. Two missed Pongs drop the socket.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an invocation waits for its completion frame.
const INVOKE_TIMEOUT: Duration = Duration::from_secs(20);

type Completion = oneshot::Sender<Result<(), TransportError>>;

/// First `max_chars` characters of a frame, for logging.
fn preview(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(end, _)| &text[..end])
}

/// Push channel over a WebSocket carrying JSON frames.
///
/// Invocations are matched to their completions by id. Broadcast events are
/// forwarded, in arrival order, to the receiver returned by
/// [`WsPushChannel::connect`].
#[derive(Clone)]
pub struct WsPushChannel {
    inner: Arc<Inner>,
}

struct Inner {
    outgoing: mpsc::UnboundedSender<ClientFrame>,
    pending: Mutex<HashMap<u64, Completion>>,
    next_invocation: AtomicU64,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Completion>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn complete(&self, invocation_id: u64, result: Result<(), TransportError>) {
        match self.pending().remove(&invocation_id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => trace!("Completion for unknown invocation {}", invocation_id),
        }
    }

    /// Fail everything still waiting; the socket is gone.
    fn fail_all(&self) {
        for (_, tx) in self.pending().drain() {
            let _ = tx.send(Err(TransportError::Disconnected));
        }
    }
}

impl WsPushChannel {
    /// Connect, identify with `token` and wait for the server's Ready.
    pub async fn connect(
        url: &str,
        token: &str,
    ) -> Result<(Self, mpsc::Receiver<PushEvent>), ClientError> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut sender, mut receiver) = ws_stream.split();

        let identify = serde_json::to_string(&ClientFrame::Identify {
            token: token.to_string(),
        })
        .map_err(|e| ClientError::Handshake(e.to_string()))?;
        sender.send(WsMessage::Text(identify.into())).await?;

        let user_id = loop {
            match receiver.next().await {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Ready { user_id }) => break user_id,
                    Ok(_) => continue,
                    Err(e) => return Err(ClientError::Handshake(e.to_string())),
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(ClientError::Handshake("closed before Ready".into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        };
        info!("Push channel ready for user {}", user_id);

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (events_tx, events_rx) = mpsc::channel::<PushEvent>(1024);
        let inner = Arc::new(Inner {
            outgoing: outgoing_tx,
            pending: Mutex::new(HashMap::new()),
            next_invocation: AtomicU64::new(1),
        });

        let pong_received = Arc::new(AtomicBool::new(true));
        let pong_flag_send = pong_received.clone();
        let pong_flag_recv = pong_received;

        let mut send_task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            let mut missed_heartbeats: u8 = 0;

            loop {
                tokio::select! {
                    frame = outgoing_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Cannot encode frame: {}", e);
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = heartbeat.tick() => {
                        if pong_flag_send.swap(false, Ordering::Acquire) {
                            missed_heartbeats = 0;
                        } else {
                            missed_heartbeats += 1;
                            if missed_heartbeats >= 2 {
                                warn!("Heartbeat timeout (missed {} pongs), dropping push channel", missed_heartbeats);
                                break;
                            }
                        }
                        if sender.send(WsMessage::Ping(Vec::<u8>::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sender.close().await;
        });

        let recv_inner = inner.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    WsMessage::Text(text) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Event { event }) => {
                            trace!("Push event {}", event.name());
                            if events_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(ServerFrame::Completion {
                            invocation_id,
                            error,
                        }) => {
                            let result = match error {
                                Some(reason) => Err(TransportError::Rejected(reason)),
                                None => Ok(()),
                            };
                            recv_inner.complete(invocation_id, result);
                        }
                        Ok(ServerFrame::Ready { .. }) => {}
                        Err(e) => {
                            warn!("Bad push frame: {} -- raw: {}", e, preview(&text, 200));
                        }
                    },
                    WsMessage::Pong(_) => {
                        pong_flag_recv.store(true, Ordering::Release);
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        });

        let supervisor_inner = inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut send_task => recv_task.abort(),
                _ = &mut recv_task => send_task.abort(),
            }
            supervisor_inner.fail_all();
            info!("Push channel closed");
        });

        Ok((Self { inner }, events_rx))
    }
}

#[async_trait]
impl PushChannel for WsPushChannel {
    async fn invoke(&self, call: PushCall) -> Result<(), TransportError> {
        let invocation_id = self.inner.next_invocation.fetch_add(1, Ordering::Relaxed);
        let method = call.method();
        let (tx, rx) = oneshot::channel();
        self.inner.pending().insert(invocation_id, tx);

        if self
            .inner
            .outgoing
            .send(ClientFrame::Invoke {
                invocation_id,
                call,
            })
            .is_err()
        {
            self.inner.pending().remove(&invocation_id);
            return Err(TransportError::Disconnected);
        }
        debug!("Invoked {} ({})", method, invocation_id);

        match tokio::time::timeout(INVOKE_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                self.inner.pending().remove(&invocation_id);
                warn!("{} ({}) timed out", method, invocation_id);
                Err(TransportError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_cuts_on_char_boundary() {
        let frame = format!(r#"{{"type":"userTypingX","data":"{}"}}"#, "你好".repeat(60));
        assert!(frame.len() > 200);

        let cut = preview(&frame, 200);
        assert_eq!(cut.chars().count(), 200);
        assert!(frame.starts_with(cut));
    }

    #[test]
    fn short_frame_is_kept_whole() {
        assert_eq!(preview("{}", 200), "{}");
    }
}
