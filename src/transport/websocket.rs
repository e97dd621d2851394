use super::channel::{SessionContext, SessionOutcome};
use super::{ChannelKind, TransportEvent, TransportFailure};
use crate::types::WS_CLOSE_NORMAL;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket factory for creating WebSocket connections
pub struct WebSocketFactory;

impl WebSocketFactory {
    /// Opens a websocket to `url`, sending `credentials` as the cookie header
    pub async fn create(url: &str, credentials: Option<&str>) -> Result<WsStream, WsError> {
        tracing::debug!("Creating WebSocket connection to: {}", url);
        let mut request = url.into_client_request()?;
        if let Some(cookie) = credentials {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| WsError::HttpFormat(e.into()))?;
            request.headers_mut().insert("Cookie", value);
        }
        let (stream, response) = connect_async(request).await?;
        tracing::debug!("Websocket handshake answered {}", response.status());
        Ok(stream)
    }
}

/// Runs one websocket session until it ends or `cancel` fires.
pub(crate) async fn run_session(
    context: &SessionContext,
    cancel: &CancellationToken,
) -> SessionOutcome {
    let connect = tokio::select! {
        biased;
        () = cancel.cancelled() => return SessionOutcome::Cancelled,
        result = WebSocketFactory::create(&context.ws_url, context.credentials.as_deref()) => result,
    };

    let stream = match connect {
        Ok(stream) => stream,
        Err(e) => {
            let failure = TransportFailure::from_ws_error(&e);
            tracing::warn!("Websocket connect failed: {}", failure);
            let protocol_failure = failure.is_protocol();
            context.emit(TransportEvent::ConnectError(failure));
            return SessionOutcome::Ended {
                was_connected: false,
                protocol_failure,
            };
        }
    };

    context.mark_connected(ChannelKind::WebSocket);
    let (mut write_half, mut read_half) = stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::from(WS_CLOSE_NORMAL),
                    reason: "client closing".into(),
                };
                if let Err(e) = write_half.send(Message::Close(Some(frame))).await {
                    tracing::debug!("Close frame not delivered: {}", e);
                }
                return SessionOutcome::Cancelled;
            }
            next = read_half.next() => {
                let Some(msg_result) = next else {
                    tracing::warn!("Websocket stream ended");
                    return ended(false);
                };
                match msg_result {
                    Ok(Message::Text(text)) => {
                        tracing::trace!("Received text message: {}", text);
                        context.deliver_frame(&text);
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = match frame {
                            Some(close_frame) => {
                                tracing::warn!(
                                    "Server closed connection: code={:?}, reason='{}'",
                                    close_frame.code,
                                    close_frame.reason
                                );
                                close_frame.reason.to_string()
                            }
                            None => {
                                tracing::warn!("Server closed connection without close frame");
                                String::new()
                            }
                        };
                        return report_channel_failure(context, TransportFailure::from_text(reason));
                    }
                    Ok(Message::Ping(data)) => {
                        tracing::trace!("Received ping ({} bytes)", data.len());
                    }
                    Ok(Message::Pong(data)) => {
                        tracing::trace!("Received pong ({} bytes)", data.len());
                    }
                    Ok(Message::Binary(data)) => {
                        tracing::warn!("Received unexpected binary message ({} bytes)", data.len());
                    }
                    Ok(Message::Frame(_)) => {}
                    Err(e) => {
                        tracing::error!("WebSocket read error: {}", e);
                        return report_channel_failure(context, TransportFailure::from_ws_error(&e));
                    }
                }
            }
        }
    }
}

/// Reports a low-level channel failure before the session is declared over
fn report_channel_failure(context: &SessionContext, failure: TransportFailure) -> SessionOutcome {
    let protocol_failure = failure.is_protocol();
    if protocol_failure || !failure.message.is_empty() {
        context.emit(TransportEvent::ChannelDiagnostic(failure));
    }
    ended(protocol_failure)
}

fn ended(protocol_failure: bool) -> SessionOutcome {
    SessionOutcome::Ended {
        was_connected: true,
        protocol_failure,
    }
}
