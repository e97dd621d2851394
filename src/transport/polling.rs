use super::channel::{SessionContext, SessionOutcome};
use super::{ChannelKind, TransportEvent, TransportFailure};
use tokio_util::sync::CancellationToken;

/// Runs one long-polling session: GET the transport path repeatedly, each answer a
/// batch of envelopes, until a request fails or `cancel` fires.
pub(crate) async fn run_session(
    context: &SessionContext,
    cancel: &CancellationToken,
) -> SessionOutcome {
    let mut connected = false;

    loop {
        let mut request = context
            .http
            .get(&context.poll_url)
            .query(&[("transport", "polling")]);
        if let Some(cookie) = &context.credentials {
            request = request.header("Cookie", cookie);
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return SessionOutcome::Cancelled,
            response = request.send() => response,
        };

        let failure = match response {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => {
                    if !connected {
                        connected = true;
                        context.mark_connected(ChannelKind::Polling);
                    }
                    if !body.trim().is_empty() {
                        context.deliver_frame(&body);
                    }
                    None
                }
                Err(e) => Some(TransportFailure::network(format!("Poll body read failed: {}", e))),
            },
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                Some(TransportFailure::from_status(status, &body))
            }
            Err(e) => Some(TransportFailure::network(format!("Poll request failed: {}", e))),
        };

        if let Some(failure) = failure {
            tracing::warn!("Long-poll failed: {}", failure);
            let protocol_failure = failure.is_protocol();
            if connected {
                context.emit(TransportEvent::ChannelDiagnostic(failure));
            } else {
                context.emit(TransportEvent::ConnectError(failure));
            }
            return SessionOutcome::Ended {
                was_connected: connected,
                protocol_failure,
            };
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return SessionOutcome::Cancelled,
            () = tokio::time::sleep(context.poll_interval) => {}
        }
    }
}
