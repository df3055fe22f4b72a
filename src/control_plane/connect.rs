//! `connect(port)` WebSocket tunnel (spec §4.7 "WebSocket routing"). The
//! control plane never terminates the socket — it relays frames verbatim in
//! both directions. Grounded on the teacher's `proxy_websocket` (original
//! `api.rs`, used there for the noVNC/subdomain proxy), generalized from a
//! fixed sandbox-internal port to any validated user port.

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

use crate::errors::{ClientError, ClientResult};
use crate::security::validate_port;

/// Build the upstream `ws://` URL for `connect(port_or_path)`. A bare path
/// (no leading port number) defaults to the control-plane port itself; a
/// port must pass [`validate_port`] against `control_plane_port`.
pub fn resolve_connect_target(
    container_host: &str,
    control_plane_port: u16,
    port_or_path: &str,
) -> ClientResult<String> {
    if let Ok(port) = port_or_path.parse::<u32>() {
        if !validate_port(port, control_plane_port) {
            return Err(ClientError::InvalidPort { port });
        }
        return Ok(format!("ws://{container_host}:{port}/"));
    }

    let path = if port_or_path.starts_with('/') {
        port_or_path.to_string()
    } else {
        format!("/{port_or_path}")
    };
    Ok(format!("ws://{container_host}:{control_plane_port}{path}"))
}

/// Relay `client_socket` (the caller's upgraded connection) to `upstream_url`
/// until either side closes or errors. Path and query are preserved in
/// `upstream_url` by the caller.
pub async fn tunnel(client_socket: WebSocket, upstream_url: &str) -> ClientResult<()> {
    let (upstream_ws, _) = tokio_tungstenite::connect_async(upstream_url)
        .await
        .map_err(|e| ClientError::Internal(format!("connect upstream websocket: {e}")))?;
    let (mut upstream_sink, mut upstream_stream) = upstream_ws.split();
    let (mut client_sink, mut client_stream) = client_socket.split();

    let client_to_upstream = tokio::spawn(async move {
        while let Some(message) = client_stream.next().await {
            let forwarded = match message {
                Ok(AxumMessage::Binary(data)) => TungsteniteMessage::Binary(data.to_vec()),
                Ok(AxumMessage::Text(text)) => TungsteniteMessage::Text(text.to_string()),
                Ok(AxumMessage::Ping(data)) => TungsteniteMessage::Ping(data.to_vec()),
                Ok(AxumMessage::Pong(data)) => TungsteniteMessage::Pong(data.to_vec()),
                Ok(AxumMessage::Close(_)) | Err(_) => break,
            };
            if upstream_sink.send(forwarded).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = upstream_stream.next().await {
        let forwarded = match message {
            Ok(TungsteniteMessage::Binary(data)) => AxumMessage::Binary(data.into()),
            Ok(TungsteniteMessage::Text(text)) => AxumMessage::Text(text.into()),
            Ok(TungsteniteMessage::Ping(data)) => AxumMessage::Ping(data.into()),
            Ok(TungsteniteMessage::Pong(data)) => AxumMessage::Pong(data.into()),
            Ok(TungsteniteMessage::Close(_)) | Err(_) => break,
            Ok(TungsteniteMessage::Frame(_)) => continue,
        };
        if client_sink.send(forwarded).await.is_err() {
            break;
        }
    }

    client_to_upstream.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_numeric_port_target() {
        let target = resolve_connect_target("10.0.0.2", 3000, "8080").unwrap();
        assert_eq!(target, "ws://10.0.0.2:8080/");
    }

    #[test]
    fn rejects_control_plane_port() {
        let err = resolve_connect_target("10.0.0.2", 3000, "3000").unwrap_err();
        assert_eq!(err.code(), "INVALID_PORT");
    }

    #[test]
    fn bare_path_defaults_to_control_plane_port() {
        let target = resolve_connect_target("10.0.0.2", 3000, "/ws/session").unwrap();
        assert_eq!(target, "ws://10.0.0.2:3000/ws/session");
    }
}
