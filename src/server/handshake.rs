//! WebSocket upgrade admission.
//!
//! The upgrade request presents the handshake token as a `token` query
//! parameter. Admission redeems it with the [`ConnectionManager`] and echoes
//! the negotiated sub-protocol back when the client asked for one.

use std::{net::SocketAddr, sync::Arc};

use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    WebSocketStream,
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{HeaderValue, StatusCode, header::SEC_WEBSOCKET_PROTOCOL},
    },
};

use crate::{
    serializer::SerializationFormat,
    session::{ConnectionInfo, ConnectionManager, HandshakeError},
};

const TOKEN_PARAM: &str = "token";

fn query_token(query: Option<&str>) -> Option<&str> {
    query?.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == TOKEN_PARAM && !value.is_empty()).then_some(value)
    })
}

/// Decide whether an upgrade request may open a connection.
///
/// A presented token is always redeemed. Without one the request is
/// rejected when `require_token` is set, otherwise the format is negotiated
/// from `protocols` (JSON when absent) and redeemed immediately.
pub(super) fn admit(
    manager: &ConnectionManager,
    query: Option<&str>,
    protocols: Option<&str>,
    require_token: bool,
) -> Result<Arc<ConnectionInfo>, HandshakeError> {
    if let Some(token) = query_token(query) {
        return manager.upgrade(token);
    }
    if require_token {
        return Err(HandshakeError::MissingToken);
    }
    let requested = protocols.unwrap_or(SerializationFormat::default().protocol_name());
    let negotiation = manager.negotiate(requested)?;
    manager.upgrade(&negotiation.token)
}

fn reject(err: &HandshakeError) -> ErrorResponse {
    let status = match err {
        HandshakeError::UnsupportedProtocol(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::UNAUTHORIZED,
    };
    let mut response = ErrorResponse::new(Some(err.to_string()));
    *response.status_mut() = status;
    response
}

/// Complete the WebSocket handshake on `stream`.
///
/// Returns `None` when the request is refused or the handshake fails; the
/// failure has already been logged.
pub(super) async fn upgrade(
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    manager: &ConnectionManager,
    require_token: bool,
) -> Option<(WebSocketStream<TcpStream>, Arc<ConnectionInfo>)> {
    let mut admitted = None;
    let callback = |request: &Request, mut response: Response| {
        let protocols = request
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok());
        match admit(manager, request.uri().query(), protocols, require_token) {
            Ok(info) => {
                if protocols.is_some() {
                    response.headers_mut().insert(
                        SEC_WEBSOCKET_PROTOCOL,
                        HeaderValue::from_static(info.format().protocol_name()),
                    );
                }
                admitted = Some(info);
                Ok(response)
            }
            Err(err) => {
                debug!("upgrade refused: peer_addr={peer_addr:?}, error={err}");
                Err(reject(&err))
            }
        }
    };

    match accept_hdr_async(stream, callback).await {
        Ok(ws) => admitted.map(|info| (ws, info)),
        Err(e) => {
            warn!("websocket handshake failed: peer_addr={peer_addr:?}, error={e}");
            if let Some(info) = admitted {
                manager.remove(info.id());
            }
            None
        }
    }
}
