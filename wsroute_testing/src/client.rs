//! WebSocket client helpers for exercising a running server.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    connect_async,
    tungstenite::{self, client::IntoClientRequest, http::HeaderValue},
};

/// Client side of an upgraded connection.
pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn url(addr: SocketAddr, token: Option<&str>) -> String {
    match token {
        Some(token) => format!("ws://{addr}/?token={token}"),
        None => format!("ws://{addr}/"),
    }
}

/// Open a WebSocket to `addr`, presenting `token` if given.
///
/// # Errors
///
/// Returns the handshake error, including HTTP rejections.
pub async fn connect(addr: SocketAddr, token: Option<&str>) -> Result<Client, tungstenite::Error> {
    let (ws, _) = connect_async(url(addr, token)).await?;
    Ok(ws)
}

/// Open a WebSocket requesting the `protocols` sub-protocol list.
///
/// Returns the client and the protocol the server echoed.
///
/// # Errors
///
/// Returns the handshake error, including HTTP rejections.
pub async fn connect_with_protocols(
    addr: SocketAddr,
    protocols: &'static str,
) -> Result<(Client, Option<String>), tungstenite::Error> {
    let mut request = url(addr, None).into_client_request()?;
    request
        .headers_mut()
        .insert("sec-websocket-protocol", HeaderValue::from_static(protocols));
    let (ws, response) = connect_async(request).await?;
    let echoed = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    Ok((ws, echoed))
}

/// HTTP status of a refused upgrade, or `None` if it was accepted.
pub async fn rejection_status(addr: SocketAddr, token: Option<&str>) -> Option<u16> {
    match connect_async(url(addr, token)).await {
        Err(tungstenite::Error::Http(response)) => Some(response.status().as_u16()),
        Ok(_) | Err(_) => None,
    }
}
