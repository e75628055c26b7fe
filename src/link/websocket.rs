//! # WebSocket Link
//!
//! The production [`CloudLink`]: one JSON message per WebSocket frame over mutual TLS.
//!
//! ## Dialing
//!
//! `init` makes up to `retry_count` attempts, sleeping `cloud_access_sleep` between
//! them. Each attempt reloads the TLS material from disk and must complete the
//! handshake within `handshake_timeout`. The request carries `node_id` and
//! `project_id` headers plus whatever was last passed to `notify_auth`.
//!
//! ## Framing
//!
//! Text and binary frames both carry JSON. Ping/pong frames are handled by the
//! protocol layer and skipped here; a close frame or end of stream is reported as
//! [`LinkError::Closed`].

use super::tls;
use super::CloudLink;
use crate::config::{HubConfig, TlsFiles};
use crate::error::LinkError;
use async_trait::async_trait;
use beehive::Message;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketLink {
    url: Url,
    tls: TlsFiles,
    node_name: String,
    project_id: String,
    handshake_timeout: Duration,
    write_deadline: Duration,
    read_deadline: Option<Duration>,
    retry_count: u32,
    cloud_access_sleep: Duration,
    auth: parking_lot::Mutex<HashMap<String, String>>,
    sink: Mutex<Option<SplitSink<WsStream, Frame>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
}

impl WebSocketLink {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            url: config.url.clone(),
            tls: config.tls.clone(),
            node_name: config.node_name.clone(),
            project_id: config.project_id.clone(),
            handshake_timeout: config.handshake_timeout,
            write_deadline: config.write_deadline,
            read_deadline: config.read_deadline(),
            retry_count: config.retry_count.max(1),
            cloud_access_sleep: config.cloud_access_sleep,
            auth: parking_lot::Mutex::new(HashMap::new()),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
        }
    }

    fn request(&self) -> Result<Request, LinkError> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("node_id", header_value(&self.node_name)?);
        headers.insert("project_id", header_value(&self.project_id)?);
        for (key, value) in self.auth.lock().iter() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| LinkError::Handshake(format!("bad header name {key:?}: {e}")))?;
            headers.insert(name, header_value(value)?);
        }
        Ok(request)
    }

    async fn dial(&self) -> Result<WsStream, LinkError> {
        let tls = tls::client_config(&self.tls)?;
        let request = self.request()?;
        let connect = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            false,
            Some(Connector::Rustls(tls)),
        );
        let (ws, response) = tokio::time::timeout(self.handshake_timeout, connect)
            .await
            .map_err(|_| LinkError::HandshakeTimeout(self.handshake_timeout))??;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(ws)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, LinkError> {
    HeaderValue::from_str(value)
        .map_err(|e| LinkError::Handshake(format!("bad header value {value:?}: {e}")))
}

#[async_trait]
impl CloudLink for WebSocketLink {
    async fn init(&self) -> Result<(), LinkError> {
        for attempt in 1..=self.retry_count {
            match self.dial().await {
                Ok(ws) => {
                    let (sink, stream) = ws.split();
                    *self.sink.lock().await = Some(sink);
                    *self.stream.lock().await = Some(stream);
                    info!(url = %self.url, attempt, "connected to cloud");
                    return Ok(());
                }
                Err(e) => {
                    error!(url = %self.url, attempt, error = %e, "failed to connect to cloud");
                    if attempt < self.retry_count {
                        tokio::time::sleep(self.cloud_access_sleep).await;
                    }
                }
            }
        }
        Err(LinkError::MaxRetryExceeded)
    }

    async fn send(&self, msg: &Message) -> Result<(), LinkError> {
        let text = serde_json::to_string(msg).map_err(LinkError::Encode)?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(LinkError::NotConnected)?;
        tokio::time::timeout(self.write_deadline, sink.send(Frame::Text(text)))
            .await
            .map_err(|_| LinkError::WriteTimeout(self.write_deadline))??;
        Ok(())
    }

    async fn receive(&self) -> Result<Message, LinkError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(LinkError::NotConnected)?;
        loop {
            let next = match self.read_deadline {
                Some(deadline) => tokio::time::timeout(deadline, stream.next())
                    .await
                    .map_err(|_| LinkError::ReadTimeout(deadline))?,
                None => stream.next().await,
            };
            match next {
                None => return Err(LinkError::Closed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Frame::Text(text))) => {
                    return serde_json::from_str(&text).map_err(LinkError::Decode)
                }
                Some(Ok(Frame::Binary(bytes))) => {
                    return serde_json::from_slice(&bytes).map_err(LinkError::Decode)
                }
                Some(Ok(Frame::Close(frame))) => {
                    debug!(?frame, "cloud closed the connection");
                    return Err(LinkError::Closed);
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                warn!(error = %e, "failed to close websocket");
            }
        }
        self.stream.lock().await.take();
        info!(url = %self.url, "connection closed");
    }

    fn notify_auth(&self, headers: HashMap<String, String>) {
        *self.auth.lock() = headers;
    }
}
