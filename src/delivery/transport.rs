//! Network transport to the remote collector.
//!
//! The uplink posts one whole buffer per request. Reachability is probed
//! separately (a TCP connect to the endpoint's host) by the presence
//! monitor, which drives `TRANSPORT_CONNECTED`.

use log::debug;
use reqwest::{blocking::Client, header::CONTENT_TYPE, Url};
use std::{
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::config::UplinkConfig;
use crate::error::TransportError;

pub trait Transport: Send + Sync {
    /// Delivers one payload; `Ok` only on a 2xx answer.
    fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Cheap reachability check, no payload sent.
    fn probe(&self) -> bool;
}

pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    content_type: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration, content_type: &str) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        if endpoint.host_str().is_none() {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            content_type: content_type.to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &UplinkConfig, endpoint: &str) -> Result<Self, TransportError> {
        Self::new(endpoint, config.timeout(), &config.content_type)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn socket_addr(&self) -> Option<SocketAddr> {
        let host = self.endpoint.host_str()?;
        let port = self.endpoint.port_or_known_default()?;
        (host, port).to_socket_addrs().ok()?.next()
    }
}

impl Transport for HttpTransport {
    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, self.content_type.as_str())
            .body(payload.to_vec())
            .send()?;

        let status = response.status();
        if status.is_success() {
            debug!("[Transport] {} bytes accepted ({})", payload.len(), status);
            Ok(())
        } else {
            Err(TransportError::Status(status.as_u16()))
        }
    }

    fn probe(&self) -> bool {
        match self.socket_addr() {
            Some(addr) => TcpStream::connect_timeout(&addr, self.timeout).is_ok(),
            None => false,
        }
    }
}

/// Stand-in when no endpoint is configured: never connected.
#[derive(Debug, Default)]
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn send(&self, _payload: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Disconnected)
    }

    fn probe(&self) -> bool {
        false
    }
}
