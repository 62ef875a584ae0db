use crate::http::create_http_pool;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request failed: {0}")]
    Request(String),
}

/// Issues a single HEAD request and reports the status code.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn head(&self, url: &str) -> Result<u16, TransportError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(create_http_pool(timeout)?, timeout))
    }

    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn head(&self, url: &str) -> Result<u16, TransportError> {
        let result = tokio::time::timeout(self.timeout, self.client.head(url).send()).await;

        match result {
            Ok(Ok(response)) => Ok(response.status().as_u16()),
            Ok(Err(e)) if e.is_timeout() => Err(TransportError::Timeout(self.timeout)),
            Ok(Err(e)) if e.is_connect() => Err(TransportError::Connect(e.to_string())),
            Ok(Err(e)) => Err(TransportError::Request(e.to_string())),
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response.as_bytes()).await;
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn reports_status_code() {
        let url = serve_once("HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n").await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        assert_eq!(transport.head(&url).await, Ok(204));
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let url = serve_once(
            "HTTP/1.1 301 Moved Permanently\r\nlocation: http://127.0.0.1:9/\r\ncontent-length: 0\r\n\r\n",
        )
        .await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        assert_eq!(transport.head(&url).await, Ok(301));
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport.head(&format!("http://{}", addr)).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let transport = HttpTransport::new(Duration::from_millis(200)).unwrap();
        let err = transport.head(&format!("http://{}", addr)).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout(Duration::from_millis(200)));
    }
}
