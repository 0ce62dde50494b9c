//! TCP connection to one proxy
//!
//! A `ProxyConnection` owns a single keep-alive stream. Requests are written
//! whole and responses are read as an HTTP-style head followed by exactly
//! `Content-Length` body bytes, so the stream stays aligned for the next
//! exchange. Every socket operation is bounded by the caller's timeout.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::protocol::{McmpResponse, ResponseHead};
use crate::{McmpError, Result};

/// Upper bound on a response head line
const MAX_LINE: usize = 8 * 1024;

/// Upper bound on a response body; INFO and DUMP answers stay far below it
const MAX_BODY: usize = 16 * 1024 * 1024;

/// Keep-alive connection to a proxy's management endpoint
pub struct ProxyConnection {
    stream: BufReader<TcpStream>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    connected_at: Instant,
    /// Cleared when the proxy answers `Connection: close`
    reusable: bool,
    pub(crate) exchanges: u64,
    pub(crate) bytes_sent: u64,
    pub(crate) bytes_received: u64,
}

impl ProxyConnection {
    /// Connect to `remote`, optionally from a fixed local address
    pub async fn connect(
        remote: SocketAddr,
        bind_address: Option<SocketAddr>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        debug!("Connecting to proxy at {}", remote);

        let connect = async {
            match bind_address {
                Some(local) => {
                    let socket = if local.is_ipv4() {
                        TcpSocket::new_v4()?
                    } else {
                        TcpSocket::new_v6()?
                    };
                    socket.bind(local)?;
                    socket.connect(remote).await
                }
                None => TcpStream::connect(remote).await,
            }
        };

        let stream = timeout(connect_timeout, connect)
            .await
            .map_err(|_| McmpError::timeout("TCP connect", connect_timeout.as_millis() as u64))?
            .map_err(|e| {
                McmpError::connection_with_source("Failed to connect to proxy", Some(remote), e)
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let local_addr = stream.local_addr().map_err(|e| {
            McmpError::network_with_source("Failed to get local address", e)
        })?;

        info!(proxy = %remote, local = %local_addr, "Connected to proxy");

        Ok(Self {
            stream: BufReader::new(stream),
            peer_addr: remote,
            local_addr,
            connected_at: Instant::now(),
            reusable: true,
            exchanges: 0,
            bytes_sent: 0,
            bytes_received: 0,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local end of the connection, the address the proxy sees us on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Write one encoded request and read its response
    pub async fn exchange(&mut self, request: &[u8], io_timeout: Duration) -> Result<McmpResponse> {
        let timeout_ms = io_timeout.as_millis() as u64;

        timeout(io_timeout, self.write_request(request))
            .await
            .map_err(|_| McmpError::timeout("MCMP write", timeout_ms))??;

        let response = timeout(io_timeout, self.read_response())
            .await
            .map_err(|_| McmpError::timeout("MCMP read", timeout_ms))??;

        self.exchanges += 1;
        Ok(response)
    }

    async fn write_request(&mut self, request: &[u8]) -> Result<()> {
        let stream = self.stream.get_mut();
        stream
            .write_all(request)
            .await
            .map_err(|e| McmpError::network_with_source("Failed to write request", e))?;
        stream
            .flush()
            .await
            .map_err(|e| McmpError::network_with_source("Failed to flush TCP stream", e))?;

        self.bytes_sent += request.len() as u64;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<McmpResponse> {
        let status_line = self.read_line().await?.ok_or_else(|| {
            McmpError::connection("Proxy closed the connection", Some(self.peer_addr))
        })?;
        let mut head = ResponseHead::from_status_line(&status_line)?;

        loop {
            let line = self.read_line().await?.ok_or_else(|| {
                McmpError::protocol("Connection closed inside response head")
            })?;
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("Connection")
                    && value.trim().eq_ignore_ascii_case("close")
                {
                    self.reusable = false;
                }
            }
            head.apply_header(&line)?;
        }

        if head.content_length > MAX_BODY {
            self.reusable = false;
            return Err(McmpError::protocol(format!(
                "Response body of {} bytes exceeds the {} byte limit",
                head.content_length, MAX_BODY
            )));
        }
        let mut body = vec![0u8; head.content_length];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| McmpError::network_with_source("Failed to read response body", e))?;
        self.bytes_received += body.len() as u64;

        debug!(
            proxy = %self.peer_addr,
            status = head.status,
            bytes = body.len(),
            "Received proxy response"
        );

        Ok(McmpResponse {
            head,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    /// One CRLF-terminated line without the terminator; `None` on EOF
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = Vec::new();
        let read = (&mut self.stream)
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| McmpError::network_with_source("Failed to read response", e))?;

        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with(b"\n") {
            return Err(McmpError::protocol("Response line too long or truncated"));
        }
        self.bytes_received += read as u64;

        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Shut the write half down; errors are logged and ignored
    pub async fn close(mut self) {
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!("Error shutting down proxy connection: {}", e);
        }
        debug!(
            proxy = %self.peer_addr,
            exchanges = self.exchanges,
            bytes_sent = self.bytes_sent,
            bytes_received = self.bytes_received,
            age_ms = self.age().as_millis() as u64,
            "Closed proxy connection"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

    #[tokio::test]
    async fn test_exchange_keeps_stream_aligned() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            for _ in 0..2 {
                let _ = socket.read(&mut buf).await.unwrap();
                socket.write_all(OK).await.unwrap();
            }
        });

        let mut connection = ProxyConnection::connect(addr, None, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(connection.local_addr().ip(), addr.ip());

        for _ in 0..2 {
            let response = connection
                .exchange(b"PING / HTTP/1.1\r\n\r\n", Duration::from_secs(2))
                .await
                .unwrap();
            assert_eq!(response.body, "ok");
        }
        assert_eq!(connection.exchanges, 2);
        assert!(connection.is_reusable());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut connection = ProxyConnection::connect(addr, None, Duration::from_secs(2))
            .await
            .unwrap();
        let result = connection
            .exchange(b"INFO / HTTP/1.1\r\n\r\n", Duration::from_secs(2))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(socket);
        });

        let mut connection = ProxyConnection::connect(addr, None, Duration::from_secs(2))
            .await
            .unwrap();
        let err = connection
            .exchange(b"INFO / HTTP/1.1\r\n\r\n", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McmpError::Timeout { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_content_length_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\n")
                .await
                .unwrap();
        });

        let mut connection = ProxyConnection::connect(addr, None, Duration::from_secs(2))
            .await
            .unwrap();
        let err = connection
            .exchange(b"INFO / HTTP/1.1\r\n\r\n", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, McmpError::Protocol { .. }));
        assert!(!connection.is_reusable());
    }

    #[tokio::test]
    async fn test_connection_close_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let mut connection = ProxyConnection::connect(addr, None, Duration::from_secs(2))
            .await
            .unwrap();
        connection
            .exchange(b"PING / HTTP/1.1\r\n\r\n", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!connection.is_reusable());
    }
}
