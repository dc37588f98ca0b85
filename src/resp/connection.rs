//! Async TCP connection speaking RESP.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{RedluaError, RedluaResult};
use crate::executor::{Command, Executor};
use crate::resp::{decoder, encoder};
use crate::value::Value;

/// One connection to a Redis server.
///
/// Requests are strictly sequential. After a [`RedluaError::Timeout`] the
/// reply of the abandoned request may still arrive, so the connection
/// should be dropped rather than reused.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    cluster: bool,
    resp3: bool,
    timeout: Option<Duration>,
}

impl Connection {
    /// Connect, and upgrade to RESP3 when the config asks for it and the
    /// server accepts `HELLO 3`. A server that refuses `HELLO` leaves the
    /// connection on RESP2; any other failure fails the connect.
    pub async fn connect(config: &ConnectionConfig) -> RedluaResult<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let timeout = config.timeout();
        let stream = with_deadline(timeout, TcpStream::connect(&addr))
            .await?
            .map_err(|e| RedluaError::Connection(format!("{}: {}", addr, e)))?;
        debug!("Connected to {} (cluster: {})", addr, config.cluster);

        let mut conn = Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            cluster: config.cluster,
            resp3: false,
            timeout,
        };
        if config.resp3 {
            match conn.upgrade_to_resp3().await {
                Ok(accepted) => conn.resp3 = accepted,
                Err(RedluaError::Server(message)) => debug!("HELLO 3 refused: {}", message),
                Err(e) => return Err(e),
            }
            debug!("RESP3 negotiated: {}", conn.resp3);
        }
        Ok(conn)
    }

    /// Whether the server accepted RESP3.
    pub fn is_resp3(&self) -> bool {
        self.resp3
    }

    async fn upgrade_to_resp3(&mut self) -> RedluaResult<bool> {
        let mut buf = BytesMut::with_capacity(64);
        encoder::encode_hello(&mut buf, 3);
        self.round_trip(&buf).await?;
        Ok(true)
    }

    /// Send raw request bytes and read one reply. Error replies surface as
    /// [`RedluaError::Server`].
    async fn round_trip(&mut self, bytes: &[u8]) -> RedluaResult<Value> {
        let timeout = self.timeout;
        let reply = with_deadline(timeout, async {
            self.stream.write_all(bytes).await?;
            self.read_response().await
        })
        .await??;

        match reply {
            Value::Error(message) => {
                warn!("Server error: {}", message);
                Err(RedluaError::Server(message))
            }
            other => Ok(other),
        }
    }

    async fn read_response(&mut self) -> RedluaResult<Value> {
        loop {
            if !self.read_buf.is_empty() {
                match decoder::decode(&self.read_buf) {
                    Ok((value, consumed)) => {
                        let _ = self.read_buf.split_to(consumed);
                        return Ok(value);
                    }
                    Err(RedluaError::Incomplete) => {}
                    Err(e) => return Err(e),
                }
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(RedluaError::Connection("Connection closed".into()));
            }
        }
    }
}

impl Executor for Connection {
    async fn execute(&mut self, command: Command) -> RedluaResult<Value> {
        if let Command::Eval { program } = &command {
            trace!("EVAL script:\n{}", program);
        }
        let bytes = encoder::encode(&command);
        self.round_trip(&bytes).await
    }

    fn is_cluster(&self) -> bool {
        self.cluster
    }
}

async fn with_deadline<F: std::future::Future>(timeout: Option<Duration>, fut: F) -> RedluaResult<F::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| RedluaError::Timeout),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one client and answer each request with the next canned reply.
    async fn serve(replies: Vec<&'static str>) -> ConnectionConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            for reply in replies {
                if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                    return;
                }
                socket.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        ConnectionConfig {
            host: "127.0.0.1".into(),
            port,
            resp3: false,
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_execute_hgetall() {
        let config = serve(vec!["*2\r\n$2\r\nid\r\n$1\r\n1\r\n"]).await;
        let mut conn = Connection::connect(&config).await.unwrap();
        let reply = conn
            .execute(Command::HGetAll {
                key: "customer:a:1".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply, Value::Array(vec![Value::bulk("id"), Value::bulk("1")]));
        assert!(!conn.is_cluster());
    }

    #[tokio::test]
    async fn test_error_reply_is_server_error() {
        let config = serve(vec!["-ERR wrong kind of value\r\n"]).await;
        let mut conn = Connection::connect(&config).await.unwrap();
        let err = conn
            .execute(Command::LLen {
                key: "customer".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RedluaError::Server(ref m) if m.contains("wrong kind")));
        assert!(err.is_transport());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_resp3_upgrade() {
        let mut config = serve(vec!["%1\r\n+proto\r\n:3\r\n", ":4\r\n"]).await;
        config.resp3 = true;
        let mut conn = Connection::connect(&config).await.unwrap();
        assert!(conn.is_resp3());
        let reply = conn.execute(Command::LLen { key: "t".into() }).await.unwrap();
        assert_eq!(reply, Value::Integer(4));
    }

    #[tokio::test]
    async fn test_resp3_refused_falls_back() {
        let mut config = serve(vec!["-ERR unknown command 'HELLO'\r\n", ":4\r\n"]).await;
        config.resp3 = true;
        let mut conn = Connection::connect(&config).await.unwrap();
        assert!(!conn.is_resp3());
        let reply = conn.execute(Command::LLen { key: "t".into() }).await.unwrap();
        assert_eq!(reply, Value::Integer(4));
    }

    #[tokio::test]
    async fn test_resp3_upgrade_transport_failure_fails_connect() {
        let mut config = serve(Vec::new()).await;
        config.resp3 = true;
        let err = Connection::connect(&config).await.err().unwrap();
        assert!(err.is_transport());
        assert!(!matches!(err, RedluaError::Server(_)));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let config = serve(Vec::new()).await;
        let mut conn = Connection::connect(&config).await.unwrap();
        let err = conn.execute(Command::LLen { key: "t".into() }).await.unwrap_err();
        assert!(err.is_transport());
    }
}
