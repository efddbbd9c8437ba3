//! InfluxDB 1.x sink.
//!
//! Batches are encoded as line protocol and posted to `/write` with second
//! precision. `init` issues an idempotent `CREATE DATABASE`.
//!
//! # Configuration
//!
//! ```toml
//! [influx]
//! host = "127.0.0.1"
//! port = 8086
//! database = "venus"
//! timeout_secs = 5
//! ```
//!
//! Credentials, when needed, come from `GRIDSTREAM_INFLUX_USERNAME` and
//! `GRIDSTREAM_INFLUX_PASSWORD`.

use crate::error::SinkError;
use crate::point::Point;
use crate::storage::WriteSink;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::{debug, info};

/// Connection options for [`InfluxSink`].
#[derive(Debug, Clone)]
pub struct InfluxOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for InfluxOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8086,
            database: "venus".to_string(),
            timeout: Duration::from_secs(5),
            username: None,
            password: None,
        }
    }
}

pub struct InfluxSink {
    client: Client,
    base_url: String,
    options: InfluxOptions,
}

impl InfluxSink {
    pub fn new(options: InfluxOptions) -> Result<Self, SinkError> {
        if options.database.is_empty() {
            return Err(SinkError::Fatal("database name must not be empty".to_string()));
        }
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("http://{}:{}", options.host, options.port),
            options,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.options.username {
            Some(user) => request.basic_auth(user, self.options.password.as_ref()),
            None => request,
        }
    }
}

/// Joins the line-protocol encoding of every point.
pub fn encode_batch(points: &[Point]) -> String {
    points
        .iter()
        .map(Point::to_line_protocol)
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl WriteSink for InfluxSink {
    async fn init(&self) -> Result<(), SinkError> {
        let statement = format!("CREATE DATABASE \"{}\"", self.options.database);
        let request = self
            .client
            .post(format!("{}/query", self.base_url))
            .query(&[("q", statement.as_str())]);
        self.authorize(request).send().await?.error_for_status()?;
        info!("Using influx database {} at {}", self.options.database, self.base_url);
        Ok(())
    }

    async fn write_points(&self, points: Vec<Point>) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = encode_batch(&points);
        let request = self
            .client
            .post(format!("{}/write", self.base_url))
            .query(&[("db", self.options.database.as_str()), ("precision", "s")])
            .body(body);
        self.authorize(request).send().await?.error_for_status()?;
        debug!("Wrote {} points to influx", points.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Tags;
    use chrono::{TimeZone, Utc};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    /// Answers every request on a local port with `status` and an empty body.
    async fn store_answering(status: &'static str) -> InfluxSink {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    read_request(&mut socket).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        InfluxSink::new(InfluxOptions {
            port,
            timeout: Duration::from_secs(2),
            ..InfluxOptions::default()
        })
        .unwrap()
    }

    /// Reads the request head and as much body as `Content-Length` announces.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn sample() -> Vec<Point> {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let tags = Tags {
            source_id: "c0619ab1".to_string(),
            device_path: "system".to_string(),
            instance_number: "0".to_string(),
        };
        vec![Point::numeric("Dc.Battery.Soc", tags, ts, 81.5)]
    }

    #[tokio::test]
    async fn test_successful_write_and_init() {
        let sink = store_answering("204 No Content").await;
        assert_ok!(sink.init().await);
        assert_ok!(sink.write_points(sample()).await);
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        for status in ["401 Unauthorized", "403 Forbidden"] {
            let sink = store_answering(status).await;
            let err = sink.write_points(sample()).await.unwrap_err();
            assert!(matches!(err, SinkError::Fatal(_)), "{} gave {:?}", status, err);
        }
    }

    #[tokio::test]
    async fn test_bad_request_is_rejected() {
        for status in ["400 Bad Request", "404 Not Found"] {
            let sink = store_answering(status).await;
            let err = sink.write_points(sample()).await.unwrap_err();
            assert!(matches!(err, SinkError::Rejected(_)), "{} gave {:?}", status, err);
        }
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        for status in ["500 Internal Server Error", "503 Service Unavailable"] {
            let sink = store_answering(status).await;
            let err = sink.write_points(sample()).await.unwrap_err();
            assert!(matches!(err, SinkError::Transient(_)), "{} gave {:?}", status, err);
            assert!(!err.is_fatal());
        }
    }

    #[tokio::test]
    async fn test_init_failure_is_classified() {
        let sink = store_answering("401 Unauthorized").await;
        assert!(sink.init().await.unwrap_err().is_fatal());
    }

    #[test]
    fn test_base_url() {
        let sink = InfluxSink::new(InfluxOptions {
            host: "influx.local".to_string(),
            port: 8087,
            ..InfluxOptions::default()
        })
        .unwrap();
        assert_eq!(sink.base_url(), "http://influx.local:8087");
    }

    #[test]
    fn test_empty_database_is_fatal() {
        let result = InfluxSink::new(InfluxOptions {
            database: String::new(),
            ..InfluxOptions::default()
        });
        assert!(matches!(result, Err(SinkError::Fatal(_))));
    }

    #[test]
    fn test_encode_batch() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let tags = Tags {
            source_id: "c0619ab1".to_string(),
            device_path: "system".to_string(),
            instance_number: "0".to_string(),
        };
        let batch = vec![
            Point::numeric("Dc.Battery.Soc", tags.clone(), ts, 81.5),
            Point::text("SystemState.State", tags, ts, "Bulk"),
        ];
        assert_eq!(
            encode_batch(&batch),
            "Dc.Battery.Soc,instanceNumber=0,path=system,portalId=c0619ab1 value=81.5 1714564800\n\
             SystemState.State,instanceNumber=0,path=system,portalId=c0619ab1 text=\"Bulk\" 1714564800"
        );
    }

    #[tokio::test]
    async fn test_write_to_unreachable_store_is_transient() {
        let sink = InfluxSink::new(InfluxOptions {
            port: 1,
            timeout: Duration::from_millis(500),
            ..InfluxOptions::default()
        })
        .unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let tags = Tags {
            source_id: "c0619ab1".to_string(),
            device_path: "system".to_string(),
            instance_number: "0".to_string(),
        };
        let err = sink
            .write_points(vec![Point::numeric("Soc", tags, ts, 1.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Transient(_)));
    }
}
