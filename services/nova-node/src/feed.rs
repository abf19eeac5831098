//! Line-delimited TCP alert feed.
//!
//! The broker gateway speaks a minimal framing: one JSON envelope per
//! line, `{"topic": "...", "payload": {...}}`. Unparseable lines are
//! skipped; a closed or broken stream surfaces as a connection loss so
//! the ingestor's reconnect loop takes over.

use async_trait::async_trait;
use chrono::Utc;
use nova_ingest::{AlertFeed, FeedError, RawNotice};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct NoticeEnvelope {
    topic: String,
    payload: serde_json::Value,
}

pub struct SocketAlertFeed {
    addr: String,
    lines: Option<Lines<BufReader<TcpStream>>>,
}

impl SocketAlertFeed {
    pub fn new(addr: String) -> Self {
        Self { addr, lines: None }
    }
}

#[async_trait]
impl AlertFeed for SocketAlertFeed {
    async fn connect(&mut self) -> Result<(), FeedError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|err| FeedError::ConnectionLost(err.to_string()))?;
        info!(addr = %self.addr, "alert feed connected");
        self.lines = Some(BufReader::new(stream).lines());
        Ok(())
    }

    async fn next_notice(&mut self) -> Result<RawNotice, FeedError> {
        loop {
            let lines = self
                .lines
                .as_mut()
                .ok_or_else(|| FeedError::ConnectionLost("not connected".to_string()))?;
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<NoticeEnvelope>(&line) {
                        Ok(envelope) => {
                            let payload =
                                serde_json::to_vec(&envelope.payload).unwrap_or_default();
                            return Ok(RawNotice {
                                topic: envelope.topic,
                                payload,
                                received_at: Utc::now(),
                            });
                        }
                        Err(err) => warn!(error = %err, "unparseable feed line skipped"),
                    }
                }
                Ok(None) => {
                    self.lines = None;
                    return Err(FeedError::ConnectionLost("stream ended".to_string()));
                }
                Err(err) => {
                    self.lines = None;
                    return Err(FeedError::ConnectionLost(err.to_string()));
                }
            }
        }
    }
}
