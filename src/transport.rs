// src/transport.rs - Inbound frame stream from the sensor bridge
//
// Frames arrive one JSON object per line:
//   {"event": "bodyData", "state": "<json>", "positions": "<json>"}
// Readers run on their own task and hand whole frames to the tick loop over a
// channel, so the joint store is never touched from two places at once.
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::TransportConfig;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameMessage {
    pub event: String,
    #[serde(default, deserialize_with = "json_text")]
    pub state: String,
    #[serde(default, deserialize_with = "json_text")]
    pub positions: String,
}

/// Accept a payload either as an encoded string or as inline JSON.
fn json_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { peer: String },
    Frame(FrameMessage),
    Disconnected { reason: String },
    Error(String),
}

/// Decode one line. Frames for other event names yield `Ok(None)`.
pub fn decode_line(line: &str, event_name: &str) -> Result<Option<FrameMessage>> {
    let frame: FrameMessage = serde_json::from_str(line)?;
    Ok((frame.event == event_name).then_some(frame))
}

/// Forward every frame from `reader` until EOF, a read error, or the
/// receiver going away. Undecodable lines are logged and skipped.
pub async fn read_frames<R>(reader: R, event_name: &str, tx: &mpsc::Sender<TransportEvent>) -> u64
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0u64;

    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_line(&line, event_name) {
                    Ok(Some(frame)) => {
                        if tx.send(TransportEvent::Frame(frame)).await.is_err() {
                            return forwarded;
                        }
                        forwarded += 1;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Dropping undecodable line: {}", e),
                }
            }
            Ok(None) => break "end of stream".to_string(),
            Err(e) => {
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                break format!("read error: {}", e);
            }
        }
    };

    let _ = tx.send(TransportEvent::Disconnected { reason }).await;
    forwarded
}

/// Connect to the sensor bridge and stream its frames into `tx`.
pub async fn stream_tcp(config: &TransportConfig, tx: mpsc::Sender<TransportEvent>) -> u64 {
    let addr = format!("{}:{}", config.host, config.port);
    match TcpStream::connect(&addr).await {
        Ok(stream) => {
            info!("Connected to sensor bridge at {}", addr);
            if tx.send(TransportEvent::Connected { peer: addr }).await.is_err() {
                return 0;
            }
            read_frames(BufReader::new(stream), &config.event_name, &tx).await
        }
        Err(e) => {
            let _ = tx.send(TransportEvent::Error(format!("connect to {} failed: {}", addr, e))).await;
            let _ = tx
                .send(TransportEvent::Disconnected { reason: "connection refused".to_string() })
                .await;
            0
        }
    }
}

/// Keep a live connection to the sensor bridge for as long as anyone is
/// listening on `tx`, reconnecting with exponential backoff after every
/// drop. Returns the total number of frames forwarded.
pub async fn stream_tcp_reconnecting(config: &TransportConfig, tx: mpsc::Sender<TransportEvent>) -> u64 {
    let initial = Duration::from_millis(config.reconnect_initial_ms);
    let max = Duration::from_millis(config.reconnect_max_ms);
    let mut delay = initial;
    let mut total = 0u64;

    while !tx.is_closed() {
        let forwarded = stream_tcp(config, tx.clone()).await;
        total += forwarded;
        if tx.is_closed() {
            break;
        }

        if forwarded > 0 {
            delay = initial;
        }
        info!("Reconnecting to sensor bridge in {:?}", delay);
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(max);
    }
    total
}

/// Replay a recorded session file into `tx`.
pub async fn replay_file(path: &Path, event_name: &str, tx: mpsc::Sender<TransportEvent>) -> Result<u64> {
    let file = tokio::fs::File::open(path).await?;
    let peer = path.display().to_string();
    if tx.send(TransportEvent::Connected { peer }).await.is_err() {
        return Ok(0);
    }
    Ok(read_frames(BufReader::new(file), event_name, &tx).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_decode_string_payloads() {
        let line = r#"{"event": "bodyData", "state": "{\"HandLeftState\": 3}", "positions": "{\"Head\": [1, 2]}"}"#;
        let frame = decode_line(line, "bodyData").unwrap().unwrap();
        assert_eq!(frame.state, r#"{"HandLeftState": 3}"#);
        assert_eq!(frame.positions, r#"{"Head": [1, 2]}"#);
    }

    #[test]
    fn test_decode_inline_payloads() {
        let line = r#"{"event": "bodyData", "state": {"HandLeftState": 3}, "positions": {"Head": [1, 2]}}"#;
        let frame = decode_line(line, "bodyData").unwrap().unwrap();
        let state: Value = serde_json::from_str(&frame.state).unwrap();
        assert_eq!(state["HandLeftState"], 3);
        let positions: Value = serde_json::from_str(&frame.positions).unwrap();
        assert_eq!(positions["Head"][1], 2);
    }

    #[test]
    fn test_decode_filters_events() {
        let line = r#"{"event": "faceData", "state": "", "positions": ""}"#;
        assert!(decode_line(line, "bodyData").unwrap().is_none());
        assert!(decode_line("{not json", "bodyData").is_err());
    }

    #[tokio::test]
    async fn test_read_frames_skips_bad_lines() {
        let input = concat!(
            r#"{"event": "bodyData", "state": "", "positions": "{\"Head\": [1, 2]}"}"#,
            "\n",
            "garbage\n",
            "\n",
            r#"{"event": "other", "state": "", "positions": ""}"#,
            "\n",
            r#"{"event": "bodyData", "positions": "{\"Head\": [3, 4]}"}"#,
            "\n",
        );
        let (tx, mut rx) = mpsc::channel(16);

        let forwarded = read_frames(input.as_bytes(), "bodyData", &tx).await;
        drop(tx);
        assert_eq!(forwarded, 2);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TransportEvent::Frame(_)));
        match &events[1] {
            TransportEvent::Frame(frame) => {
                assert_eq!(frame.state, "");
                assert_eq!(frame.positions, r#"{"Head": [3, 4]}"#);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events[2],
            TransportEvent::Disconnected { reason: "end of stream".to_string() }
        );
    }

    #[tokio::test]
    async fn test_reconnects_after_bridge_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = TransportConfig {
            port: listener.local_addr().unwrap().port(),
            reconnect_initial_ms: 10,
            reconnect_max_ms: 20,
            ..TransportConfig::default()
        };
        let (tx, mut rx) = mpsc::channel(32);
        let reader = tokio::spawn(async move { stream_tcp_reconnecting(&config, tx).await });

        for _ in 0..2 {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"{\"event\": \"bodyData\", \"positions\": {\"Head\": [1, 2]}}\n")
                .await
                .unwrap();
        }

        let mut connects = 0;
        let mut frames = 0;
        let mut disconnects = 0;
        while connects < 2 || frames < 2 || disconnects < 1 {
            match rx.recv().await.unwrap() {
                TransportEvent::Connected { .. } => connects += 1,
                TransportEvent::Frame(_) => frames += 1,
                TransportEvent::Disconnected { .. } => disconnects += 1,
                TransportEvent::Error(_) => {}
            }
        }
        assert!(!reader.is_finished());
        reader.abort();
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_once_receiver_is_gone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = TransportConfig {
            port,
            reconnect_initial_ms: 5,
            reconnect_max_ms: 10,
            ..TransportConfig::default()
        };
        let (tx, mut rx) = mpsc::channel(4);
        let reader = tokio::spawn(async move { stream_tcp_reconnecting(&config, tx).await });

        assert!(matches!(rx.recv().await, Some(TransportEvent::Error(_))));
        drop(rx);
        assert_eq!(reader.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replay_missing_file_errors() {
        let (tx, _rx) = mpsc::channel(1);
        assert!(replay_file(Path::new("/no/such/session.jsonl"), "bodyData", tx).await.is_err());
    }
}
