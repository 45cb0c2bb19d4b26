//! Lumberjack v2 client
//!
//! Frames a batch the way Beats does: a window frame announcing the batch
//! size, then the JSON data frames, zlib-compressed into a single
//! compressed frame unless compression is disabled. The server acknowledges
//! with ACK frames carrying the highest sequence number received.

use super::{Connector, OutputConnection, TransportError};
use async_trait::async_trait;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const PROTOCOL_VERSION: u8 = b'2';
const FRAME_WINDOW: u8 = b'W';
const FRAME_COMPRESSED: u8 = b'C';
const FRAME_JSON: u8 = b'J';
const FRAME_ACK: u8 = b'A';

/// Transport settings
#[derive(Debug, Clone)]
pub struct LumberjackConfig {
    /// Timeout for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Timeout for writing a batch and receiving its ACK
    pub send_timeout: Duration,
    /// zlib level 0-9; 0 sends uncompressed data frames
    pub compression_level: u32,
}

impl Default for LumberjackConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(30),
            compression_level: 3,
        }
    }
}

/// Encode a window frame followed by the data frames for `events`.
pub fn encode_batch(events: &[Vec<u8>], compression_level: u32) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    for (i, event) in events.iter().enumerate() {
        data.extend_from_slice(&[PROTOCOL_VERSION, FRAME_JSON]);
        data.extend_from_slice(&((i + 1) as u32).to_be_bytes());
        data.extend_from_slice(&(event.len() as u32).to_be_bytes());
        data.extend_from_slice(event);
    }

    let mut frame = Vec::with_capacity(data.len() + 16);
    frame.extend_from_slice(&[PROTOCOL_VERSION, FRAME_WINDOW]);
    frame.extend_from_slice(&(events.len() as u32).to_be_bytes());

    if compression_level == 0 {
        frame.extend_from_slice(&data);
        return Ok(frame);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(compression_level.min(9)));
    encoder.write_all(&data)?;
    let compressed = encoder.finish()?;

    frame.extend_from_slice(&[PROTOCOL_VERSION, FRAME_COMPRESSED]);
    frame.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    frame.extend_from_slice(&compressed);
    Ok(frame)
}

/// Dials lumberjack listeners over plain TCP
#[derive(Debug, Clone, Default)]
pub struct LumberjackConnector {
    config: LumberjackConfig,
}

impl LumberjackConnector {
    pub fn new(config: LumberjackConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for LumberjackConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn OutputConnection>, TransportError> {
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(host))
            .await
            .map_err(|_| TransportError::Timeout(self.config.connect_timeout))??;
        stream.set_nodelay(true)?;

        debug!(host = %host, "Dialed lumberjack host");
        Ok(Box::new(LumberjackConnection {
            stream,
            config: self.config.clone(),
        }))
    }
}

/// An open lumberjack session
pub struct LumberjackConnection {
    stream: TcpStream,
    config: LumberjackConfig,
}

impl LumberjackConnection {
    async fn write_and_ack(&mut self, events: &[Vec<u8>]) -> Result<(), TransportError> {
        let frame = encode_batch(events, self.config.compression_level)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;

        let expected = events.len() as u32;
        loop {
            let mut header = [0u8; 6];
            self.stream.read_exact(&mut header).await?;
            if header[0] != PROTOCOL_VERSION || header[1] != FRAME_ACK {
                return Err(TransportError::Protocol(format!(
                    "unexpected frame {:?}{:?}",
                    header[0] as char, header[1] as char
                )));
            }

            let seq = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
            if seq == expected {
                return Ok(());
            }
            if seq > expected {
                return Err(TransportError::Protocol(format!(
                    "ack {} beyond window of {}",
                    seq, expected
                )));
            }
            // Partial ack or keepalive; keep waiting
        }
    }
}

#[async_trait]
impl OutputConnection for LumberjackConnection {
    async fn send_batch(&mut self, events: &[Vec<u8>]) -> Result<(), TransportError> {
        if events.is_empty() {
            return Ok(());
        }

        let send_timeout = self.config.send_timeout;
        timeout(send_timeout, self.write_and_ack(events))
            .await
            .map_err(|_| TransportError::Timeout(send_timeout))?
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
