//! Minimal MQTT 3.1.1 publisher client.
//!
//! Only what a fire-and-forget publisher needs is implemented:
//!
//! | Packet | Direction | Notes |
//! |---|---|---|
//! | `CONNECT` / `CONNACK` | out / in | clean session, no credentials |
//! | `PUBLISH` | out | QoS 0, no packet identifier |
//! | `PINGREQ` / `PINGRESP` | out / in | keepalive |
//! | `DISCONNECT` | out | on shutdown |
//!
//! Anything else the broker sends is read and ignored.

use async_trait::async_trait;
use keyslot_types::KeyslotError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, trace};

use crate::adapter::{BrokerConnector, BrokerLink, Heartbeat, LinkEvents, LinkSink};

pub const CONNECT: u8 = 0x10;
pub const CONNACK: u8 = 0x20;
pub const PUBLISH: u8 = 0x30;
pub const PINGREQ: u8 = 0xC0;
pub const PINGRESP: u8 = 0xD0;
pub const DISCONNECT: u8 = 0xE0;

/// Largest value the four-byte "remaining length" field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CLEAN_SESSION: u8 = 0x02;

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Append the variable-length "remaining length" encoding of `len`.
pub fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) -> Result<(), KeyslotError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(KeyslotError::Protocol(format!(
            "packet body of {len} bytes exceeds the MQTT limit"
        )));
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

fn put_str(s: &str, out: &mut Vec<u8>) -> Result<(), KeyslotError> {
    let len = u16::try_from(s.len())
        .map_err(|_| KeyslotError::Protocol(format!("string of {} bytes is too long", s.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn frame(header: u8, body: &[u8]) -> Result<Vec<u8>, KeyslotError> {
    let mut packet = Vec::with_capacity(body.len() + 5);
    packet.push(header);
    encode_remaining_length(body.len(), &mut packet)?;
    packet.extend_from_slice(body);
    Ok(packet)
}

/// Build a clean-session `CONNECT` packet.
pub fn encode_connect(client_id: &str, keep_alive_secs: u16) -> Result<Vec<u8>, KeyslotError> {
    let mut body = Vec::with_capacity(12 + client_id.len());
    put_str(PROTOCOL_NAME, &mut body)?;
    body.push(PROTOCOL_LEVEL);
    body.push(CLEAN_SESSION);
    body.extend_from_slice(&keep_alive_secs.to_be_bytes());
    put_str(client_id, &mut body)?;
    frame(CONNECT, &body)
}

/// Check that `topic` can name a `PUBLISH`: non-empty, no wildcards, and
/// short enough for a length-prefixed string.
///
/// # Errors
///
/// [`KeyslotError::Protocol`] describing the problem.
pub fn validate_topic(topic: &str) -> Result<(), KeyslotError> {
    if topic.is_empty() {
        return Err(KeyslotError::Protocol("publish topic is empty".to_string()));
    }
    if topic.contains(['+', '#']) {
        return Err(KeyslotError::Protocol(format!(
            "publish topic '{topic}' contains a wildcard"
        )));
    }
    if topic.len() > usize::from(u16::MAX) {
        return Err(KeyslotError::Protocol(format!(
            "publish topic of {} bytes is too long",
            topic.len()
        )));
    }
    Ok(())
}

/// Build a QoS-0 `PUBLISH` packet.
pub fn encode_publish(topic: &str, payload: &[u8]) -> Result<Vec<u8>, KeyslotError> {
    validate_topic(topic)?;
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    put_str(topic, &mut body)?;
    body.extend_from_slice(payload);
    frame(PUBLISH, &body)
}

pub fn encode_pingreq() -> [u8; 2] {
    [PINGREQ, 0x00]
}

pub fn encode_disconnect() -> [u8; 2] {
    [DISCONNECT, 0x00]
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Read one packet and return its fixed-header byte and body.
///
/// # Errors
///
/// [`KeyslotError::Transport`] on I/O failure or EOF,
/// [`KeyslotError::Protocol`] on a malformed length field.
pub async fn read_packet<R>(reader: &mut R) -> Result<(u8, Vec<u8>), KeyslotError>
where
    R: AsyncRead + Unpin,
{
    let header = reader.read_u8().await.map_err(io_error)?;

    let mut len = 0usize;
    let mut multiplier = 1usize;
    for i in 0..4 {
        let byte = reader.read_u8().await.map_err(io_error)?;
        len += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            break;
        }
        if i == 3 {
            return Err(KeyslotError::Protocol("malformed remaining length".to_string()));
        }
        multiplier *= 128;
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(io_error)?;
    Ok((header, body))
}

/// Interpret a `CONNACK` packet.
///
/// # Errors
///
/// [`KeyslotError::Protocol`] when the packet is not a `CONNACK` or the
/// broker refused the session.
pub fn check_connack(header: u8, body: &[u8]) -> Result<(), KeyslotError> {
    if header & 0xF0 != CONNACK || body.len() != 2 {
        return Err(KeyslotError::Protocol(format!(
            "expected CONNACK, got packet type 0x{header:02X} with {} body bytes",
            body.len()
        )));
    }
    match body[1] {
        0 => Ok(()),
        1 => Err(refused("unacceptable protocol version")),
        2 => Err(refused("identifier rejected")),
        3 => Err(refused("server unavailable")),
        4 => Err(refused("bad user name or password")),
        5 => Err(refused("not authorized")),
        code => Err(refused(&format!("return code {code}"))),
    }
}

fn refused(reason: &str) -> KeyslotError {
    KeyslotError::Protocol(format!("connection refused: {reason}"))
}

fn io_error(e: std::io::Error) -> KeyslotError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        KeyslotError::Transport("connection closed by broker".to_string())
    } else {
        KeyslotError::Transport(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────────────────────────────────────

/// Opens MQTT sessions to `host:port` over plain TCP.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    host: String,
    port: u16,
    client_id: String,
    keep_alive_secs: u16,
}

impl MqttConnector {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        client_id: impl Into<String>,
        keep_alive_secs: u16,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive_secs,
        }
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self) -> Result<BrokerLink, KeyslotError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| KeyslotError::Transport(format!("connect to {}: {e}", self.endpoint())))?;
        stream.set_nodelay(true).map_err(io_error)?;

        let connect = encode_connect(&self.client_id, self.keep_alive_secs)?;
        stream.write_all(&connect).await.map_err(io_error)?;

        let (header, body) = read_packet(&mut stream).await?;
        check_connack(header, &body)?;
        debug!(endpoint = %self.endpoint(), client_id = %self.client_id, "CONNACK accepted");

        let (reader, writer) = stream.into_split();
        let heartbeat = Heartbeat::new();
        Ok(BrokerLink {
            sink: Box::new(MqttSink { writer }),
            events: Box::new(MqttEvents {
                reader,
                heartbeat: heartbeat.clone(),
            }),
            heartbeat,
        })
    }

    fn endpoint(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}

struct MqttSink {
    writer: OwnedWriteHalf,
}

#[async_trait]
impl LinkSink for MqttSink {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), KeyslotError> {
        let packet = encode_publish(topic, payload)?;
        self.writer.write_all(&packet).await.map_err(io_error)?;
        self.writer.flush().await.map_err(io_error)
    }

    async fn ping(&mut self) -> Result<(), KeyslotError> {
        self.writer.write_all(&encode_pingreq()).await.map_err(io_error)
    }

    async fn disconnect(&mut self) -> Result<(), KeyslotError> {
        self.writer.write_all(&encode_disconnect()).await.map_err(io_error)?;
        self.writer.shutdown().await.map_err(io_error)
    }
}

struct MqttEvents {
    reader: OwnedReadHalf,
    heartbeat: Heartbeat,
}

#[async_trait]
impl LinkEvents for MqttEvents {
    async fn closed(&mut self) -> KeyslotError {
        loop {
            let (header, body) = match read_packet(&mut self.reader).await {
                Ok(packet) => packet,
                Err(e) => return e,
            };
            self.heartbeat.beat();
            if header & 0xF0 == PINGRESP {
                trace!("PINGRESP");
            } else {
                debug!(packet_type = header >> 4, len = body.len(), "ignoring inbound packet");
            }
        }
    }
}
