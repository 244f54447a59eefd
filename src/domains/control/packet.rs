use super::RconError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;

/// id + type + the two NUL terminators.
const MIN_PAYLOAD_LEN: usize = 10;
const MAX_PAYLOAD_LEN: usize = 1 << 20;

/// One frame: `len:i32le | id:i32le | type:i32le | body | \0 | \0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn auth(id: i32, password: &str) -> Self {
        Self {
            id,
            kind: SERVERDATA_AUTH,
            body: password.to_string(),
        }
    }

    pub fn command(id: i32, command: &str) -> Self {
        Self {
            id,
            kind: SERVERDATA_EXECCOMMAND,
            body: command.to_string(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let payload_len = 4 + 4 + body.len() + 2;
        let mut buf = Vec::with_capacity(4 + payload_len);
        buf.extend_from_slice(&(payload_len as i32).to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    /// Decodes everything after the length prefix.
    pub fn decode_payload(payload: &[u8]) -> Result<Self, RconError> {
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(RconError::protocol(format!(
                "payload of {} bytes is shorter than the {MIN_PAYLOAD_LEN}-byte minimum",
                payload.len()
            )));
        }
        let terminator = &payload[payload.len() - 2..];
        if terminator != [0, 0] {
            return Err(RconError::protocol("payload is not NUL-NUL terminated"));
        }

        let id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let kind = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let body = String::from_utf8_lossy(&payload[8..payload.len() - 2]).into_owned();
        Ok(Self { id, kind, body })
    }
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), RconError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, RconError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await.map_err(eof_as_protocol)?;
    let declared = i32::from_le_bytes(prefix);
    if declared < MIN_PAYLOAD_LEN as i32 || declared as usize > MAX_PAYLOAD_LEN {
        return Err(RconError::protocol(format!(
            "declared payload length {declared} is out of range"
        )));
    }

    let mut payload = vec![0u8; declared as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(eof_as_protocol)?;
    Packet::decode_payload(&payload)
}

fn eof_as_protocol(err: std::io::Error) -> RconError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        RconError::protocol("connection closed mid-packet")
    } else {
        RconError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian_frame() {
        let bytes = Packet::command(7, "list").encode();
        assert_eq!(&bytes[0..4], &14i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &SERVERDATA_EXECCOMMAND.to_le_bytes());
        assert_eq!(&bytes[12..16], b"list");
        assert_eq!(&bytes[16..], &[0, 0]);
    }

    #[test]
    fn empty_body_is_minimum_frame() {
        let bytes = Packet::command(1, "").encode();
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[0..4], &10i32.to_le_bytes());
    }

    #[test]
    fn rejects_short_payload() {
        let err = Packet::decode_payload(&[1, 0, 0, 0, 2, 0]).unwrap_err();
        assert!(matches!(err, RconError::Protocol { .. }));
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1i32.to_le_bytes());
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(b"hi!!");
        let err = Packet::decode_payload(&payload).unwrap_err();
        assert!(matches!(err, RconError::Protocol { .. }));
    }

    #[tokio::test]
    async fn reads_frame_from_stream() {
        let encoded = Packet::command(42, "There are 0 of a max of 20 players online").encode();
        let mut reader = encoded.as_slice();
        let packet = read_packet(&mut reader).await.unwrap();
        assert_eq!(packet.id, 42);
        assert_eq!(packet.body, "There are 0 of a max of 20 players online");
    }

    #[tokio::test]
    async fn truncated_stream_is_protocol_error() {
        let encoded = Packet::command(42, "hello").encode();
        let mut reader = &encoded[..encoded.len() - 3];
        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, RconError::Protocol { .. }));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected_before_reading() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&i32::MAX.to_le_bytes());
        let mut reader = frame.as_slice();
        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, RconError::Protocol { .. }));
    }
}
