//! Length-framed TCP dialect used by the telephony switch (§4.2).
//!
//! Wire format: `type:u8 | length:u16 BE | payload[length]`. The same framing
//! is used in both directions.

use crate::error::{BridgeError, BridgeResult};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const TYPE_HANGUP: u8 = 0x00;
pub const TYPE_IDENTITY: u8 = 0x01;
pub const TYPE_AUDIO: u8 = 0x10;

#[derive(Debug, Clone)]
pub enum Message {
    Hangup,
    Identity(Bytes),
    Audio(Bytes),
}

/// Parsed caller identity, however the switch chose to encode it.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub phone: Option<String>,
    pub name: Option<String>,
}

/// Accepts both the delimited ASCII form (`ast-<epoch>-<phone>[-<name>…]`)
/// and a raw 16-byte binary UUID, extracting `phone` as the last 12 hex
/// digits in the binary case.
pub fn parse_identity(payload: &[u8]) -> Identity {
    if payload.len() == 16 {
        let hex = hex::encode(payload);
        let phone = hex[hex.len() - 12..].to_owned();
        return Identity { phone: Some(phone), name: None };
    }

    let text = String::from_utf8_lossy(payload);
    let mut parts = text.split('-');
    let _prefix = parts.next();
    let _epoch = parts.next();
    let phone = parts.next().map(str::to_owned);
    let name = parts.next().map(str::to_owned);
    Identity { phone, name }
}

pub struct AudioSocketReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> AudioSocketReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads one framed message, skipping over any unknown non-zero frame
    /// types (logged at warning) rather than failing the whole connection
    /// (§4.2, §7). Returns `Truncated` on early EOF.
    pub async fn read_message(&mut self) -> BridgeResult<Message> {
        loop {
            let mut header = [0u8; 3];
            self.inner
                .read_exact(&mut header)
                .await
                .map_err(|_| BridgeError::Truncated)?;

            let msg_type = header[0];
            let length = u16::from_be_bytes([header[1], header[2]]) as usize;

            let mut payload = vec![0u8; length];
            if length > 0 {
                self.inner
                    .read_exact(&mut payload)
                    .await
                    .map_err(|_| BridgeError::Truncated)?;
            }
            let payload = Bytes::from(payload);

            match msg_type {
                TYPE_HANGUP => return Ok(Message::Hangup),
                TYPE_IDENTITY => return Ok(Message::Identity(payload)),
                TYPE_AUDIO => return Ok(Message::Audio(payload)),
                other => {
                    tracing::warn!("unknown AudioSocket frame type {other:#04x}, dropping and continuing");
                }
            }
        }
    }
}

pub struct AudioSocketWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> AudioSocketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_audio(&mut self, payload: &[u8]) -> BridgeResult<()> {
        self.write_frame(TYPE_AUDIO, payload).await
    }

    pub async fn write_hangup(&mut self) -> BridgeResult<()> {
        self.write_frame(TYPE_HANGUP, &[]).await
    }

    async fn write_frame(&mut self, msg_type: u8, payload: &[u8]) -> BridgeResult<()> {
        let mut header = [0u8; 3];
        header[0] = msg_type;
        header[1..3].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        self.inner.write_all(&header).await?;
        if !payload.is_empty() {
            self.inner.write_all(payload).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_audio_frame_roundtrip() {
        let mut buf = Vec::new();
        {
            let mut writer = AudioSocketWriter::new(&mut buf);
            writer.write_audio(&[1, 2, 3]).await.expect("write");
        }
        let mut reader = AudioSocketReader::new(Cursor::new(buf));
        match reader.read_message().await.expect("read") {
            Message::Audio(payload) => assert_eq!(&payload[..], &[1, 2, 3]),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_length_frame_is_legal() {
        let mut buf = Vec::new();
        {
            let mut writer = AudioSocketWriter::new(&mut buf);
            writer.write_hangup().await.expect("write");
        }
        let mut reader = AudioSocketReader::new(Cursor::new(buf));
        assert!(matches!(reader.read_message().await.expect("read"), Message::Hangup));
    }

    #[tokio::test]
    async fn unknown_frame_type_is_skipped_not_fatal() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0x7F, 0x00, 0x02, 0xAA, 0xBB]); // unknown type, 2-byte payload
        {
            let mut writer = AudioSocketWriter::new(&mut buf);
            writer.write_audio(&[9]).await.expect("write");
        }
        let mut reader = AudioSocketReader::new(Cursor::new(buf));
        match reader.read_message().await.expect("read") {
            Message::Audio(payload) => assert_eq!(&payload[..], &[9]),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let buf = vec![TYPE_AUDIO, 0x00, 0x0A]; // claims 10 bytes payload, has none
        let mut reader = AudioSocketReader::new(Cursor::new(buf));
        assert!(matches!(reader.read_message().await, Err(BridgeError::Truncated)));
    }

    #[test]
    fn identity_parses_delimited_ascii_form() {
        let identity = parse_identity(b"ast-1700000000000-447911223344");
        assert_eq!(identity.phone.as_deref(), Some("447911223344"));
    }

    #[test]
    fn identity_parses_binary_uuid_form() {
        let payload: [u8; 16] = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x44, 0x79, 0x11, 0x22, 0x33, 0x44, 0x00, 0x00,
        ];
        let identity = parse_identity(&payload);
        assert_eq!(identity.phone.as_deref(), Some(hex::encode(payload)[20..].to_owned().as_str()));
    }
}
