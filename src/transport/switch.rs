//! Transport-agnostic view of the switch side used by the session supervisor.
//! Concrete impls: the framed-TCP AudioSocket dialect and the RTP/UDP dialect.
//!
//! Split into reader/writer halves (rather than one combined trait) so the
//! frontend-reader and pacer tasks can each own one half concurrently,
//! mirroring how `AudioSocketReader`/`AudioSocketWriter` already split a TCP
//! stream.

use super::{audiosocket, rtp};
use crate::{
    error::{BridgeError, BridgeResult},
    frame::Frame,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::{TcpStream, UdpSocket};
use tracing::warn;

#[derive(Debug, Clone)]
pub enum SwitchEvent {
    Audio(Bytes),
    Identity(audiosocket::Identity),
    Hangup,
}

#[async_trait::async_trait]
pub trait SwitchReader: Send {
    async fn read_event(&mut self) -> BridgeResult<SwitchEvent>;
}

#[async_trait::async_trait]
pub trait SwitchWriter: Send {
    async fn write_frame(&mut self, frame: &Frame) -> BridgeResult<()>;
    async fn close(&mut self) -> BridgeResult<()>;
}

pub fn audiosocket_halves(stream: TcpStream) -> (impl SwitchReader, impl SwitchWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        AudioSocketReaderHalf(audiosocket::AudioSocketReader::new(read_half)),
        AudioSocketWriterHalf(audiosocket::AudioSocketWriter::new(write_half)),
    )
}

struct AudioSocketReaderHalf(audiosocket::AudioSocketReader<tokio::net::tcp::OwnedReadHalf>);
struct AudioSocketWriterHalf(audiosocket::AudioSocketWriter<tokio::net::tcp::OwnedWriteHalf>);

#[async_trait::async_trait]
impl SwitchReader for AudioSocketReaderHalf {
    async fn read_event(&mut self) -> BridgeResult<SwitchEvent> {
        loop {
            match self.0.read_message().await? {
                audiosocket::Message::Hangup => return Ok(SwitchEvent::Hangup),
                audiosocket::Message::Identity(payload) => {
                    return Ok(SwitchEvent::Identity(audiosocket::parse_identity(&payload)));
                }
                audiosocket::Message::Audio(payload) => return Ok(SwitchEvent::Audio(payload)),
            }
        }
    }
}

#[async_trait::async_trait]
impl SwitchWriter for AudioSocketWriterHalf {
    async fn write_frame(&mut self, frame: &Frame) -> BridgeResult<()> {
        self.0.write_audio(&frame.data).await
    }

    async fn close(&mut self) -> BridgeResult<()> {
        if let Err(e) = self.0.write_hangup().await {
            warn!("hangup write failed during teardown: {e}");
        }
        Ok(())
    }
}

/// RTP dialect: inbound audio only (no in-band identity or hangup framing;
/// call teardown for RTP calls is driven by the switch's control-plane
/// events, handled at the listener level, §4.8).
pub fn rtp_halves(socket: UdpSocket, peer: std::net::SocketAddr, samples_per_frame: u32) -> (impl SwitchReader, impl SwitchWriter) {
    let socket = Arc::new(socket);
    (
        RtpReaderHalf { socket: socket.clone() },
        RtpWriterHalf { socket, peer, session: rtp::RtpSession::new(samples_per_frame) },
    )
}

struct RtpReaderHalf {
    socket: Arc<UdpSocket>,
}

#[async_trait::async_trait]
impl SwitchReader for RtpReaderHalf {
    async fn read_event(&mut self) -> BridgeResult<SwitchEvent> {
        let mut buf = [0u8; 2048];
        let (len, _from) = self.socket.recv_from(&mut buf).await.map_err(BridgeError::IoError)?;
        let packet = rtp::parse(&buf[..len])?;
        Ok(SwitchEvent::Audio(Bytes::from(packet.payload)))
    }
}

struct RtpWriterHalf {
    socket: Arc<UdpSocket>,
    peer: std::net::SocketAddr,
    session: rtp::RtpSession,
}

#[async_trait::async_trait]
impl SwitchWriter for RtpWriterHalf {
    async fn write_frame(&mut self, frame: &Frame) -> BridgeResult<()> {
        let packet = self.session.packetize(&frame.data);
        self.socket.send_to(&packet, self.peer).await.map_err(BridgeError::IoError)?;
        Ok(())
    }

    async fn close(&mut self) -> BridgeResult<()> {
        Ok(())
    }
}
