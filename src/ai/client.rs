//! WebSocket transport to the AI voice service (§4.5).

use super::protocol::{InboundMessage, OutboundMessage};
use crate::{
    config::AiConfig,
    error::{BridgeError, BridgeResult},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{Message as WsMessage, client::IntoClientRequest, http::header},
};
use tracing::{instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One event surfaced to the session supervisor from the AI socket: either a
/// parsed envelope or raw outbound PCM16 audio (binary frame or `audio_delta`).
#[derive(Debug, Clone)]
pub enum AiEvent {
    Envelope(InboundMessage),
    /// Outbound PCM16 audio; `priority` is set for `address_tts` splices.
    Audio { pcm16_le: Vec<u8>, priority: bool },
    /// Reply to an application-level liveness ping (§5).
    Pong,
}

/// Sending half. Shared (behind a `tokio::sync::Mutex`, same pattern as the
/// outbound queue, §5) between the frontend-reader (inbound audio, barge-in)
/// and the ai-reader (tool results) tasks.
pub struct AiSender {
    sink: SplitSink<WsStream, WsMessage>,
}

/// Receiving half, owned solely by the ai-reader task.
pub struct AiReceiver {
    stream: SplitStream<WsStream>,
}

#[instrument(skip(config))]
pub async fn connect(config: &AiConfig) -> BridgeResult<(AiSender, AiReceiver)> {
    let mut request = config.ws_url.as_str().into_client_request()?;
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", config.api_key)
            .parse()
            .map_err(|_| BridgeError::ProtocolError("invalid API key header value".to_owned()))?,
    );

    let (ws, _response) = tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| BridgeError::ProtocolError("AI connect timed out".to_owned()))??;

    let (sink, stream) = ws.split();
    Ok((AiSender { sink }, AiReceiver { stream }))
}

impl AiSender {
    pub async fn send_init(&mut self, call_id: &str, phone: Option<String>, name: Option<String>, resume: bool) -> BridgeResult<()> {
        self.send_json(&OutboundMessage::Init { call_id: call_id.to_owned(), phone, name, resume }).await
    }

    pub async fn send_update_phone(&mut self, phone: String, name: Option<String>) -> BridgeResult<()> {
        self.send_json(&OutboundMessage::UpdatePhone { phone, name }).await
    }

    /// Sends inbound PCM16 as base64 JSON. Byte-identical payload to the
    /// binary-frame path; the encoding is a build-time toggle (§4.5).
    pub async fn send_audio(&mut self, pcm16_le: &[u8]) -> BridgeResult<()> {
        let audio = BASE64.encode(pcm16_le);
        self.send_json(&OutboundMessage::Audio { audio }).await
    }

    /// Barge-in: ask the AI to stop producing the in-flight response.
    pub async fn cancel_response(&mut self) -> BridgeResult<()> {
        self.send_json(&OutboundMessage::CancelResponse {}).await
    }

    /// Always sent strictly before any next-turn trigger the caller implies
    /// (§4.5, §9).
    pub async fn send_tool_result(&mut self, call_id: &str, result: serde_json::Value) -> BridgeResult<()> {
        self.send_json(&OutboundMessage::ToolResult { call_id: call_id.to_owned(), result }).await
    }

    /// Short silence warmup sent before the greeting is triggered, to
    /// stabilize server-side VAD on the very first turn (§4.5).
    pub async fn send_warmup_silence(&mut self, silence_bytes: &[u8]) -> BridgeResult<()> {
        self.send_audio(silence_bytes).await
    }

    pub async fn send_session_update(&mut self, config: &AiConfig) -> BridgeResult<()> {
        let payload = json!({
            "type": "session.update",
            "model": config.model,
            "voice": config.voice,
            "instructions": config.system_prompt,
            "turn_detection": {
                "threshold": config.vad_threshold,
                "prefix_padding_ms": config.vad_prefix_padding_ms,
                "silence_duration_ms": config.vad_silence_duration_ms,
            },
        });
        self.sink.send(WsMessage::Text(payload.to_string().into())).await?;
        Ok(())
    }

    pub async fn trigger_response(&mut self) -> BridgeResult<()> {
        self.sink.send(WsMessage::Text(json!({"type": "response.create"}).to_string().into())).await?;
        Ok(())
    }

    async fn send_json(&mut self, message: &OutboundMessage) -> BridgeResult<()> {
        let text = serde_json::to_string(message)?;
        self.sink.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> BridgeResult<()> {
        self.sink.close().await?;
        Ok(())
    }

    /// Application-level liveness probe, independent of tungstenite's own
    /// protocol framing (§5: ping interval ≈5-20s, ping timeout ≈10-20s).
    pub async fn send_ping(&mut self) -> BridgeResult<()> {
        self.sink.send(WsMessage::Ping(Vec::new().into())).await?;
        Ok(())
    }
}

impl AiReceiver {
    /// Receives the next event, decoding binary audio frames or JSON
    /// envelopes (with an `Unknown` fallback for unrecognized types).
    pub async fn recv(&mut self) -> BridgeResult<Option<AiEvent>> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };
            let message = message?;
            match message {
                WsMessage::Binary(bytes) => return Ok(Some(AiEvent::Audio { pcm16_le: bytes.to_vec(), priority: false })),
                WsMessage::Text(text) => match serde_json::from_str::<InboundMessage>(&text) {
                    Ok(InboundMessage::AudioDelta { delta }) => match BASE64.decode(delta) {
                        Ok(bytes) => return Ok(Some(AiEvent::Audio { pcm16_le: bytes, priority: false })),
                        Err(e) => {
                            warn!("dropping audio_delta with invalid base64: {e}");
                            continue;
                        }
                    },
                    Ok(InboundMessage::AddressTts { audio }) => match BASE64.decode(audio) {
                        Ok(bytes) => return Ok(Some(AiEvent::Audio { pcm16_le: bytes, priority: true })),
                        Err(e) => {
                            warn!("dropping address_tts with invalid base64: {e}");
                            continue;
                        }
                    },
                    Ok(envelope) => return Ok(Some(AiEvent::Envelope(envelope))),
                    Err(e) => {
                        warn!("dropping malformed AI envelope: {e}");
                        continue;
                    }
                },
                WsMessage::Close(_) => return Ok(None),
                WsMessage::Pong(_) => return Ok(Some(AiEvent::Pong)),
                WsMessage::Ping(_) | WsMessage::Frame(_) => continue,
            }
        }
    }
}
