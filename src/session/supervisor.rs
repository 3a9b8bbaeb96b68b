//! Per-call lifecycle: three cooperating tasks (frontend-reader, ai-reader,
//! pacer) plus structured cancellation and teardown (§4.7, §5).

use crate::{
    ai::{AiReceiver, AiSender, InboundMessage, ReconnectReason, ReconnectSupervisor, ReplayRing, client},
    config::{AiConfig, DspConfig, JitterConfig, ReconnectConfig},
    dsp::{InboundPipeline, OutboundPipeline},
    error::BridgeResult,
    frame::{Frame, SwitchCodec},
    jitter::JitterBuffer,
    session::stats::SessionStats,
    transport::{
        ari::AriClient,
        switch::{SwitchEvent, SwitchReader, SwitchWriter},
    },
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::{Mutex, watch};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{info, instrument, warn};

/// Injected handler for AI-initiated tool calls (§4.5). Opaque to the engine
/// beyond the three well-known names it reacts to after the result is sent.
pub trait ToolHandler: Send + Sync {
    fn handle(&self, name: &str, arguments: serde_json::Value) -> serde_json::Value;
}

pub struct NoopToolHandler;

impl ToolHandler for NoopToolHandler {
    fn handle(&self, _name: &str, _arguments: serde_json::Value) -> serde_json::Value {
        serde_json::json!({"status": "ok"})
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Transferred,
    HandedOff,
}

pub struct SessionConfig {
    pub call_id: String,
    pub ai: AiConfig,
    pub dsp: DspConfig,
    pub jitter: JitterConfig,
    pub reconnect: ReconnectConfig,
    pub switch_read_timeout: Duration,
    /// RTP-dialect only: the ARI handle and channel `transfer_to_operator` (§4.5) acts on.
    pub ari_transfer: Option<AriTransfer>,
}

/// Side-channel "continue in dialplan" target for `transfer_to_operator` (§4.3, §4.5).
#[derive(Clone)]
pub struct AriTransfer {
    pub client: Arc<AriClient>,
    pub channel_id: String,
    pub context: String,
    pub extension: String,
    pub priority: u32,
}

struct SharedState {
    call_formally_ended: AtomicBool,
    transfer_requested: AtomicBool,
    stats: SessionStats,
}

/// Codec/frame-size latched from the switch's first AUDIO frame (§3 invariant 1).
#[derive(Debug, Clone, Copy)]
struct Latch {
    codec: SwitchCodec,
    frame_bytes: usize,
}

#[instrument(skip_all, fields(call_id = %config.call_id))]
pub async fn run_session(
    subsys: SubsystemHandle,
    config: SessionConfig,
    switch_reader: Box<dyn SwitchReader>,
    switch_writer: Box<dyn SwitchWriter>,
    tool_handler: Arc<dyn ToolHandler>,
) -> BridgeResult<Outcome> {
    let call_id = config.call_id.clone();
    let shared = Arc::new(SharedState {
        call_formally_ended: AtomicBool::new(false),
        transfer_requested: AtomicBool::new(false),
        stats: SessionStats::default(),
    });

    let (codec_tx, codec_rx) = watch::channel::<Option<Latch>>(None);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (ai_sender_tx, ai_sender_rx) = watch::channel::<Option<Arc<Mutex<AiSender>>>>(None);

    let preroll_bytes = preroll_bytes(config.jitter.jitter_buffer_ms, 8_000);
    let jitter = Arc::new(Mutex::new(JitterBuffer::new(config.jitter.max_queue_frames, preroll_bytes)));
    let replay = Arc::new(Mutex::new(ReplayRing::new(50))); // ~1s at 20ms/frame

    // Pacer starts first so the switch never sees a protocol gap (§4.4, §4.7).
    let pacer = tokio::spawn(pacer_task(
        switch_writer,
        jitter.clone(),
        codec_rx.clone(),
        cancel_rx.clone(),
        shared.clone(),
    ));

    // Frontend-reader starts second, ahead of the AI socket being open; it
    // buffers inbound audio in the replay ring until `ai_sender_rx` latches.
    let frontend = tokio::spawn(frontend_reader_task(
        switch_reader,
        ai_sender_rx,
        replay.clone(),
        codec_tx,
        cancel_rx.clone(),
        shared.clone(),
        config.dsp,
        config.ai.clone(),
        config.switch_read_timeout,
    ));

    let (ai_sender, ai_receiver) = match client::connect(&config.ai).await {
        Ok((sender, receiver)) => {
            let ai_sender = Arc::new(Mutex::new(sender));
            let init_result = {
                let mut sender = ai_sender.lock().await;
                sender.send_init(&call_id, None, None, false).await
            };
            if let Err(e) = init_result {
                let _ = cancel_tx.send(true);
                let _ = pacer.await;
                let _ = frontend.await;
                return Err(e);
            }

            // Anything the frontend-reader buffered into the replay ring
            // before this connection existed still needs to reach the AI.
            let pending = replay.lock().await.drain();
            if !pending.is_empty() {
                let mut sender = ai_sender.lock().await;
                for frame in pending {
                    if let Err(e) = sender.send_audio(&frame).await {
                        warn!("failed to replay pre-connect inbound audio: {e}");
                        break;
                    }
                }
            }

            let _ = ai_sender_tx.send(Some(ai_sender.clone()));
            (ai_sender, receiver)
        }
        Err(e) => {
            warn!("initial AI connect failed: {e}");
            let _ = cancel_tx.send(true);
            let _ = pacer.await;
            let _ = frontend.await;
            return Err(e);
        }
    };

    // Ai-reader starts once the AI socket is open (§4.7).
    let ai_reader = tokio::spawn(ai_reader_task(
        ai_receiver,
        ai_sender.clone(),
        jitter.clone(),
        replay.clone(),
        codec_rx.clone(),
        cancel_rx.clone(),
        shared.clone(),
        call_id.clone(),
        config.ai.clone(),
        config.reconnect,
        tool_handler,
        config.ari_transfer,
    ));

    let outcome = tokio::select! {
        result = pacer => {
            warn!("pacer task exited first: {result:?}");
            Outcome::Failed
        }
        result = frontend => {
            info!("frontend-reader task exited: {result:?}");
            if shared.call_formally_ended.load(Ordering::Relaxed) { Outcome::Completed } else { Outcome::Failed }
        }
        result = ai_reader => {
            info!("ai-reader task exited: {result:?}");
            classify_ai_exit(&shared)
        }
        _ = subsys.on_shutdown_requested() => {
            info!("shutdown requested, cancelling session");
            Outcome::Failed
        }
    };

    let _ = cancel_tx.send(true);

    let snapshot = shared.stats.snapshot();
    info!(?snapshot, ?outcome, "call_ended");

    Ok(outcome)
}

fn classify_ai_exit(shared: &SharedState) -> Outcome {
    if shared.transfer_requested.load(Ordering::Relaxed) {
        Outcome::Transferred
    } else if shared.call_formally_ended.load(Ordering::Relaxed) {
        Outcome::Completed
    } else {
        Outcome::Failed
    }
}

fn preroll_bytes(jitter_ms: u32, bytes_per_sec: u32) -> usize {
    let by_time = (jitter_ms as u64 * bytes_per_sec as u64 / 1000) as usize;
    let frame_bytes = 320; // 20ms @ 8kHz linear16; the conservative floor
    by_time.max(frame_bytes * 5)
}

#[instrument(skip_all)]
async fn pacer_task(
    mut writer: Box<dyn SwitchWriter>,
    jitter: Arc<Mutex<JitterBuffer>>,
    mut codec_rx: watch::Receiver<Option<Latch>>,
    mut cancel_rx: watch::Receiver<bool>,
    shared: Arc<SharedState>,
) {
    crate::utils::set_realtime_priority();

    // Started immediately on accept (§4.4); waits here only until the switch
    // codec latches, so the switch never sees a protocol gap. Keep-alive is
    // implicit: a silence frame goes out on every 20ms tick regardless.
    if codec_rx.borrow().is_none() && codec_rx.changed().await.is_err() {
        return;
    }

    let mut interval = tokio::time::interval(Duration::from_millis(20));
    let mut seen_underruns = 0u64;
    let mut seen_dropped_old = 0u64;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    let _ = writer.close().await;
                    return;
                }
            }
        }

        let latch = match *codec_rx.borrow() {
            Some(latch) => latch,
            None => continue,
        };

        let (frame, stats) = {
            let mut jitter = jitter.lock().await;
            let frame = jitter.next_frame(latch.frame_bytes, latch.codec);
            (frame, jitter.stats)
        };

        // `stats` is cumulative on the shared buffer, so this also picks up
        // drops from `push`/`push_priority` over in the ai-reader task.
        if stats.underruns > seen_underruns {
            for _ in 0..(stats.underruns - seen_underruns) {
                shared.stats.record_underrun();
            }
            seen_underruns = stats.underruns;
        }
        if stats.dropped_old > seen_dropped_old {
            shared.stats.record_dropped_old(stats.dropped_old - seen_dropped_old);
            seen_dropped_old = stats.dropped_old;
        }

        if let Err(e) = writer.write_frame(&frame).await {
            warn!("switch write failed, tearing down pacer: {e}");
            return;
        }
        shared.stats.record_sent(frame.len());
    }
}

#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
async fn frontend_reader_task(
    mut reader: Box<dyn SwitchReader>,
    ai_sender_rx: watch::Receiver<Option<Arc<Mutex<AiSender>>>>,
    replay: Arc<Mutex<ReplayRing>>,
    codec_tx: watch::Sender<Option<Latch>>,
    mut cancel_rx: watch::Receiver<bool>,
    shared: Arc<SharedState>,
    dsp_config: DspConfig,
    ai_config: AiConfig,
    read_timeout: Duration,
) {
    let mut latch: Option<Latch> = None;
    let mut inbound: Option<InboundPipeline> = None;
    let ai_sample_rate = ai_rate_for(&ai_config);
    let mut consecutive_timeouts = 0u32;
    const MAX_CONSECUTIVE_TIMEOUTS: u32 = 6; // 10s soft timeout * 6 ≈ 1 minute hard ceiling

    loop {
        let event = tokio::select! {
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() { return; } else { continue; }
            }
            result = tokio::time::timeout(read_timeout, reader.read_event()) => result,
        };

        let event = match event {
            Ok(Ok(event)) => {
                consecutive_timeouts = 0;
                event
            }
            Ok(Err(e)) => {
                warn!("switch read failed: {e}");
                return;
            }
            Err(_elapsed) => {
                // Soft timeout (§4.2, §5): keep going, let the pacer's
                // keep-alive silence carry the line.
                consecutive_timeouts += 1;
                if consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                    warn!("switch read timed out repeatedly, deeming session dead");
                    return;
                }
                continue;
            }
        };

        match event {
            SwitchEvent::Hangup => {
                shared.call_formally_ended.store(true, Ordering::Relaxed);
                return;
            }
            SwitchEvent::Identity(identity) => {
                if let Some(sender) = ai_sender_rx.borrow().clone() {
                    let mut sender = sender.lock().await;
                    if let Err(e) = sender.send_update_phone(identity.phone.unwrap_or_default(), identity.name).await {
                        warn!("failed to forward identity to AI: {e}");
                    }
                } else {
                    warn!("dropping caller identity: AI socket not connected yet");
                }
            }
            SwitchEvent::Audio(payload) => {
                if latch.is_none() {
                    let (codec, frame_bytes) = SwitchCodec::detect(payload.len());
                    if matches!(codec, SwitchCodec::Opus48k) {
                        warn!("opus/48k latch requested with no decoder configured");
                        return;
                    }
                    let new_latch = Latch { codec, frame_bytes };
                    latch = Some(new_latch);
                    inbound = Some(InboundPipeline::new(dsp_config, ai_sample_rate));
                    let _ = codec_tx.send(Some(new_latch));
                }

                let Some(pipeline) = inbound.as_mut() else { continue };
                let latched = latch.expect("latch set immediately above");
                let pcm16 = pipeline.process(latched.codec, &payload);

                shared.stats.record_received(payload.len());
                replay.lock().await.push(pcm16.clone());

                // While the AI socket hasn't latched in yet, the frame still
                // lives in the replay ring and is drained once it connects.
                if let Some(sender) = ai_sender_rx.borrow().clone() {
                    let mut sender = sender.lock().await;
                    if let Err(e) = sender.send_audio(&pcm16).await {
                        warn!("failed to forward inbound audio to AI: {e}");
                    }
                }
            }
        }
    }
}

fn ai_rate_for(config: &AiConfig) -> u32 {
    // The negotiated AI sample rate is opaque to the switch side; 24kHz
    // matches the provider this engine was built against.
    let _ = config;
    24_000
}

#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
async fn ai_reader_task(
    mut receiver: AiReceiver,
    ai_sender: Arc<Mutex<AiSender>>,
    jitter: Arc<Mutex<JitterBuffer>>,
    replay: Arc<Mutex<ReplayRing>>,
    mut codec_rx: watch::Receiver<Option<Latch>>,
    mut cancel_rx: watch::Receiver<bool>,
    shared: Arc<SharedState>,
    call_id: String,
    ai_config: AiConfig,
    reconnect_config: ReconnectConfig,
    tool_handler: Arc<dyn ToolHandler>,
    ari_transfer: Option<AriTransfer>,
) {
    if codec_rx.borrow().is_none() && codec_rx.changed().await.is_err() {
        return;
    }
    let latch = (*codec_rx.borrow()).expect("checked above");
    let ai_sample_rate = ai_rate_for(&ai_config);
    let mut outbound = OutboundPipeline::new(latch.codec, ai_sample_rate);

    let mut reconnect = ReconnectSupervisor::new(reconnect_config);
    let mut warmed_up = false;

    // Application-level liveness guard, independent of the connection's own
    // read/write errors (§5: ping interval ≈5-20s, ping timeout ≈10-20s).
    let mut ping_interval = tokio::time::interval(ai_config.ping_interval);
    ping_interval.tick().await; // first tick fires immediately
    let mut last_pong = tokio::time::Instant::now();

    loop {
        let event = tokio::select! {
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() { return; } else { continue; }
            }
            _ = ping_interval.tick() => {
                if last_pong.elapsed() > ai_config.ping_timeout {
                    warn!("AI socket missed {} consecutive pong(s), reconnecting", ai_config.ping_timeout.as_secs());
                    shared.stats.record_reconnect_attempt();
                    match reconnect
                        .reconnect(&ai_config, &call_id, ReconnectReason::TransientFailure, &mut *replay.lock().await)
                        .await
                    {
                        Ok((new_sender, new_receiver)) => {
                            *ai_sender.lock().await = new_sender;
                            receiver = new_receiver;
                            warmed_up = false;
                            last_pong = tokio::time::Instant::now();
                        }
                        Err(e) => {
                            warn!("AI reconnect exhausted after ping timeout: {e}");
                            return;
                        }
                    }
                } else if let Err(e) = ai_sender.lock().await.send_ping().await {
                    warn!("failed to send AI liveness ping: {e}");
                }
                continue;
            }
            event = receiver.recv() => event,
        };

        match event {
            Ok(Some(crate::ai::AiEvent::Pong)) => {
                last_pong = tokio::time::Instant::now();
            }
            Ok(Some(crate::ai::AiEvent::Envelope(envelope))) => {
                if let Some(outcome) = handle_envelope(
                    envelope,
                    &ai_sender,
                    &jitter,
                    &shared,
                    &call_id,
                    &tool_handler,
                    &mut warmed_up,
                    ari_transfer.as_ref(),
                )
                .await
                {
                    match outcome {
                        EnvelopeOutcome::HandOff => {
                            reconnect.reset_for_handoff();
                            match reconnect.reconnect(&ai_config, &call_id, ReconnectReason::Handoff, &mut *replay.lock().await).await {
                                Ok((new_sender, new_receiver)) => {
                                    *ai_sender.lock().await = new_sender;
                                    receiver = new_receiver;
                                    warmed_up = false;
                                    last_pong = tokio::time::Instant::now();
                                }
                                Err(e) => {
                                    warn!("handoff reconnect failed: {e}");
                                    return;
                                }
                            }
                        }
                        EnvelopeOutcome::Terminal => return,
                    }
                }
            }
            Ok(Some(crate::ai::AiEvent::Audio { pcm16_le, priority })) => {
                let payload = outbound.process(&pcm16_le);
                let mut jitter = jitter.lock().await;
                if priority {
                    jitter.push_priority(Frame::priority_of(payload, latch.codec));
                } else {
                    jitter.push(Frame::new(payload, latch.codec));
                }
            }
            Ok(None) => {
                if shared.call_formally_ended.load(Ordering::Relaxed) {
                    return;
                }
                shared.stats.record_reconnect_attempt();
                match reconnect
                    .reconnect(&ai_config, &call_id, ReconnectReason::TransientFailure, &mut *replay.lock().await)
                    .await
                {
                    Ok((new_sender, new_receiver)) => {
                        *ai_sender.lock().await = new_sender;
                        receiver = new_receiver;
                        warmed_up = false;
                        last_pong = tokio::time::Instant::now();
                    }
                    Err(e) => {
                        warn!("AI reconnect exhausted: {e}");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("AI socket error: {e}");
                if shared.call_formally_ended.load(Ordering::Relaxed) {
                    return;
                }
            }
        }
    }
}

enum EnvelopeOutcome {
    HandOff,
    Terminal,
}

#[instrument(skip_all)]
async fn handle_envelope(
    envelope: InboundMessage,
    ai_sender: &Arc<Mutex<AiSender>>,
    jitter: &Arc<Mutex<JitterBuffer>>,
    shared: &Arc<SharedState>,
    call_id: &str,
    tool_handler: &Arc<dyn ToolHandler>,
    warmed_up: &mut bool,
    ari_transfer: Option<&AriTransfer>,
) -> Option<EnvelopeOutcome> {
    match envelope {
        InboundMessage::SessionReady {} | InboundMessage::SessionResumed {} => {
            if !*warmed_up {
                *warmed_up = true;
                let mut sender = ai_sender.lock().await;
                let _ = sender.send_warmup_silence(&[0u8; 960]).await; // 20ms @ 24kHz
                tokio::time::sleep(Duration::from_millis(200)).await;
                let _ = sender.trigger_response().await;
            }
            None
        }
        InboundMessage::UserSpeaking { speaking: true } => {
            let mut sender = ai_sender.lock().await;
            let _ = sender.cancel_response().await;
            jitter.lock().await.flush_non_priority();
            None
        }
        InboundMessage::UserSpeaking { speaking: false } => None,
        InboundMessage::Transcript { .. } => None,
        InboundMessage::ToolCall { call_id: tool_call_id, name, arguments } => {
            let result = tool_handler.handle(&name, arguments);
            {
                let mut sender = ai_sender.lock().await;
                let _ = sender.send_tool_result(&tool_call_id, result).await;
            }
            match name.as_str() {
                "end_call" => {
                    shared.call_formally_ended.store(true, Ordering::Relaxed);
                    Some(EnvelopeOutcome::Terminal)
                }
                "transfer_to_operator" => {
                    shared.transfer_requested.store(true, Ordering::Relaxed);
                    match ari_transfer {
                        Some(transfer) => {
                            if let Err(e) = transfer
                                .client
                                .continue_channel(&transfer.channel_id, &transfer.context, &transfer.extension, transfer.priority)
                                .await
                            {
                                warn!(call_id, "failed to continue dialplan for operator transfer: {e}");
                            }
                        }
                        None => warn!(call_id, "transfer_to_operator requested but no ARI control channel is configured for this session"),
                    }
                    Some(EnvelopeOutcome::Terminal)
                }
                _ => {
                    let mut sender = ai_sender.lock().await;
                    let _ = sender.trigger_response().await;
                    None
                }
            }
        }
        InboundMessage::SessionHandoff { .. } => {
            info!(call_id, "session handoff requested");
            Some(EnvelopeOutcome::HandOff)
        }
        InboundMessage::CallEnded { reason } => {
            info!(call_id, ?reason, "AI ended the call");
            shared.call_formally_ended.store(true, Ordering::Relaxed);
            Some(EnvelopeOutcome::Terminal)
        }
        InboundMessage::Error { message, retrying } => {
            warn!(call_id, ?retrying, "AI reported an error: {message}");
            None
        }
        InboundMessage::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preroll_bytes_uses_time_budget_when_larger_than_floor() {
        // 100ms at 16000 bytes/sec (8kHz, 16-bit) = 1600 bytes, well above the floor.
        assert_eq!(preroll_bytes(100, 16_000), 1600);
    }

    #[test]
    fn preroll_bytes_never_drops_below_five_frames() {
        // A tiny jitter budget still needs enough preroll to survive one pacer hiccup.
        assert_eq!(preroll_bytes(1, 8_000), 320 * 5);
    }

    #[test]
    fn classify_ai_exit_prefers_transfer_over_completion() {
        let shared = SharedState {
            call_formally_ended: AtomicBool::new(true),
            transfer_requested: AtomicBool::new(true),
            stats: SessionStats::default(),
        };
        assert_eq!(classify_ai_exit(&shared), Outcome::Transferred);
    }

    #[test]
    fn classify_ai_exit_completed_when_formally_ended() {
        let shared = SharedState {
            call_formally_ended: AtomicBool::new(true),
            transfer_requested: AtomicBool::new(false),
            stats: SessionStats::default(),
        };
        assert_eq!(classify_ai_exit(&shared), Outcome::Completed);
    }

    #[test]
    fn classify_ai_exit_failed_when_neither_flag_set() {
        let shared = SharedState {
            call_formally_ended: AtomicBool::new(false),
            transfer_requested: AtomicBool::new(false),
            stats: SessionStats::default(),
        };
        assert_eq!(classify_ai_exit(&shared), Outcome::Failed);
    }

    #[test]
    fn noop_tool_handler_always_reports_ok() {
        let result = NoopToolHandler.handle("anything", serde_json::json!({"x": 1}));
        assert_eq!(result, serde_json::json!({"status": "ok"}));
    }
}
