use super::{filters, resample, ulaw};
use crate::{config::DspConfig, frame::SwitchCodec};

fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

fn decode_switch_frame(codec: SwitchCodec, payload: &[u8]) -> Vec<i16> {
    if codec.is_ulaw() {
        ulaw::decode_slice(payload)
    } else {
        pcm16_from_le_bytes(payload)
    }
}

fn encode_switch_frame(codec: SwitchCodec, samples: &[i16]) -> Vec<u8> {
    if codec.is_ulaw() {
        ulaw::encode_slice(samples)
    } else {
        pcm16_to_le_bytes(samples)
    }
}

/// Switch → AI direction: decode, resample up to the AI's rate, loudness
/// shaping, and soft-clip, carrying pre-emphasis state across frames (§4.1).
pub struct InboundPipeline {
    config: DspConfig,
    pre_emphasis: filters::PreEmphasis,
    ai_sample_rate: u32,
}

impl InboundPipeline {
    pub fn new(config: DspConfig, ai_sample_rate: u32) -> Self {
        Self {
            pre_emphasis: filters::PreEmphasis::new(config.pre_emphasis_coeff),
            config,
            ai_sample_rate,
        }
    }

    /// Returns linear16 PCM bytes at `ai_sample_rate`, little-endian.
    pub fn process(&mut self, codec: SwitchCodec, payload: &[u8]) -> Vec<u8> {
        let mut samples = decode_switch_frame(codec, payload);

        if !(self.config.send_native_ulaw && codec.is_ulaw()) {
            samples = resample::resample(&samples, codec.sample_rate(), self.ai_sample_rate);
        }

        filters::noise_gate(&mut samples, self.config.noise_gate_threshold);
        filters::volume_boost(&mut samples, self.config.volume_boost);
        filters::agc(&mut samples, self.config.target_rms);
        self.pre_emphasis.process(&mut samples);
        filters::soft_clip(&mut samples);

        pcm16_to_le_bytes(&samples)
    }
}

/// AI → switch direction: resample down to the switch's rate and encode to
/// the switch's latched codec.
pub struct OutboundPipeline {
    switch_codec: SwitchCodec,
    ai_sample_rate: u32,
}

impl OutboundPipeline {
    pub fn new(switch_codec: SwitchCodec, ai_sample_rate: u32) -> Self {
        Self { switch_codec, ai_sample_rate }
    }

    /// `pcm16_le` is linear16 audio at `ai_sample_rate`; returns bytes ready
    /// to write to the switch transport at the latched codec/frame size.
    pub fn process(&self, pcm16_le: &[u8]) -> Vec<u8> {
        let samples = pcm16_from_le_bytes(pcm16_le);
        let resampled = resample::resample(&samples, self.ai_sample_rate, self.switch_codec.sample_rate());
        encode_switch_frame(self.switch_codec, &resampled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_pipeline_on_silence_stays_quiet() {
        let mut pipeline = InboundPipeline::new(DspConfig::default(), 24_000);
        let silence = vec![0u8; 160];
        let out = pipeline.process(SwitchCodec::MuLaw8k, &silence);
        let samples = pcm16_from_le_bytes(&out);
        assert!(samples.iter().all(|&s| s.unsigned_abs() < 50));
    }

    #[test]
    fn outbound_pipeline_resamples_to_switch_rate() {
        let pipeline = OutboundPipeline::new(SwitchCodec::MuLaw8k, 24_000);
        let samples = vec![100i16; 480];
        let pcm = pcm16_to_le_bytes(&samples);
        let out = pipeline.process(&pcm);
        // 480 samples @ 24k resampled to 8k then mu-law encoded => 160 bytes
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn noise_gate_threshold_attenuates_quiet_input() {
        let mut gated = DspConfig::default();
        gated.noise_gate_threshold = 20_000.0; // above the test tone, should heavily attenuate
        let mut open = DspConfig::default();
        open.noise_gate_threshold = 0.0; // gate fully open, no attenuation from the gate itself

        let payload = pcm16_to_le_bytes(&vec![300i16; 320]);

        let mut gated_pipeline = InboundPipeline::new(gated, 8_000);
        let gated_out = pcm16_from_le_bytes(&gated_pipeline.process(SwitchCodec::Linear16_8k, &payload));

        let mut open_pipeline = InboundPipeline::new(open, 8_000);
        let open_out = pcm16_from_le_bytes(&open_pipeline.process(SwitchCodec::Linear16_8k, &payload));

        let gated_peak = gated_out.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        let open_peak = open_out.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        assert!(gated_peak < open_peak, "gated peak {gated_peak} should be below open peak {open_peak}");
    }

    #[test]
    fn native_ulaw_skip_preserves_frame_size() {
        let mut config = DspConfig::default();
        config.send_native_ulaw = true;
        let mut pipeline = InboundPipeline::new(config, 24_000);
        let payload = vec![0xFFu8; 160];
        let out = pipeline.process(SwitchCodec::MuLaw8k, &payload);
        let samples = pcm16_from_le_bytes(&out);
        assert_eq!(samples.len(), 160);
    }
}
