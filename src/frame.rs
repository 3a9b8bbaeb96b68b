use bytes::Bytes;

/// Codec/rate a [`Frame`] is encoded in. `Opus48k` is modeled for the RTP
/// dialect's codec negotiation but no encoder/decoder ships for it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchCodec {
    MuLaw8k,
    Linear16_8k,
    Linear16_16k,
    Opus48k,
}

impl SwitchCodec {
    pub fn sample_rate(self) -> u32 {
        match self {
            SwitchCodec::MuLaw8k | SwitchCodec::Linear16_8k => 8_000,
            SwitchCodec::Linear16_16k => 16_000,
            SwitchCodec::Opus48k => 48_000,
        }
    }

    /// Native frame size in bytes for a 20 ms frame at this codec's rate.
    pub fn frame_bytes(self) -> usize {
        match self {
            SwitchCodec::MuLaw8k => 160,
            SwitchCodec::Linear16_8k => 320,
            SwitchCodec::Linear16_16k => 640,
            SwitchCodec::Opus48k => 0,
        }
    }

    /// Byte latched from the first AUDIO frame's length (§4.2 codec detection).
    ///
    /// Any size other than the two well-known AudioSocket sizes is accepted as
    /// linear16 at that exact frame size, per the boundary rule in §8.
    pub fn detect(frame_len: usize) -> (SwitchCodec, usize) {
        match frame_len {
            160 => (SwitchCodec::MuLaw8k, 160),
            320 => (SwitchCodec::Linear16_8k, 320),
            other => (SwitchCodec::Linear16_16k, other),
        }
    }

    pub fn is_ulaw(self) -> bool {
        matches!(self, SwitchCodec::MuLaw8k)
    }

    /// The silence byte to pad/fill with for this codec (§4.4).
    pub fn silence_byte(self) -> u8 {
        if self.is_ulaw() { 0xFF } else { 0x00 }
    }
}

/// An immutable, cheaply-cloneable chunk of audio tagged with its format.
///
/// All inter-component hand-offs move `Frame`s, never raw byte buffers, so a
/// Frame can be cloned (e.g. to both log and forward it) in O(1).
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub codec: SwitchCodec,
    pub sample_rate: u32,
    pub nominal_duration_ms: u32,
    pub priority: bool,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, codec: SwitchCodec) -> Self {
        let data = data.into();
        Self {
            sample_rate: codec.sample_rate(),
            nominal_duration_ms: 20,
            priority: false,
            data,
            codec,
        }
    }

    pub fn priority_of(data: impl Into<Bytes>, codec: SwitchCodec) -> Self {
        let mut frame = Frame::new(data, codec);
        frame.priority = true;
        frame
    }

    pub fn silence(codec: SwitchCodec, len: usize) -> Self {
        Frame::new(vec![codec.silence_byte(); len], codec)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_mu_law_from_160_bytes() {
        let (codec, frame_bytes) = SwitchCodec::detect(160);
        assert_eq!(codec, SwitchCodec::MuLaw8k);
        assert_eq!(frame_bytes, 160);
    }

    #[test]
    fn detect_linear16_from_320_bytes() {
        let (codec, frame_bytes) = SwitchCodec::detect(320);
        assert_eq!(codec, SwitchCodec::Linear16_8k);
        assert_eq!(frame_bytes, 320);
    }

    #[test]
    fn detect_odd_size_latches_exact_linear16() {
        let (codec, frame_bytes) = SwitchCodec::detect(641);
        assert_eq!(codec, SwitchCodec::Linear16_16k);
        assert_eq!(frame_bytes, 641);
    }

    #[test]
    fn silence_byte_differs_by_codec() {
        assert_eq!(SwitchCodec::MuLaw8k.silence_byte(), 0xFF);
        assert_eq!(SwitchCodec::Linear16_8k.silence_byte(), 0x00);
    }
}
