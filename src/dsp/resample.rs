//! Polyphase-style sample-rate conversion for PCM16 mono audio.
//!
//! Implemented as zero-stuff → windowed-sinc low-pass → decimate, which is
//! algebraically the same family as `scipy.signal.resample_poly` the source
//! bridge scripts used, just without the up-front FFT design step.

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Windowed-sinc low-pass filter kernel, Hamming-windowed, cutoff expressed
/// as a fraction of the Nyquist rate of the *upsampled* signal.
fn design_lowpass(cutoff: f64, half_taps: usize) -> Vec<f64> {
    let num_taps = 2 * half_taps + 1;
    let mut taps = Vec::with_capacity(num_taps);
    for i in 0..num_taps {
        let n = i as isize - half_taps as isize;
        let sinc = if n == 0 {
            2.0 * cutoff
        } else {
            (2.0 * std::f64::consts::PI * cutoff * n as f64).sin() / (std::f64::consts::PI * n as f64)
        };
        let window = 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / (num_taps - 1) as f64).cos();
        taps.push(sinc * window);
    }
    taps
}

/// Resample linear16 `input` from `f_in` Hz to `f_out` Hz.
///
/// Silence in produces exactly silence out; output length is
/// `round(n * f_out / f_in)`.
pub fn resample(input: &[i16], f_in: u32, f_out: u32) -> Vec<i16> {
    if f_in == f_out || input.is_empty() {
        return input.to_vec();
    }

    let g = gcd(f_in, f_out);
    let up = (f_out / g) as usize;
    let down = (f_in / g) as usize;

    let target_len = ((input.len() as u64 * f_out as u64) + (f_in as u64 / 2)) / f_in as u64;
    let target_len = target_len as usize;

    if input.iter().all(|&s| s == 0) {
        return vec![0i16; target_len];
    }

    let max_factor = up.max(down);
    let half_taps = (8 * max_factor).clamp(4, 2000);
    let cutoff = 0.5 / max_factor as f64;
    let taps = design_lowpass(cutoff, half_taps);
    let num_taps = taps.len();

    let upsampled_len = input.len() * up;
    let group_delay = half_taps;

    let mut out = Vec::with_capacity(target_len);
    let mut out_index = 0usize;
    loop {
        let center = out_index * down + group_delay;
        if center >= upsampled_len + group_delay || out.len() >= target_len {
            break;
        }

        let mut acc = 0.0f64;
        let lo = center.saturating_sub(num_taps - 1);
        for upsampled_pos in lo..=center {
            if upsampled_pos % up != 0 {
                continue;
            }
            let sample_index = upsampled_pos / up;
            if sample_index >= input.len() {
                continue;
            }
            let tap_index = center - upsampled_pos;
            if tap_index >= num_taps {
                continue;
            }
            acc += input[sample_index] as f64 * taps[tap_index];
        }
        acc *= up as f64;

        out.push(acc.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
        out_index += 1;
    }

    out.resize(target_len, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_resamples_to_silence() {
        let input = vec![0i16; 320];
        let out = resample(&input, 8_000, 16_000);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn output_length_matches_rate_ratio() {
        let input = vec![100i16; 160];
        let out = resample(&input, 8_000, 16_000);
        assert_eq!(out.len(), 320);
    }

    #[test]
    fn identity_when_rates_match() {
        let input: Vec<i16> = (0..160).map(|i| i as i16).collect();
        let out = resample(&input, 16_000, 16_000);
        assert_eq!(out, input);
    }

    #[test]
    fn round_trip_preserves_length_within_one_and_is_low_error() {
        let n = 480usize;
        let input: Vec<i16> = (0..n)
            .map(|i| ((i as f64 * 0.05).sin() * 8000.0) as i16)
            .collect();
        let up = resample(&input, 16_000, 24_000);
        let back = resample(&up, 24_000, 16_000);
        assert!((back.len() as i64 - input.len() as i64).abs() <= 1);

        let len = back.len().min(input.len());
        let mse: f64 = input[..len]
            .iter()
            .zip(back[..len].iter())
            .map(|(a, b)| ((*a as f64) - (*b as f64)).powi(2))
            .sum::<f64>()
            / len as f64;
        assert!(mse < 4_000_000.0, "mse too high: {mse}");
    }
}
