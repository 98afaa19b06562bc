//! PCM sample helpers
//!
//! Pure conversions between the synthesis engine's floating-point output and
//! the 16-bit interleaved PCM the codec pipeline consumes.

/// Quantizes floating-point amplitudes in [-1.0, 1.0] to signed 16-bit PCM.
///
/// Values are clamped before scaling. Negative amplitudes scale by 32768 and
/// non-negative by 32767, so -1.0 maps to i16::MIN and 1.0 to i16::MAX.
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let sample = sample.clamp(-1.0, 1.0);
            if sample < 0.0 {
                (sample * 32768.0) as i16
            } else {
                (sample * 32767.0) as i16
            }
        })
        .collect()
}

/// Duplicates each mono sample into left/right to produce interleaved stereo.
pub fn duplicate_to_stereo(mono: &[i16]) -> Vec<i16> {
    let mut stereo = Vec::with_capacity(mono.len() * 2);
    for &sample in mono {
        stereo.push(sample);
        stereo.push(sample);
    }
    stereo
}

/// Serializes samples as little-endian bytes for the codec pipeline's stdin.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_full_scale() {
        assert_eq!(quantize(&[1.0]), vec![32767]);
        assert_eq!(quantize(&[-1.0]), vec![-32768]);
        assert_eq!(quantize(&[0.0]), vec![0]);
    }

    #[test]
    fn test_quantize_clamps_out_of_range() {
        assert_eq!(quantize(&[2.5]), vec![32767]);
        assert_eq!(quantize(&[-7.0]), vec![-32768]);
    }

    #[test]
    fn test_quantize_midpoints() {
        assert_eq!(quantize(&[0.5]), vec![16383]);
        assert_eq!(quantize(&[-0.5]), vec![-16384]);
    }

    #[test]
    fn test_duplicate_to_stereo_interleaves() {
        assert_eq!(duplicate_to_stereo(&[1, -2, 3]), vec![1, 1, -2, -2, 3, 3]);
        assert!(duplicate_to_stereo(&[]).is_empty());
    }

    #[test]
    fn test_to_le_bytes_layout() {
        assert_eq!(to_le_bytes(&[0x0102, -1]), vec![0x02, 0x01, 0xff, 0xff]);
    }
}
