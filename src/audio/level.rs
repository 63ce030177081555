//! Amplitude measurement for the live level feed.

/// RMS amplitude of a PCM buffer, normalized to 0.0..=1.0.
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|s| {
            let v = *s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Peak amplitude of a PCM buffer, normalized to 0.0..=1.0.
pub fn peak_level(samples: &[i16]) -> f32 {
    samples
        .iter()
        .map(|s| (*s as i32).unsigned_abs())
        .max()
        .map(|p| p as f32 / i16::MAX as f32)
        .unwrap_or(0.0)
        .min(1.0)
}
