use std::f32::consts::PI;

/// Symmetric Hann window, unnormalized (peak 1.0, both ends 0.0).
pub fn make_hann_window(n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / denom).cos())
        .collect()
}

/// Index of the largest value; ties resolve to the lowest index.
pub fn argmax(x: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in x.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Expected FFT bin for a frequency.
pub fn frequency_to_bin(freq_hz: f32, sample_rate: f32, fft_size: usize) -> f32 {
    freq_hz * fft_size as f32 / sample_rate.max(1e-6)
}
