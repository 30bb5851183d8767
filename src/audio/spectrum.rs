use std::collections::VecDeque;
use std::f32::consts::PI;
use std::ops::Range;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;
use rustfft::{Fft, FftPlanner};

use crate::config::AudioConfig;

/// Lowest and highest frequencies (Hz) folded into the bins
const MIN_FREQUENCY: f32 = 200.0;
const MAX_FREQUENCY: f32 = 12_000.0;

/// Exponential smoothing with separate rise and decay rates per element.
#[derive(Debug, Clone)]
pub struct ExpFilter {
    value: Vec<f32>,
    alpha_decay: f32,
    alpha_rise: f32,
}

impl ExpFilter {
    pub fn new(initial: f32, len: usize, alpha_decay: f32, alpha_rise: f32) -> ExpFilter {
        ExpFilter {
            value: vec![initial; len],
            alpha_decay,
            alpha_rise,
        }
    }

    pub fn update(&mut self, input: &[f32]) -> &[f32] {
        for (v, x) in self.value.iter_mut().zip(input) {
            let alpha = if *x > *v {
                self.alpha_rise
            } else {
                self.alpha_decay
            };
            *v = alpha * x + (1.0 - alpha) * *v;
        }
        &self.value
    }

    #[cfg(test)]
    pub fn value(&self) -> &[f32] {
        &self.value
    }
}

/// Turns blocks of raw samples into a normalised, smoothed vector of frequency bins.
///
/// Keeps a rolling window of the last few blocks, windows it, FFTs it and folds the magnitudes
/// into log spaced bands. The output is roughly 0..1 though loud transients can exceed 1.
pub struct SpectrumAnalyser {
    history: VecDeque<Vec<f32>>,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buf: Vec<Complex<f32>>,
    bands: Vec<Range<usize>>,
    gain: ExpFilter,
    smoothing: ExpFilter,
}

impl SpectrumAnalyser {
    pub fn new(config: &AudioConfig) -> SpectrumAnalyser {
        let rolling_history = config.rolling_history.max(1);
        let block = config.samples_per_block().max(1);
        let n = block * rolling_history;
        let fft_len = n.next_power_of_two();

        // Hamming
        let window = (0..n)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (n.max(2) - 1) as f32).cos())
            .collect();

        let bins = config.bins.max(1);
        let bin_hz = config.sample_rate as f32 / fft_len as f32;
        let max_index = fft_len / 2;
        let bands = (0..bins)
            .map(|b| {
                let edge = |b: usize| {
                    let f = MIN_FREQUENCY
                        * (MAX_FREQUENCY / MIN_FREQUENCY).powf(b as f32 / bins as f32);
                    ((f / bin_hz).round() as usize).min(max_index - 1)
                };
                let start = edge(b);
                start..edge(b + 1).max(start + 1)
            })
            .collect();

        SpectrumAnalyser {
            history: VecDeque::from(vec![vec![0.0; block]; rolling_history]),
            window,
            fft: FftPlanner::new().plan_fft_forward(fft_len),
            buf: vec![Complex::zero(); fft_len],
            bands,
            gain: ExpFilter::new(0.1, 1, 0.01, 0.99),
            smoothing: ExpFilter::new(0.1, bins, 0.5, 0.99),
        }
    }

    #[cfg(test)]
    pub fn bins(&self) -> usize {
        self.bands.len()
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.history.pop_front();
        self.history
            .push_back(samples.iter().map(|s| s / 32768.0).collect());

        // Window the rolling samples into the (zero padded) FFT buffer
        self.buf.iter_mut().for_each(|c| *c = Complex::zero());
        for ((c, s), w) in self
            .buf
            .iter_mut()
            .zip(self.history.iter().flatten())
            .zip(self.window.iter())
        {
            *c = Complex::new(s * w, 0.0);
        }

        self.fft.process(&mut self.buf);

        let mut mel: Vec<f32> = self
            .bands
            .iter()
            .map(|band| self.buf[band.clone()].iter().map(|c| c.norm()).sum::<f32>())
            .map(|e| e * e)
            .collect();

        let peak = gaussian_blur(&mel, 1.0)
            .into_iter()
            .fold(0.0_f32, f32::max);
        let gain = self.gain.update(&[peak])[0].max(1e-6);
        mel.iter_mut().for_each(|m| *m /= gain);

        self.smoothing.update(&mel).to_vec()
    }
}

/// 1D gaussian blur with edge clamping.
pub fn gaussian_blur(values: &[f32], sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 || values.is_empty() {
        return values.to_vec();
    }

    let radius = (sigma * 3.0).ceil() as isize;
    let kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-(x * x) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    let last = values.len() as isize - 1;

    (0..values.len() as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let j = (i + k as isize - radius).clamp(0, last);
                    values[j as usize] * w
                })
                .sum::<f32>()
                / total
        })
        .collect()
}

/// Linearly resample `values` to `len` points.
pub fn interpolate(values: &[f32], len: usize) -> Vec<f32> {
    if values.len() == len {
        return values.to_vec();
    }
    match values.len() {
        0 => return vec![0.0; len],
        1 => return vec![values[0]; len],
        _ => (),
    }

    let scale = (values.len() - 1) as f32 / (len.max(2) - 1) as f32;
    (0..len)
        .map(|i| {
            let x = i as f32 * scale;
            let lo = x.floor() as usize;
            let hi = (lo + 1).min(values.len() - 1);
            let t = x - lo as f32;
            values[lo] * (1.0 - t) + values[hi] * t
        })
        .collect()
}
