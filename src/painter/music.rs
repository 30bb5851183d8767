use std::rc::Rc;
use std::time::Duration;

use super::{Painter, PainterConfig, PainterRegistry, Pattern, Resources, Step};
use crate::audio::spectrum::{gaussian_blur, interpolate, ExpFilter, SpectrumAnalyser};
use crate::audio::{MicSubscription, Microphone};
use crate::color::gamma::Gamma;
use crate::color::Color;
use crate::config::AudioConfig;
use crate::error::Result;

/// How long to back off when the microphone has nothing for us yet
const NO_AUDIO_WAIT: Duration = Duration::from_millis(100);

pub fn register(registry: &mut PainterRegistry) {
    registry.register("musicScroll", music_scroll);
    registry.register("musicEnergy", music_energy);
    registry.register("musicSpectrum", music_spectrum);
}

#[derive(Debug, Clone, Copy)]
enum Effect {
    /// Colours originate in the centre and scroll outwards
    Scroll,
    /// Bars expand from the centre with increasing energy
    Energy,
    /// The frequency bins mapped straight onto the strip
    Spectrum,
}

/// An audio reactive pattern. Holds the shared microphone, only subscribing once started.
struct Music {
    effect: Effect,
    mic: Microphone,
    audio: AudioConfig,
    gamma: Rc<Gamma>,
}

fn music(effect: Effect, resources: &Resources) -> Result<Box<dyn Pattern>> {
    Ok(Box::new(Music {
        effect,
        mic: resources.mic.clone(),
        audio: resources.audio.clone(),
        gamma: resources.gamma.clone(),
    }))
}

fn music_scroll(_: &PainterConfig, resources: &Resources) -> Result<Box<dyn Pattern>> {
    music(Effect::Scroll, resources)
}

fn music_energy(_: &PainterConfig, resources: &Resources) -> Result<Box<dyn Pattern>> {
    music(Effect::Energy, resources)
}

fn music_spectrum(_: &PainterConfig, resources: &Resources) -> Result<Box<dyn Pattern>> {
    music(Effect::Spectrum, resources)
}

impl Pattern for Music {
    fn start(&self, pixels: usize) -> Box<dyn Painter> {
        let half = pixels / 2;
        let bins = self.audio.bins.max(1);

        let state = match self.effect {
            Effect::Scroll => EffectState::Scroll {
                gain: ExpFilter::new(0.01, bins, 0.001, 0.99),
            },
            Effect::Energy => EffectState::Energy {
                gain: ExpFilter::new(0.01, bins, 0.001, 0.99),
                filters: [
                    ExpFilter::new(1.0, half, 0.1, 0.99),
                    ExpFilter::new(1.0, half, 0.1, 0.99),
                    ExpFilter::new(1.0, half, 0.1, 0.99),
                ],
            },
            Effect::Spectrum => EffectState::Spectrum {
                common_mode: ExpFilter::new(0.01, half, 0.99, 0.01),
                previous: vec![0.01; half],
                red: ExpFilter::new(0.01, half, 0.2, 0.99),
                blue: ExpFilter::new(0.01, half, 0.1, 0.5),
            },
        };

        Box::new(MusicPainter {
            subscription: Some(self.mic.subscribe()),
            mic: self.mic.clone(),
            analyser: SpectrumAnalyser::new(&self.audio),
            frame_wait: Duration::from_secs(1) / self.audio.fps.max(1) / 2,
            gamma: self.gamma.clone(),
            last_seq: None,
            channels: [vec![1.0; half], vec![1.0; half], vec![1.0; half]],
            state,
        })
    }
}

enum EffectState {
    Scroll {
        gain: ExpFilter,
    },
    Energy {
        gain: ExpFilter,
        filters: [ExpFilter; 3],
    },
    Spectrum {
        common_mode: ExpFilter,
        previous: Vec<f32>,
        red: ExpFilter,
        blue: ExpFilter,
    },
}

struct MusicPainter {
    subscription: Option<MicSubscription>,
    mic: Microphone,
    analyser: SpectrumAnalyser,
    frame_wait: Duration,
    gamma: Rc<Gamma>,
    last_seq: Option<u64>,
    /// Red, green and blue levels (0..255) for one half of the strip, centre first
    channels: [Vec<f32>; 3],
    state: EffectState,
}

impl Painter for MusicPainter {
    fn paint(&mut self, frame: &mut [Color]) -> Step {
        let block = match self.mic.latest() {
            Some(block) => block,
            None => return Step::Wait(NO_AUDIO_WAIT),
        };
        if self.last_seq == Some(block.seq) {
            return Step::Wait(self.frame_wait);
        }
        self.last_seq = Some(block.seq);

        let mel = self.analyser.process(&block.samples);
        let half = self.channels[0].len();

        match &mut self.state {
            EffectState::Scroll { gain } => {
                let y: Vec<f32> = mel.iter().map(|m| m * m).collect();
                let norm = gain.update(&y);
                let y: Vec<f32> = y
                    .iter()
                    .zip(norm)
                    .map(|(y, n)| y / n.max(1e-6) * 255.0)
                    .collect();

                let [r, g, b] = thirds(&y, |band| band.iter().copied().fold(0.0, f32::max));
                for (channel, level) in self.channels.iter_mut().zip([r, g, b]) {
                    if channel.is_empty() {
                        continue;
                    }
                    channel.rotate_right(1);
                    channel.iter_mut().for_each(|v| *v *= 0.98);
                    *channel = gaussian_blur(channel, 0.3);
                    channel[0] = level;
                }
            }
            EffectState::Energy { gain, filters } => {
                let norm = gain.update(&mel);
                let scale = (half.saturating_sub(1) * 2) as f32;
                let y: Vec<f32> = mel
                    .iter()
                    .zip(norm)
                    .map(|(m, n)| m / n.max(1e-6) * scale)
                    .collect();

                let lengths = thirds(&y, |band| {
                    band.iter().map(|v| v.max(0.0).powf(0.9)).sum::<f32>() / band.len().max(1) as f32
                });
                for ((channel, length), filter) in
                    self.channels.iter_mut().zip(lengths).zip(filters.iter_mut())
                {
                    let lit = (length as usize).min(half);
                    let bar: Vec<f32> = (0..half).map(|i| if i < lit { 255.0 } else { 0.0 }).collect();
                    let smoothed: Vec<f32> = filter.update(&bar).iter().map(|v| v.round()).collect();
                    *channel = gaussian_blur(&smoothed, 4.0);
                }
            }
            EffectState::Spectrum {
                common_mode,
                previous,
                red,
                blue,
            } => {
                let y = interpolate(&mel, half);
                let common = common_mode.update(&y).to_vec();

                let above: Vec<f32> = y.iter().zip(&common).map(|(y, c)| y - c).collect();
                let r = red.update(&above);
                let g: Vec<f32> = y.iter().zip(previous.iter()).map(|(y, p)| (y - p).abs()).collect();
                let b = blue.update(&y);

                self.channels[0] = r.iter().map(|v| v * 255.0).collect();
                self.channels[1] = g.iter().map(|v| v * 255.0).collect();
                self.channels[2] = b.iter().map(|v| v * 255.0).collect();
                *previous = y;
            }
        }

        mirror(&self.channels, &self.gamma, frame);
        Step::Yield
    }

    fn finish(&mut self) {
        if self.subscription.take().is_some() {
            log::debug!("Released microphone");
        }
    }
}

/// Reduce the low, middle and high thirds of the bins to one value each.
fn thirds<F: Fn(&[f32]) -> f32>(y: &[f32], reduce: F) -> [f32; 3] {
    let n = y.len();
    [
        reduce(&y[..n / 3]),
        reduce(&y[n / 3..2 * n / 3]),
        reduce(&y[2 * n / 3..]),
    ]
}

/// Lay the half-strip channels out symmetrically: centre outwards in both directions.
fn mirror(channels: &[Vec<f32>; 3], gamma: &Gamma, frame: &mut [Color]) {
    let half = channels[0].len();
    let color = |i: usize| {
        Color::new(
            gamma.correct(channels[0][i]),
            gamma.correct(channels[1][i]),
            gamma.correct(channels[2][i]),
        )
    };

    for (i, p) in frame.iter_mut().enumerate() {
        *p = if i < half {
            color(half - 1 - i)
        } else if i < half * 2 {
            color(i - half)
        } else {
            Color::default()
        };
    }
}
