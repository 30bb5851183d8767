use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use super::{millis, Painter, PainterConfig, PainterRegistry, Pattern, Resources, Step};
use crate::color::{Color, OFF};
use crate::error::{LampError, Result};

pub fn register(registry: &mut PainterRegistry) {
    registry.register("solidColour", solid_colour);
    registry.register("colourWipe", colour_wipe);
    registry.register("theaterChase", theater_chase);
    registry.register("rainbowCycle", rainbow_cycle);
    registry.register("rainbowFade", rainbow_fade);
    registry.register("sparkle", sparkle);
}

fn default_wait_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
struct SolidColour {
    colour: Color,
}

fn solid_colour(config: &PainterConfig, _: &Resources) -> Result<Box<dyn Pattern>> {
    Ok(Box::new(config.params::<SolidColour>()?))
}

impl Pattern for SolidColour {
    fn start(&self, _pixels: usize) -> Box<dyn Painter> {
        Box::new(self.clone())
    }
}

impl Painter for SolidColour {
    fn paint(&mut self, frame: &mut [Color]) -> Step {
        frame.fill(self.colour);
        Step::Done
    }
}

/// Wipe a colour across the strip a pixel at a time, then hold.
#[derive(Debug, Clone, Deserialize)]
struct ColourWipe {
    colour: Color,
    #[serde(default = "default_wait_ms")]
    wait_ms: u64,
}

struct ColourWipePainter {
    wipe: ColourWipe,
    next: usize,
}

fn colour_wipe(config: &PainterConfig, _: &Resources) -> Result<Box<dyn Pattern>> {
    Ok(Box::new(config.params::<ColourWipe>()?))
}

impl Pattern for ColourWipe {
    fn start(&self, _pixels: usize) -> Box<dyn Painter> {
        Box::new(ColourWipePainter {
            wipe: self.clone(),
            next: 0,
        })
    }
}

impl Painter for ColourWipePainter {
    fn paint(&mut self, frame: &mut [Color]) -> Step {
        if let Some(p) = frame.get_mut(self.next) {
            *p = self.wipe.colour;
        }
        self.next += 1;

        if self.next >= frame.len() {
            Step::Done
        } else {
            millis(self.wipe.wait_ms)
        }
    }
}

/// Movie theatre style chaser.
#[derive(Debug, Clone, Deserialize)]
struct TheaterChase {
    colour: Color,
    #[serde(default = "default_wait_ms")]
    wait_ms: u64,
    #[serde(default = "default_spacing")]
    spacing: usize,
}

fn default_spacing() -> usize {
    3
}

struct TheaterChasePainter {
    chase: TheaterChase,
    offset: usize,
}

fn theater_chase(config: &PainterConfig, _: &Resources) -> Result<Box<dyn Pattern>> {
    let chase = config.params::<TheaterChase>()?;
    if chase.spacing == 0 {
        return Err(LampError::configuration(config.kind(), "spacing must be at least 1"));
    }
    Ok(Box::new(chase))
}

impl Pattern for TheaterChase {
    fn start(&self, _pixels: usize) -> Box<dyn Painter> {
        Box::new(TheaterChasePainter {
            chase: self.clone(),
            offset: 0,
        })
    }
}

impl Painter for TheaterChasePainter {
    fn paint(&mut self, frame: &mut [Color]) -> Step {
        for (i, p) in frame.iter_mut().enumerate() {
            *p = if i % self.chase.spacing == self.offset {
                self.chase.colour
            } else {
                OFF
            };
        }
        self.offset = (self.offset + 1) % self.chase.spacing;

        millis(self.chase.wait_ms)
    }
}

/// A rainbow spread evenly over the strip, rotating.
#[derive(Debug, Clone, Deserialize)]
struct RainbowCycle {
    #[serde(default = "default_cycle_wait_ms")]
    wait_ms: u64,
}

fn default_cycle_wait_ms() -> u64 {
    20
}

struct RainbowCyclePainter {
    wait_ms: u64,
    j: u8,
}

fn rainbow_cycle(config: &PainterConfig, _: &Resources) -> Result<Box<dyn Pattern>> {
    Ok(Box::new(config.params::<RainbowCycle>()?))
}

impl Pattern for RainbowCycle {
    fn start(&self, _pixels: usize) -> Box<dyn Painter> {
        Box::new(RainbowCyclePainter {
            wait_ms: self.wait_ms,
            j: 0,
        })
    }
}

impl Painter for RainbowCyclePainter {
    fn paint(&mut self, frame: &mut [Color]) -> Step {
        let n = frame.len();
        for (i, p) in frame.iter_mut().enumerate() {
            let hue = (i * 256 / n) as u8;
            *p = Color::wheel(hue.wrapping_add(self.j));
        }
        self.j = self.j.wrapping_add(1);

        millis(self.wait_ms)
    }
}

/// The whole strip one colour, fading around the colour wheel.
#[derive(Debug, Clone, Deserialize)]
struct RainbowFade {
    #[serde(default = "default_fade_wait_ms")]
    wait_ms: u64,
    #[serde(default = "default_step")]
    step: u8,
}

fn default_fade_wait_ms() -> u64 {
    16
}

fn default_step() -> u8 {
    1
}

struct RainbowFadePainter {
    fade: RainbowFade,
    hue: u8,
}

fn rainbow_fade(config: &PainterConfig, _: &Resources) -> Result<Box<dyn Pattern>> {
    Ok(Box::new(config.params::<RainbowFade>()?))
}

impl Pattern for RainbowFade {
    fn start(&self, _pixels: usize) -> Box<dyn Painter> {
        Box::new(RainbowFadePainter {
            fade: self.clone(),
            hue: 0,
        })
    }
}

impl Painter for RainbowFadePainter {
    fn paint(&mut self, frame: &mut [Color]) -> Step {
        frame.fill(Color::wheel(self.hue));
        self.hue = self.hue.wrapping_add(self.fade.step);

        millis(self.fade.wait_ms)
    }
}

/// Random pixels flash and fade away.
#[derive(Debug, Clone, Deserialize)]
struct Sparkle {
    /// Random colours when not given
    colour: Option<Color>,
    #[serde(default = "default_decay")]
    decay: f32,
    #[serde(default = "default_cycle_wait_ms")]
    wait_ms: u64,
}

fn default_decay() -> f32 {
    0.8
}

struct SparklePainter {
    sparkle: Sparkle,
    rng: StdRng,
}

fn sparkle(config: &PainterConfig, _: &Resources) -> Result<Box<dyn Pattern>> {
    let sparkle = config.params::<Sparkle>()?;
    if !(0.0..=1.0).contains(&sparkle.decay) {
        return Err(LampError::configuration(config.kind(), "decay must be between 0 and 1"));
    }
    Ok(Box::new(sparkle))
}

impl Pattern for Sparkle {
    fn start(&self, _pixels: usize) -> Box<dyn Painter> {
        Box::new(SparklePainter {
            sparkle: self.clone(),
            rng: StdRng::from_entropy(),
        })
    }
}

impl Painter for SparklePainter {
    fn paint(&mut self, frame: &mut [Color]) -> Step {
        for p in frame.iter_mut() {
            *p = p.scale(self.sparkle.decay);
        }

        if !frame.is_empty() {
            let i = self.rng.gen_range(0..frame.len());
            frame[i] = match self.sparkle.colour {
                Some(colour) => colour,
                None => Color::new(self.rng.gen(), self.rng.gen(), self.rng.gen()),
            };
        }

        millis(self.sparkle.wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::painter::testing::{config, registry};

    const RED: Color = Color::new(255, 0, 0);

    fn start(value: serde_json::Value, pixels: usize) -> Box<dyn Painter> {
        registry().build(&config(value)).ok().unwrap().start(pixels)
    }

    #[test]
    fn solid_colour_is_one_shot() {
        let mut painter = start(json!({"name": "solidColour", "colour": [255, 0, 0]}), 5);
        let mut frame = vec![OFF; 5];

        assert_eq!(painter.paint(&mut frame), Step::Done);
        assert!(frame.iter().all(|c| *c == RED));
    }

    #[test]
    fn colour_wipe_lights_one_pixel_per_tick() {
        let mut painter = start(
            json!({"name": "colourWipe", "colour": "255,0,0", "wait_ms": 5}),
            3,
        );
        let mut frame = vec![OFF; 3];

        assert_eq!(painter.paint(&mut frame), Step::Wait(Duration::from_millis(5)));
        assert_eq!(frame, vec![RED, OFF, OFF]);
        assert_eq!(painter.paint(&mut frame), Step::Wait(Duration::from_millis(5)));
        assert_eq!(painter.paint(&mut frame), Step::Done);
        assert_eq!(frame, vec![RED; 3]);
    }

    #[test]
    fn theater_chase_rotates() {
        let mut painter = start(
            json!({"name": "theaterChase", "colour": [255, 0, 0], "spacing": 2, "wait_ms": 0}),
            4,
        );
        let mut frame = vec![OFF; 4];

        assert_eq!(painter.paint(&mut frame), Step::Yield);
        assert_eq!(frame, vec![RED, OFF, RED, OFF]);
        painter.paint(&mut frame);
        assert_eq!(frame, vec![OFF, RED, OFF, RED]);
        painter.paint(&mut frame);
        assert_eq!(frame, vec![RED, OFF, RED, OFF]);
    }

    #[test]
    fn theater_chase_needs_spacing() {
        let built = registry().build(&config(
            json!({"name": "theaterChase", "colour": [1, 1, 1], "spacing": 0}),
        ));
        assert!(built.is_err());
    }

    #[test]
    fn rainbow_cycle_moves_along() {
        let mut painter = start(json!({"name": "rainbowCycle"}), 4);
        let mut frame = vec![OFF; 4];

        painter.paint(&mut frame);
        let first = frame.clone();
        assert_eq!(first[0], Color::wheel(0));
        assert_eq!(first[2], Color::wheel(128));

        painter.paint(&mut frame);
        assert_eq!(frame[0], Color::wheel(1));
    }

    #[test]
    fn rainbow_fade_keeps_the_strip_uniform() {
        let mut painter = start(json!({"name": "rainbowFade", "step": 10}), 6);
        let mut frame = vec![OFF; 6];

        painter.paint(&mut frame);
        painter.paint(&mut frame);
        assert!(frame.iter().all(|c| *c == Color::wheel(10)));
    }

    #[test]
    fn sparkle_lights_a_pixel_and_fades_the_rest() {
        let mut painter = start(
            json!({"name": "sparkle", "colour": [200, 200, 200], "decay": 0.0}),
            8,
        );
        let mut frame = vec![RED; 8];

        painter.paint(&mut frame);

        let lit: Vec<_> = frame.iter().filter(|c| **c != OFF).collect();
        assert_eq!(lit, vec![&Color::new(200, 200, 200)]);
    }

    #[test]
    fn painters_cope_with_empty_geometry() {
        for value in [
            json!({"name": "rainbowCycle"}),
            json!({"name": "sparkle"}),
            json!({"name": "colourWipe", "colour": [1, 1, 1]}),
        ] {
            let mut painter = start(value, 0);
            painter.paint(&mut []);
        }
    }
}
