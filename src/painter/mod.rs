use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::audio::Microphone;
use crate::color::gamma::Gamma;
use crate::color::Color;
use crate::config::AudioConfig;
use crate::error::{LampError, Result};

pub mod basic;
pub mod music;

/// What the frame loop should do after a frame has been painted and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Sleep until the next tick.
    Wait(Duration),
    /// Go again as soon as the scheduler lets us.
    Yield,
    /// One-shot painters are finished after this frame.
    Done,
}

/// A running animation for one pixel geometry.
///
/// Painters are plain state machines: the show's frame loop calls `paint` once per frame and owns
/// all the waiting, so a painter can be dropped between any two frames.
pub trait Painter {
    /// Paint the next frame. `frame` always has the geometry the painter was started with and
    /// holds the previous frame on entry.
    fn paint(&mut self, frame: &mut [Color]) -> Step;

    /// Release anything held outside the painter (e.g. a microphone subscription).
    fn finish(&mut self) {}
}

/// A validated painter configuration which can be started on any geometry, any number of times.
pub trait Pattern {
    fn start(&self, pixels: usize) -> Box<dyn Painter>;
}

/// A painter configuration as received over MQTT: `{"name": <kind>, ...params}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PainterConfig(Value);

impl PainterConfig {
    pub fn from_value(value: Value) -> Result<PainterConfig> {
        match &value {
            Value::Object(map) => match map.get("name") {
                Some(Value::String(_)) => Ok(PainterConfig(value)),
                Some(other) => Err(LampError::payload(format!(
                    "painter name must be a string, got {}",
                    other
                ))),
                None => Err(LampError::payload(format!("no painter name in {}", value))),
            },
            other => Err(LampError::payload(format!(
                "painter must be an object, got {}",
                other
            ))),
        }
    }

    pub fn kind(&self) -> &str {
        self.0.get("name").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// A copy with one parameter replaced.
    pub fn with_param(&self, key: &str, value: Value) -> Result<PainterConfig> {
        let mut map = match &self.0 {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        map.insert(key.to_string(), value);
        PainterConfig::from_value(Value::Object(map))
    }

    /// Deserialise the parameters into a painter's own parameter struct.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| LampError::configuration(self.kind(), e))
    }
}

/// Shared things painters may need, handed to every constructor.
pub struct Resources {
    pub mic: Microphone,
    pub audio: AudioConfig,
    pub gamma: Rc<Gamma>,
}

impl Resources {
    pub fn new(mic: Microphone, audio: AudioConfig, gamma: Gamma) -> Resources {
        Resources {
            mic,
            audio,
            gamma: Rc::new(gamma),
        }
    }
}

pub type Constructor = fn(&PainterConfig, &Resources) -> Result<Box<dyn Pattern>>;

/// Maps a painter kind to its constructor. Unknown kinds are rejected when a configuration is
/// parsed, long before anything is attached.
pub struct PainterRegistry {
    constructors: HashMap<&'static str, Constructor>,
    resources: Resources,
}

impl PainterRegistry {
    pub fn new(resources: Resources) -> PainterRegistry {
        PainterRegistry {
            constructors: HashMap::new(),
            resources,
        }
    }

    /// Every painter this crate ships.
    pub fn with_defaults(resources: Resources) -> PainterRegistry {
        let mut registry = PainterRegistry::new(resources);
        basic::register(&mut registry);
        music::register(&mut registry);
        registry
    }

    pub fn register(&mut self, kind: &'static str, constructor: Constructor) {
        if self.constructors.insert(kind, constructor).is_some() {
            log::warn!("Painter {} registered twice, keeping the last one", kind);
        }
    }

    #[cfg(test)]
    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn build(&self, config: &PainterConfig) -> Result<Box<dyn Pattern>> {
        let constructor = self
            .constructors
            .get(config.kind())
            .ok_or_else(|| LampError::UnknownPainterKind(config.kind().to_string()))?;

        constructor(config, &self.resources)
    }
}

pub(crate) fn millis(ms: u64) -> Step {
    if ms == 0 {
        Step::Yield
    } else {
        Step::Wait(Duration::from_millis(ms))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn resources() -> Resources {
        Resources::new(
            Microphone::new(AudioConfig::default()),
            AudioConfig::default(),
            Gamma::linear(),
        )
    }

    pub fn registry() -> PainterRegistry {
        PainterRegistry::with_defaults(resources())
    }

    pub fn config(value: Value) -> PainterConfig {
        PainterConfig::from_value(value).unwrap()
    }
}
