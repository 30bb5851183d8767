use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// The lamp.toml file.
///
/// ```toml
/// name = "Ballroom"
///
/// [mqtt]
/// host = "mqtt.local"
///
/// [led]
/// count = 300
///
/// [strips.left]
/// first_pixel = 0
/// num_pixels = 140
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LampConfig {
    pub name: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_control_prefix")]
    pub control_prefix: String,
    #[serde(default = "default_status_prefix")]
    pub status_prefix: String,
    #[serde(default = "default_music_topic")]
    pub music_topic: String,
    #[serde(default)]
    pub mqtt: MqttConfig,
    pub led: LedConfig,
    #[serde(default)]
    pub show: ShowConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    pub strips: BTreeMap<String, StripConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Defaults to `lamp-<mac address>`
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub reconnect_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            reconnect_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StripType {
    Grb,
    Gbr,
    Rgb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedConfig {
    pub count: usize,
    #[serde(default = "default_pin")]
    pub pin: i32,
    #[serde(default = "default_freq")]
    pub freq_hz: u32,
    #[serde(default = "default_dma")]
    pub dma: i32,
    #[serde(default)]
    pub invert: bool,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default)]
    pub channel: usize,
    #[serde(default = "default_strip_type")]
    pub strip_type: StripType,
    #[serde(default = "default_true")]
    pub gamma: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShowConfig {
    pub stop_grace_ms: u64,
    pub restore_timeout_ms: u64,
}

impl Default for ShowConfig {
    fn default() -> Self {
        ShowConfig {
            stop_grace_ms: 500,
            restore_timeout_ms: 3000,
        }
    }
}

impl ShowConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_millis(self.restore_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Raw s16le mono PCM, usually a FIFO fed from an ALSA loopback capture
    pub device: String,
    pub sample_rate: u32,
    pub fps: u32,
    pub rolling_history: usize,
    pub bins: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            device: "/run/lamp/audio.pcm".to_string(),
            sample_rate: 48_000,
            fps: 50,
            rolling_history: 2,
            bins: 24,
        }
    }
}

impl AudioConfig {
    pub fn samples_per_block(&self) -> usize {
        (self.sample_rate / self.fps.max(1)) as usize
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StripConfig {
    pub first_pixel: usize,
    pub num_pixels: usize,
}

fn default_control_prefix() -> String {
    "control".to_string()
}

fn default_status_prefix() -> String {
    "sensor".to_string()
}

fn default_music_topic() -> String {
    "mpd/mpd/player".to_string()
}

fn default_pin() -> i32 {
    18
}

fn default_freq() -> u32 {
    800_000
}

fn default_dma() -> i32 {
    10
}

fn default_brightness() -> u8 {
    255
}

fn default_strip_type() -> StripType {
    StripType::Grb
}

fn default_true() -> bool {
    true
}

impl LampConfig {
    pub fn load(path: &Path) -> Result<LampConfig> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Error reading config file {}", path.display()))?;

        LampConfig::parse(&text).with_context(|| format!("Error in config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<LampConfig> {
        let config: LampConfig = toml::from_str(text).context("Error parsing TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// SubStrips must lie inside the strip and must not overlap.
    fn validate(&self) -> Result<()> {
        if self.strips.is_empty() {
            return Err(anyhow!("No strips configured"));
        }
        if self.strips.contains_key("all") {
            return Err(anyhow!("\"all\" is reserved and cannot name a strip"));
        }

        let mut ranges: Vec<(&str, usize, usize)> = self
            .strips
            .iter()
            .map(|(name, s)| (name.as_str(), s.first_pixel, s.first_pixel + s.num_pixels))
            .collect();
        ranges.sort_by_key(|(_, start, _)| *start);

        for (name, start, end) in &ranges {
            if start == end {
                return Err(anyhow!("Strip {} has no pixels", name));
            }
            if *end > self.led.count {
                return Err(anyhow!(
                    "Strip {} ends at pixel {} but the strip only has {}",
                    name,
                    end,
                    self.led.count
                ));
            }
        }

        for pair in ranges.windows(2) {
            let (a, _, a_end) = pair[0];
            let (b, b_start, _) = pair[1];
            if b_start < a_end {
                return Err(anyhow!("Strips {} and {} overlap", a, b));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        name = "Ballroom"

        [led]
        count = 30

        [strips.left]
        first_pixel = 0
        num_pixels = 20

        [strips.right]
        first_pixel = 20
        num_pixels = 10
    "#;

    #[test]
    fn fills_in_defaults() {
        let config = LampConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.name, "Ballroom");
        assert_eq!(config.control_prefix, "control");
        assert_eq!(config.status_prefix, "sensor");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.led.pin, 18);
        assert_eq!(config.led.strip_type, StripType::Grb);
        assert_eq!(config.show.stop_grace(), Duration::from_millis(500));
        assert_eq!(config.audio.samples_per_block(), 960);
        assert_eq!(config.strips["right"].num_pixels, 10);
    }

    #[test]
    fn rejects_overlapping_strips() {
        let text = MINIMAL.replace("first_pixel = 20", "first_pixel = 15");
        let err = LampConfig::parse(&text).unwrap_err();
        assert!(format!("{:#}", err).contains("overlap"));
    }

    #[test]
    fn rejects_strips_past_the_end() {
        let text = MINIMAL.replace("count = 30", "count = 25");
        assert!(LampConfig::parse(&text).is_err());
    }

    #[test]
    fn rejects_a_strip_called_all() {
        let text = MINIMAL.replace("[strips.right]", "[strips.all]");
        assert!(LampConfig::parse(&text).is_err());
    }
}
