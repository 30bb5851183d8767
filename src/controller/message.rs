use serde_json::{json, Value};

use super::state::Half;
use crate::config::LampConfig;
use crate::error::{LampError, Result};

/// An inbound message, normalised from whichever topic it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `{state?, brightness?, strips?: {name|all: {painter?, music_painter?}}}`
    Control(Value),
    /// Replace one parameter of a strip's stored painter
    Param {
        strip: String,
        half: Half,
        key: String,
        value: Value,
    },
    /// Our own retained status, read back once after a restart
    Status(Value),
    Music { playing: bool },
}

/// The topics one lamp listens and talks on.
#[derive(Debug, Clone)]
pub struct Topics {
    name: String,
    control_prefix: String,
    control: String,
    status: String,
    music: String,
}

impl Topics {
    pub fn new(config: &LampConfig) -> Topics {
        Topics {
            name: config.name.clone(),
            control_prefix: config.control_prefix.clone(),
            control: format!("{}/{}", config.control_prefix, config.name),
            status: format!("{}/{}", config.status_prefix, config.name),
            music: config.music_topic.clone(),
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.control.clone(),
            format!("{}/#", self.control),
            self.status.clone(),
            self.music.clone(),
        ]
    }

    /// Decode a message. `Ok(None)` means it was addressed to some other lamp.
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Result<Option<Message>> {
        if topic == self.music {
            let status = json(payload)?;
            let state = status
                .pointer("/status/state")
                .and_then(Value::as_str)
                .ok_or_else(|| LampError::payload("no status.state in music player message"))?;
            return Ok(Some(Message::Music {
                playing: state == "play",
            }));
        }

        if topic == self.status {
            return Ok(Some(Message::Status(json(payload)?)));
        }

        let rest = topic
            .strip_prefix(self.control_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| LampError::InvalidTopic(topic.to_string()))?;
        let mut parts = rest.split('/');

        match parts.next() {
            Some(name) if name == self.name => (),
            Some(name) => {
                log::debug!("Message is for {}, not {}", name, self.name);
                return Ok(None);
            }
            None => return Err(LampError::InvalidTopic(topic.to_string())),
        }

        let parts: Vec<&str> = parts.collect();
        let message = match parts.as_slice() {
            [] => Message::Control(json(payload)?),
            [attr @ ("brightness" | "state")] => Message::Control(json!({ *attr: text(payload)? })),
            ["strip", strip] => Message::Control(json!({ "strips": { *strip: json(payload)? } })),
            ["strip", strip, half] => {
                let half = Half::from_key(half)
                    .ok_or_else(|| LampError::InvalidTopic(topic.to_string()))?;
                Message::Control(json!({
                    "strips": { *strip: { half.key(): json(payload)? } }
                }))
            }
            ["strip", strip, half, key] => Message::Param {
                strip: strip.to_string(),
                half: Half::from_key(half)
                    .ok_or_else(|| LampError::InvalidTopic(topic.to_string()))?,
                key: key.to_string(),
                value: json(payload).or_else(|_| text(payload).map(Value::String))?,
            },
            _ => return Err(LampError::InvalidTopic(topic.to_string())),
        };

        Ok(Some(message))
    }
}

/// An empty payload reads as `null`.
fn json(payload: &[u8]) -> Result<Value> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(payload)?)
}

fn text(payload: &[u8]) -> Result<String> {
    std::str::from_utf8(payload)
        .map(|s| s.trim().to_string())
        .map_err(|e| LampError::payload(e.to_string()))
}
