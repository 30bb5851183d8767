use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

pub mod message;
pub mod state;

use crate::client::Outgoing;
use crate::config::LampConfig;
use crate::error::{LampError, Result};
use crate::lights::{SharedSink, SubStrip};
use crate::painter::{PainterConfig, PainterRegistry};
use crate::show::{Show, ShowRegistry, ShowStatus};
use message::{Message, Topics};
use state::{Half, StripState};

/// Strip name addressing every SubStrip at once.
pub const ALL: &str = "all";

const TRUTHY: [&str; 6] = ["ON", "on", "On", "True", "true", "1"];

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub messages: usize,
    pub dropped: usize,
}

/// Routes control messages onto the lamp's SubStrips.
///
/// Messages are handled one at a time, each one completely (including stopping any show it
/// retires) before the next. Until the retained status has been read back, or the restore
/// timeout passes after connecting, control messages are held back and nothing is published.
pub struct Controller {
    topics: Topics,
    sink: SharedSink,
    painters: PainterRegistry,
    shows: ShowRegistry,
    strips: BTreeMap<String, StripState>,
    grace: Duration,
    restore_timeout: Duration,
    restore_deadline: Option<Instant>,
    music_playing: bool,
    on: bool,
    restoring: bool,
    deferred: Vec<Message>,
    outbox: UnboundedSender<Outgoing>,
    stats: Stats,
}

impl Controller {
    pub fn new(
        config: &LampConfig,
        sink: SharedSink,
        painters: PainterRegistry,
        outbox: UnboundedSender<Outgoing>,
    ) -> Controller {
        let strips = config
            .strips
            .iter()
            .map(|(name, s)| {
                let strip = SubStrip::new(name, sink.clone(), s.first_pixel, s.num_pixels);
                (name.clone(), StripState::new(strip))
            })
            .collect();

        Controller {
            topics: Topics::new(config),
            sink,
            painters,
            shows: ShowRegistry::new(),
            strips,
            grace: config.show.stop_grace(),
            restore_timeout: config.show.restore_timeout(),
            restore_deadline: None,
            music_playing: false,
            on: true,
            restoring: true,
            deferred: Vec::new(),
            outbox,
            stats: Stats::default(),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    /// The broker has (re)sent our subscriptions, so any retained status is on its way.
    pub fn connected(&mut self) {
        if self.restoring {
            log::debug!("Waiting {:?} for retained state", self.restore_timeout);
            self.restore_deadline = Some(Instant::now() + self.restore_timeout);
        }
    }

    /// When to give up on the retained status. Unset until the broker connects.
    pub fn restore_deadline(&self) -> Option<Instant> {
        self.restore_deadline.filter(|_| self.restoring)
    }

    #[cfg(test)]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    #[cfg(test)]
    pub fn shows(&self) -> &ShowRegistry {
        &self.shows
    }

    #[cfg(test)]
    pub fn strip(&self, name: &str) -> Option<&StripState> {
        self.strips.get(name)
    }

    /// The show a strip is attached to right now.
    #[cfg(test)]
    pub fn current_show(&self, name: &str) -> Option<&Show> {
        self.strips
            .get(name)
            .and_then(|s| s.current_show.as_ref())
            .and_then(|fp| self.shows.get(fp))
    }

    pub async fn handle(&mut self, topic: &str, payload: &[u8]) {
        self.stats.messages += 1;

        let message = match self.topics.parse(topic, payload) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                self.drop_update(&e);
                return;
            }
        };

        match message {
            Message::Status(value) => {
                if !self.restoring {
                    log::trace!("Ignoring our own status");
                    return;
                }
                log::info!("Restoring last published state");
                if let Err(e) = self.apply_control(read_only_stripped(value)).await {
                    self.drop_update(&e);
                }
                self.finish_restore().await;
            }
            Message::Control(value) if self.restoring && value.get("initialise").is_some() => {
                log::info!("Initialised by control message");
                if let Err(e) = self.apply_control(value).await {
                    self.drop_update(&e);
                }
                self.finish_restore().await;
            }
            message @ (Message::Control(_) | Message::Param { .. }) if self.restoring => {
                log::debug!("Deferring {:?} until restored", message);
                self.deferred.push(message);
            }
            message => {
                self.route(message).await;
                self.publish_status();
            }
        }
    }

    /// End the restore phase: replay whatever was deferred, then publish.
    pub async fn finish_restore(&mut self) {
        if !self.restoring {
            return;
        }
        self.restoring = false;

        let deferred = std::mem::take(&mut self.deferred);
        if !deferred.is_empty() {
            log::info!("Replaying {} deferred messages", deferred.len());
        }
        for message in deferred {
            self.route(message).await;
        }

        self.publish_status();
    }

    async fn route(&mut self, message: Message) {
        let routed = match message {
            Message::Control(value) | Message::Status(value) => self.apply_control(value).await,
            Message::Param {
                strip,
                half,
                key,
                value,
            } => self.set_param(&strip, half, &key, value).await,
            Message::Music { playing } => {
                self.set_music_playing(playing).await;
                Ok(())
            }
        };

        if let Err(e) = routed {
            self.drop_update(&e);
        }
    }

    async fn apply_control(&mut self, value: Value) -> Result<()> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(LampError::payload(format!(
                    "control payload must be an object, got {}",
                    other
                )))
            }
        };

        if let Some(state) = map.get("state") {
            self.set_state(truthy(state)).await;
        }
        if let Some(brightness) = map.get("brightness") {
            match parse_brightness(brightness) {
                Ok(brightness) => self.set_brightness(brightness),
                Err(e) => self.drop_update(&e),
            }
        }
        if map.contains_key("pixels") {
            log::warn!("pixels is read only, ignoring it");
        }
        if let Some(strips) = map.get("strips") {
            if let Err(e) = self.store_strips(strips).await {
                self.drop_update(&e);
            }
        }

        Ok(())
    }

    pub async fn set_state(&mut self, on: bool) {
        log::info!("Turning lamp {}", if on { "on" } else { "off" });
        self.on = on;

        for name in self.names() {
            if on {
                self.apply(&name).await;
            } else {
                self.detach(&name).await;
            }
        }
    }

    pub fn set_brightness(&mut self, brightness: u8) {
        log::debug!("Setting brightness to {}", brightness);
        let mut sink = self.sink.borrow_mut();
        sink.set_brightness(brightness);
        // A held one-shot frame needs a flush to pick the new brightness up
        if let Err(e) = sink.show() {
            log::error!("{}", e);
        }
    }

    pub async fn set_music_playing(&mut self, playing: bool) {
        if playing != self.music_playing {
            log::info!("Music {}", if playing { "started" } else { "stopped" });
        }
        self.music_playing = playing;

        for name in self.names() {
            self.apply(&name).await;
        }
    }

    /// Store per-strip painter updates. Every strip name is checked before anything is stored.
    async fn store_strips(&mut self, strips: &Value) -> Result<()> {
        let strips = strips
            .as_object()
            .ok_or_else(|| LampError::payload(format!("strips must be an object, got {}", strips)))?;

        if let Some(unknown) = strips
            .keys()
            .find(|name| name.as_str() != ALL && !self.strips.contains_key(name.as_str()))
        {
            return Err(LampError::payload(format!(
                "no strip named {} in lamp {}, ignoring strips",
                unknown,
                self.topics.status()
            )));
        }

        for (name, update) in strips {
            let targets = self.targets(name);
            if let Err(e) = self.store_painters(&targets, update).await {
                self.drop_update(&e);
            }
        }

        Ok(())
    }

    /// Quiet and music halves are independent: a bad one is dropped, the other still applies.
    async fn store_painters(&mut self, targets: &[String], update: &Value) -> Result<()> {
        let update = update
            .as_object()
            .ok_or_else(|| LampError::payload(format!("strip update must be an object, got {}", update)))?;

        if update.contains_key("pixels") {
            log::warn!("Creating substrips at runtime is not supported, ignoring pixels");
        }

        let mut stored = false;
        for half in [Half::Quiet, Half::Music] {
            let value = match update.get(half.key()) {
                None | Some(Value::Null) => continue,
                Some(value) => value.clone(),
            };

            match PainterConfig::from_value(value) {
                Ok(config) => {
                    for name in targets {
                        if let Some(state) = self.strips.get_mut(name) {
                            log::debug!("{} {} = {}", name, half.key(), config.as_value());
                            state.set_config(half, config.clone());
                        }
                    }
                    stored = true;
                }
                Err(e) => {
                    self.stats.dropped += 1;
                    log::warn!("Ignoring {} for {}: {}", half.key(), targets.join(","), e);
                }
            }
        }

        if stored {
            for name in targets {
                self.apply(name).await;
            }
        }

        Ok(())
    }

    async fn set_param(&mut self, strip: &str, half: Half, key: &str, value: Value) -> Result<()> {
        if strip != ALL && !self.strips.contains_key(strip) {
            return Err(LampError::payload(format!("no strip named {}", strip)));
        }

        for name in self.targets(strip) {
            let updated = self
                .strips
                .get(&name)
                .and_then(|state| state.config(half))
                .ok_or_else(|| {
                    LampError::payload(format!("{} has no {} to change {} on", name, half.key(), key))
                })
                .and_then(|config| config.with_param(key, value.clone()));

            match updated {
                Ok(config) => {
                    if let Some(state) = self.strips.get_mut(&name) {
                        state.set_config(half, config);
                    }
                    self.apply(&name).await;
                }
                Err(e) => self.drop_update(&e),
            }
        }

        Ok(())
    }

    /// Bring a strip's attachment in line with its configuration, if the lamp is on.
    async fn apply(&mut self, name: &str) {
        if !self.on {
            log::debug!("Lamp is off, not showing anything on {}", name);
            return;
        }
        if let Err(e) = self.apply_show(name).await {
            self.drop_update(&e);
        }
    }

    /// Move `name` onto the show for its active configuration.
    ///
    /// A strip already on the right show is left alone. Any failure leaves it on its old show.
    pub async fn apply_show(&mut self, name: &str) -> Result<()> {
        let state = self
            .strips
            .get(name)
            .ok_or_else(|| LampError::payload(format!("no strip named {}", name)))?;

        let (config, fingerprint) = match state.resolve(self.music_playing) {
            Some((config, fingerprint)) => (config.clone(), fingerprint),
            None => {
                log::debug!("{} has nothing to show", name);
                return Ok(());
            }
        };

        if state.current_show == Some(fingerprint) && self.shows.get(&fingerprint).is_some() {
            log::trace!("{} is already showing {}", name, fingerprint);
            return Ok(());
        }

        let current = state.current_show;
        let strip = state.strip().clone();
        let painters = &self.painters;
        let grace = self.grace;
        let target = self
            .shows
            .get_or_create(fingerprint, || {
                let pattern = painters.build(&config)?;
                Ok(Show::new(fingerprint, config.kind(), pattern, grace))
            })
            .and_then(|show| show.accepts(&strip).map(|()| show));

        let show = match target {
            Ok(show) => show,
            Err(e) => {
                log::warn!(
                    "{} stays on {} although its configuration is now {}",
                    name,
                    current.map_or_else(|| "nothing".to_string(), |fp| fp.to_string()),
                    fingerprint
                );
                return Err(e);
            }
        };

        self.detach(name).await;

        if let Err(e) = show.attach(strip) {
            if show.strips().is_empty() {
                show.stop().await;
                self.shows.remove(&fingerprint);
            }
            return Err(e);
        }

        log::info!("{} now showing {}", name, show);
        if let Some(state) = self.strips.get_mut(name) {
            state.current_show = Some(fingerprint);
        }
        Ok(())
    }

    /// Take `name` off its show, retiring the show if nobody else is on it.
    async fn detach(&mut self, name: &str) {
        let fingerprint = match self.strips.get_mut(name).and_then(|s| s.current_show.take()) {
            Some(fingerprint) => fingerprint,
            None => return,
        };
        let show = match self.shows.get(&fingerprint) {
            Some(show) => show.clone(),
            None => return,
        };

        show.detach(name).await;
        if show.status() == ShowStatus::Stopped {
            self.shows.remove(&fingerprint);
        }
    }

    /// Brightness, on/off and every strip's configuration.
    pub fn status(&self) -> Value {
        let strips: Map<String, Value> = self
            .strips
            .iter()
            .map(|(name, state)| {
                let mut strip = json!({
                    "first_pixel": state.strip().first_pixel(),
                    "pixels": state.strip().num_pixels(),
                    "painter": state.config(Half::Quiet),
                });
                if let Some(music) = state.config(Half::Music) {
                    strip["music_painter"] = music.as_value().clone();
                }
                (name.clone(), strip)
            })
            .collect();

        let state = if self.on { "ON" } else { "OFF" };
        let sink = self.sink.borrow();
        json!({
            "brightness": sink.brightness(),
            "state": state,
            "pixels": sink.num_pixels(),
            "strips": strips,
        })
    }

    fn publish_status(&self) {
        if self.restoring {
            return;
        }

        let outgoing = Outgoing {
            topic: self.topics.status().to_string(),
            payload: self.status().to_string(),
        };
        if self.outbox.send(outgoing).is_err() {
            log::warn!("Transport has gone, status not published");
        }
    }

    /// Stop every show and leave the lamp dark.
    pub async fn shutdown(&mut self) {
        let shows: Vec<Show> = self.shows.iter().cloned().collect();
        log::info!("Stopping {} shows", shows.len());

        futures::future::join_all(shows.iter().map(|show| show.stop())).await;
        for show in &shows {
            self.shows.remove(&show.fingerprint());
        }

        for state in self.strips.values_mut() {
            state.current_show = None;
            state.strip().off();
        }
        if let Err(e) = self.sink.borrow_mut().show() {
            log::error!("{}", e);
        }
    }

    pub fn report(&self) {
        log::info!(
            "Controller stats [messages: {}, dropped: {}, shows running: {}, shows created: {}]",
            self.stats.messages,
            self.stats.dropped,
            self.shows.len(),
            self.shows.created()
        );
    }

    fn names(&self) -> Vec<String> {
        self.strips.keys().cloned().collect()
    }

    fn targets(&self, name: &str) -> Vec<String> {
        if name == ALL {
            self.names()
        } else {
            vec![name.to_string()]
        }
    }

    fn drop_update(&mut self, e: &LampError) {
        self.stats.dropped += 1;
        log::warn!("Dropped update: {}", e);
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::String(s) => TRUTHY.contains(&s.as_str()),
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_u64() == Some(1),
        _ => false,
    }
}

fn parse_brightness(value: &Value) -> Result<u8> {
    let n = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    n.and_then(|n| u8::try_from(n).ok())
        .ok_or_else(|| LampError::payload(format!("brightness must be 0-255, got {}", value)))
}

/// Our own status carries geometry which can't be set, drop it before applying it.
fn read_only_stripped(mut value: Value) -> Value {
    if let Some(map) = value.as_object_mut() {
        map.remove("pixels");
        if let Some(Value::Object(strips)) = map.get_mut("strips") {
            for strip in strips.values_mut() {
                if let Some(strip) = strip.as_object_mut() {
                    strip.remove("pixels");
                    strip.remove("first_pixel");
                }
            }
        }
    }
    value
}
