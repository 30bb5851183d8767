use crate::lights::SubStrip;
use crate::painter::PainterConfig;
use crate::show::Fingerprint;

/// Which of a strip's two configurations a change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Quiet,
    Music,
}

impl Half {
    pub fn key(self) -> &'static str {
        match self {
            Half::Quiet => "painter",
            Half::Music => "music_painter",
        }
    }

    pub fn from_key(key: &str) -> Option<Half> {
        match key {
            "painter" => Some(Half::Quiet),
            "music_painter" => Some(Half::Music),
            _ => None,
        }
    }
}

/// What the controller knows about one SubStrip.
///
/// `current_show` is the fingerprint of the show the strip is attached to. The show itself
/// belongs to the registry.
#[derive(Debug)]
pub struct StripState {
    strip: SubStrip,
    quiet: Option<PainterConfig>,
    quiet_fingerprint: Fingerprint,
    music: Option<PainterConfig>,
    music_fingerprint: Fingerprint,
    pub current_show: Option<Fingerprint>,
}

impl StripState {
    pub fn new(strip: SubStrip) -> StripState {
        StripState {
            strip,
            quiet: None,
            quiet_fingerprint: Fingerprint::Unset,
            music: None,
            music_fingerprint: Fingerprint::Unset,
            current_show: None,
        }
    }

    pub fn strip(&self) -> &SubStrip {
        &self.strip
    }

    pub fn config(&self, half: Half) -> Option<&PainterConfig> {
        match half {
            Half::Quiet => self.quiet.as_ref(),
            Half::Music => self.music.as_ref(),
        }
    }

    pub fn fingerprint(&self, half: Half) -> Fingerprint {
        match half {
            Half::Quiet => self.quiet_fingerprint,
            Half::Music => self.music_fingerprint,
        }
    }

    pub fn set_config(&mut self, half: Half, config: PainterConfig) {
        let fingerprint = Fingerprint::of(Some(&config));
        match half {
            Half::Quiet => {
                self.quiet = Some(config);
                self.quiet_fingerprint = fingerprint;
            }
            Half::Music => {
                self.music = Some(config);
                self.music_fingerprint = fingerprint;
            }
        }
    }

    /// The configuration this strip should be showing.
    pub fn resolve(&self, music_playing: bool) -> Option<(&PainterConfig, Fingerprint)> {
        let half = if music_playing { Half::Music } else { Half::Quiet };
        self.config(half).map(|config| (config, self.fingerprint(half)))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::lights::MemorySink;
    use crate::painter::testing::config;

    fn state() -> StripState {
        let sink = Rc::new(RefCell::new(MemorySink::new(10, 255)));
        StripState::new(SubStrip::new("left", sink, 0, 10))
    }

    #[test]
    fn resolves_by_mode() {
        let mut state = state();
        assert!(state.resolve(false).is_none());
        assert!(state.resolve(true).is_none());

        let quiet = config(json!({"name": "rainbowFade"}));
        state.set_config(Half::Quiet, quiet.clone());

        let (resolved, fp) = state.resolve(false).unwrap();
        assert_eq!(resolved, &quiet);
        assert_eq!(fp, Fingerprint::of(Some(&quiet)));
        assert!(state.resolve(true).is_none());

        let music = config(json!({"name": "musicEnergy"}));
        state.set_config(Half::Music, music.clone());
        assert_eq!(state.resolve(true).unwrap().0, &music);
        assert_eq!(state.fingerprint(Half::Quiet), fp);
    }

    #[test]
    fn half_keys() {
        for half in [Half::Quiet, Half::Music] {
            assert_eq!(Half::from_key(half.key()), Some(half));
        }
        assert_eq!(Half::from_key("mirror"), None);
    }
}
