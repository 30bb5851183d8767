use std::collections::HashMap;

use super::{Fingerprint, Show, ShowStatus};
use crate::error::Result;

/// Every live show, keyed by the fingerprint of its configuration.
///
/// Two strips asking for the same configuration end up sharing one show.
#[derive(Default)]
pub struct ShowRegistry {
    shows: HashMap<Fingerprint, Show>,
    created: usize,
}

impl ShowRegistry {
    pub fn new() -> ShowRegistry {
        ShowRegistry::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Show> {
        self.shows
            .get(fingerprint)
            .filter(|show| show.status() != ShowStatus::Stopped)
    }

    /// The live show for `fingerprint`, building one with `create` if there isn't one.
    ///
    /// Nothing is registered if `create` fails.
    pub fn get_or_create<F>(&mut self, fingerprint: Fingerprint, create: F) -> Result<Show>
    where
        F: FnOnce() -> Result<Show>,
    {
        if let Some(show) = self.get(&fingerprint) {
            return Ok(show.clone());
        }

        let show = create()?;
        log::debug!("Registered {}", show);
        self.created += 1;
        self.shows.insert(fingerprint, show.clone());
        Ok(show)
    }

    /// Forget a stopped show. Removing an unknown fingerprint does nothing.
    pub fn remove(&mut self, fingerprint: &Fingerprint) -> Option<Show> {
        match self.shows.get(fingerprint).map(Show::status) {
            None => None,
            Some(ShowStatus::Stopped) => {
                let show = self.shows.remove(fingerprint);
                log::debug!("Unregistered {:?}", show);
                show
            }
            Some(status) => {
                log::warn!("Not removing show {} while it is {:?}", fingerprint, status);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shows.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.shows.is_empty()
    }

    /// How many shows have ever been created.
    pub fn created(&self) -> usize {
        self.created
    }

    pub fn iter(&self) -> impl Iterator<Item = &Show> {
        self.shows.values()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::task::LocalSet;

    use super::*;
    use crate::error::LampError;
    use crate::lights::{MemorySink, SubStrip};
    use crate::show::tests::show;

    #[test]
    fn one_show_per_fingerprint() {
        let mut registry = ShowRegistry::new();
        let a = show(json!({"name": "rainbowFade"}), Duration::ZERO);
        let fp = a.fingerprint();

        let first = registry.get_or_create(fp, || Ok(a.clone())).unwrap();
        let second = registry
            .get_or_create(fp, || panic!("should reuse the registered show"))
            .unwrap();

        assert!(first.same_as(&second));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.created(), 1);
    }

    #[test]
    fn failed_creation_registers_nothing() {
        let mut registry = ShowRegistry::new();
        let fp = Fingerprint::of_value(&json!({"name": "discoBall"}));

        let err = registry
            .get_or_create(fp, || Err(LampError::UnknownPainterKind("discoBall".to_string())))
            .err()
            .unwrap();

        assert!(matches!(err, LampError::UnknownPainterKind(_)));
        assert!(registry.is_empty());
        assert!(registry.get(&fp).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn removes_only_stopped_shows() {
        LocalSet::new()
            .run_until(async {
                let sink = Rc::new(RefCell::new(MemorySink::new(10, 255)));
                let mut registry = ShowRegistry::new();
                let s = show(json!({"name": "rainbowFade"}), Duration::from_millis(100));
                let fp = s.fingerprint();
                registry.get_or_create(fp, || Ok(s.clone())).unwrap();

                s.attach(SubStrip::new("a", sink, 0, 10)).unwrap();
                assert!(registry.remove(&fp).is_none());
                assert_eq!(registry.len(), 1);

                s.detach("a").await;
                assert!(registry.get(&fp).is_none());
                assert!(registry.remove(&fp).is_some());
                assert!(registry.remove(&fp).is_none());
                assert!(registry.is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn a_stopped_entry_is_replaced() {
        LocalSet::new()
            .run_until(async {
                let mut registry = ShowRegistry::new();
                let old = show(json!({"name": "rainbowFade"}), Duration::ZERO);
                let fp = old.fingerprint();
                registry.get_or_create(fp, || Ok(old.clone())).unwrap();
                old.stop().await;

                let new = show(json!({"name": "rainbowFade"}), Duration::ZERO);
                let got = registry.get_or_create(fp, || Ok(new.clone())).unwrap();

                assert!(got.same_as(&new));
                assert_eq!(registry.created(), 2);
                assert_eq!(registry.len(), 1);
            })
            .await;
    }
}
