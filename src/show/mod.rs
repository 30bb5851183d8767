use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::color::{Color, OFF};
use crate::error::{LampError, Result};
use crate::lights::SubStrip;
use crate::painter::{Painter, Pattern, Step};

pub mod fingerprint;
pub mod registry;

pub use fingerprint::Fingerprint;
pub use registry::ShowRegistry;

/// Created → Running → Stopping → Stopped. A stopped show is never restarted.
///
/// A one-shot painter's frame loop ends on its own after the last frame, but the show stays
/// `Running` and holds that frame until its last strip detaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowStatus {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// State the frame loop shares with its show.
struct Canvas {
    strips: Vec<SubStrip>,
    frame: Vec<Color>,
}

struct FrameLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    painter: Rc<RefCell<Box<dyn Painter>>>,
}

struct Inner {
    fingerprint: Fingerprint,
    kind: String,
    pattern: Box<dyn Pattern>,
    grace: Duration,
    status: Cell<ShowStatus>,
    pixels: Cell<Option<usize>>,
    canvas: Rc<RefCell<Canvas>>,
    frame_loop: RefCell<Option<FrameLoop>>,
}

/// One running animation, broadcast to every SubStrip attached to it.
///
/// Cloning gives another handle to the same show. The [`ShowRegistry`] holds the owning handle;
/// strips only refer to a show by its fingerprint.
#[derive(Clone)]
pub struct Show {
    inner: Rc<Inner>,
}

impl Show {
    pub fn new(fingerprint: Fingerprint, kind: &str, pattern: Box<dyn Pattern>, grace: Duration) -> Show {
        Show {
            inner: Rc::new(Inner {
                fingerprint,
                kind: kind.to_string(),
                pattern,
                grace,
                status: Cell::new(ShowStatus::Created),
                pixels: Cell::new(None),
                canvas: Rc::new(RefCell::new(Canvas {
                    strips: Vec::new(),
                    frame: Vec::new(),
                })),
                frame_loop: RefCell::new(None),
            }),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.inner.fingerprint
    }

    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    pub fn status(&self) -> ShowStatus {
        self.inner.status.get()
    }

    /// The geometry this show animates, fixed by the first strip attached.
    pub fn pixels(&self) -> Option<usize> {
        self.inner.pixels.get()
    }

    #[cfg(test)]
    pub fn same_as(&self, other: &Show) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn strips(&self) -> Vec<String> {
        self.inner
            .canvas
            .borrow()
            .strips
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn is_attached(&self, name: &str) -> bool {
        self.inner.canvas.borrow().strips.iter().any(|s| s.name() == name)
    }

    /// False once a one-shot painter has painted its last frame, or the show has stopped.
    #[cfg(test)]
    pub fn is_painting(&self) -> bool {
        self.inner
            .frame_loop
            .borrow()
            .as_ref()
            .map_or(false, |l| !l.handle.is_finished())
    }

    /// Whether `strip` could join this show.
    pub fn accepts(&self, strip: &SubStrip) -> Result<()> {
        match self.pixels() {
            Some(pixels) if pixels != strip.num_pixels() => Err(LampError::GeometryMismatch {
                show: pixels,
                strip: strip.name().to_string(),
                pixels: strip.num_pixels(),
            }),
            _ => Ok(()),
        }
    }

    pub fn attach(&self, strip: SubStrip) -> Result<()> {
        match self.status() {
            ShowStatus::Stopping | ShowStatus::Stopped => {
                return Err(LampError::configuration(self.kind(), "show has stopped"))
            }
            ShowStatus::Created | ShowStatus::Running => (),
        }
        self.accepts(&strip)?;

        if self.is_attached(strip.name()) {
            return Ok(());
        }

        log::debug!("{}: attaching {:?}", self, strip);
        self.inner.pixels.set(Some(strip.num_pixels()));
        self.inner.canvas.borrow_mut().strips.push(strip);

        let finished = self
            .inner
            .frame_loop
            .borrow()
            .as_ref()
            .map_or(true, |l| l.handle.is_finished());

        if finished {
            // First strip, or a one-shot which has already painted its frames
            self.launch();
        }

        Ok(())
    }

    /// Remove a strip and blank it. Detaching the last strip stops the show.
    pub async fn detach(&self, name: &str) {
        let removed = {
            let mut canvas = self.inner.canvas.borrow_mut();
            match canvas.strips.iter().position(|s| s.name() == name) {
                None => {
                    log::debug!("{}: {} was not attached", self, name);
                    return;
                }
                Some(_) if canvas.strips.len() == 1 => None,
                Some(i) => Some(canvas.strips.remove(i)),
            }
        };

        log::debug!("{}: detached {}", self, name);
        match removed {
            Some(strip) => {
                strip.off();
                if let Err(e) = strip.show() {
                    log::error!("{}: {}", self, e);
                }
            }
            None => self.stop().await,
        }
    }

    /// Two phase stop: ask the frame loop to finish, wait out the grace period, then abort it.
    ///
    /// Either way every attached pixel ends up off and the painter is finished before the show
    /// reports `Stopped`.
    pub async fn stop(&self) {
        match self.status() {
            ShowStatus::Stopping | ShowStatus::Stopped => return,
            ShowStatus::Created | ShowStatus::Running => (),
        }
        self.inner.status.set(ShowStatus::Stopping);
        log::debug!("{}: stopping", self);

        let frame_loop = self.inner.frame_loop.borrow_mut().take();
        let painter = match frame_loop {
            Some(FrameLoop {
                cancel,
                mut handle,
                painter,
            }) => {
                cancel.cancel();
                match timeout(self.inner.grace, &mut handle).await {
                    Ok(Ok(())) => log::trace!("{}: frame loop exited", self),
                    Ok(Err(e)) => log::error!("{}: frame loop failed: {}", self, e),
                    Err(_) => {
                        log::warn!(
                            "{}: frame loop still running after {:?}, terminating it",
                            self,
                            self.inner.grace
                        );
                        handle.abort();
                        if let Err(e) = handle.await {
                            if !e.is_cancelled() {
                                log::error!("{}: frame loop failed: {}", self, e);
                            }
                        }
                    }
                }
                Some(painter)
            }
            None => None,
        };

        let strips = std::mem::take(&mut self.inner.canvas.borrow_mut().strips);
        for strip in &strips {
            strip.off();
        }
        if let Some(strip) = strips.first() {
            if let Err(e) = strip.show() {
                log::error!("{}: {}", self, e);
            }
        }

        if let Some(painter) = painter {
            painter.borrow_mut().finish();
        }

        self.inner.status.set(ShowStatus::Stopped);
        log::debug!("{}: stopped", self);
    }

    fn launch(&self) {
        let pixels = self.pixels().unwrap_or_default();
        let painter = Rc::new(RefCell::new(self.inner.pattern.start(pixels)));
        let cancel = CancellationToken::new();

        let handle = tokio::task::spawn_local(run(
            self.to_string(),
            self.inner.canvas.clone(),
            painter.clone(),
            cancel.clone(),
            pixels,
        ));

        let previous = self.inner.frame_loop.borrow_mut().replace(FrameLoop {
            cancel,
            handle,
            painter,
        });
        if let Some(previous) = previous {
            previous.painter.borrow_mut().finish();
        }

        self.inner.status.set(ShowStatus::Running);
    }
}

/// The frame loop: paint, broadcast to every attached strip, flush once, wait.
async fn run(
    label: String,
    canvas: Rc<RefCell<Canvas>>,
    painter: Rc<RefCell<Box<dyn Painter>>>,
    cancel: CancellationToken,
    pixels: usize,
) {
    let mut frame = vec![OFF; pixels];
    let mut frames: u64 = 0;

    while !cancel.is_cancelled() {
        let step = painter.borrow_mut().paint(&mut frame);
        frames += 1;

        {
            let mut canvas = canvas.borrow_mut();
            for strip in &canvas.strips {
                strip.write(&frame);
            }
            if let Some(strip) = canvas.strips.first() {
                if let Err(e) = strip.show() {
                    log::error!("{}: {}", label, e);
                }
            }
            canvas.frame.clone_from(&frame);
        }
        log::trace!("{}: frame {}", label, frames);

        match step {
            Step::Wait(period) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(period) => (),
                }
            }
            Step::Yield => tokio::task::yield_now().await,
            Step::Done => {
                log::debug!("{}: finished after {} frames", label, frames);
                break;
            }
        }
    }
}

impl std::fmt::Display for Show {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fp = self.fingerprint().to_string();
        write!(f, "{}[{}]", self.kind(), &fp[..fp.len().min(8)])
    }
}

impl std::fmt::Debug for Show {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Show({}, {:?})", self, self.status())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::{json, Value};
    use tokio::task::LocalSet;

    use super::*;
    use crate::lights::MemorySink;
    use crate::painter::testing::{config, registry};

    const RED: Color = Color::new(255, 0, 0);
    const GRACE: Duration = Duration::from_millis(500);

    pub fn show(value: Value, grace: Duration) -> Show {
        let config = config(value);
        let pattern = registry().build(&config).ok().unwrap();
        Show::new(Fingerprint::of(Some(&config)), config.kind(), pattern, grace)
    }

    fn lamp() -> (Rc<RefCell<MemorySink>>, SubStrip, SubStrip, SubStrip) {
        let sink = Rc::new(RefCell::new(MemorySink::new(40, 255)));
        let a = SubStrip::new("a", sink.clone(), 0, 10);
        let b = SubStrip::new("b", sink.clone(), 10, 10);
        let c = SubStrip::new("c", sink.clone(), 20, 20);
        (sink, a, b, c)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_paints_then_holds() {
        LocalSet::new()
            .run_until(async {
                let (sink, a, _, _) = lamp();
                let show = show(json!({"name": "solidColour", "colour": [255, 0, 0]}), GRACE);

                assert_eq!(show.status(), ShowStatus::Created);
                show.attach(a.clone()).unwrap();
                assert_eq!(show.status(), ShowStatus::Running);
                settle().await;

                assert!(sink.borrow().pixels()[..10].iter().all(|c| *c == RED));
                assert!(sink.borrow().pixels()[10..].iter().all(|c| *c == OFF));
                assert_eq!(sink.borrow().flushes(), 1);
                assert_eq!(show.status(), ShowStatus::Running);
                assert!(!show.is_painting());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn broadcasts_one_frame_to_every_strip() {
        LocalSet::new()
            .run_until(async {
                let (sink, a, b, _) = lamp();
                let show = show(json!({"name": "rainbowCycle", "wait_ms": 10}), GRACE);

                show.attach(a).unwrap();
                show.attach(b).unwrap();
                sleep(Duration::from_millis(35)).await;

                let pixels = sink.borrow().pixels().to_vec();
                assert_ne!(pixels[0], OFF);
                assert_eq!(pixels[..10], pixels[10..20]);
                assert_eq!(show.strips(), vec!["a", "b"]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_attach_restarts_a_finished_one_shot() {
        LocalSet::new()
            .run_until(async {
                let (sink, a, b, _) = lamp();
                let show = show(json!({"name": "solidColour", "colour": [255, 0, 0]}), GRACE);

                show.attach(a).unwrap();
                settle().await;
                show.attach(b).unwrap();
                settle().await;

                assert!(sink.borrow().pixels()[..20].iter().all(|c| *c == RED));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_a_different_geometry() {
        LocalSet::new()
            .run_until(async {
                let (_, a, _, c) = lamp();
                let show = show(json!({"name": "rainbowFade"}), GRACE);

                show.attach(c).unwrap();
                let err = show.attach(a).unwrap_err();

                assert!(matches!(err, LampError::GeometryMismatch { show: 20, pixels: 10, .. }));
                assert_eq!(show.strips(), vec!["c"]);
                show.stop().await;
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn detaching_the_last_strip_blanks_and_stops() {
        LocalSet::new()
            .run_until(async {
                let (sink, a, b, _) = lamp();
                let show = show(
                    json!({"name": "theaterChase", "colour": [255, 0, 0], "spacing": 1}),
                    GRACE,
                );

                show.attach(a).unwrap();
                show.attach(b).unwrap();
                sleep(Duration::from_millis(120)).await;

                show.detach("a").await;
                assert_eq!(show.status(), ShowStatus::Running);
                sleep(Duration::from_millis(60)).await;
                assert!(sink.borrow().pixels()[..10].iter().all(|c| *c == OFF));
                assert!(sink.borrow().pixels()[10..20].iter().all(|c| *c == RED));

                show.detach("b").await;
                assert_eq!(show.status(), ShowStatus::Stopped);
                assert!(show.strips().is_empty());
                assert!(sink.borrow().pixels()[10..20].iter().all(|c| *c == OFF));

                // Nothing paints once stopped
                sleep(Duration::from_millis(200)).await;
                assert!(sink.borrow().pixels()[10..20].iter().all(|c| *c == OFF));
                assert!(show.attach(SubStrip::new("x", sink.clone(), 0, 10)).is_err());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn forces_a_loop_that_misses_the_grace_period() {
        LocalSet::new()
            .run_until(async {
                let (sink, a, _, _) = lamp();
                let show = show(
                    json!({"name": "colourWipe", "colour": [255, 0, 0], "wait_ms": 60000}),
                    Duration::ZERO,
                );

                show.attach(a).unwrap();
                settle().await;
                assert_eq!(sink.borrow().pixels()[0], RED);

                show.stop().await;

                assert_eq!(show.status(), ShowStatus::Stopped);
                assert!(sink.borrow().pixels()[..10].iter().all(|c| *c == OFF));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        LocalSet::new()
            .run_until(async {
                let (_, a, _, _) = lamp();
                let show = show(json!({"name": "rainbowFade"}), GRACE);

                show.attach(a).unwrap();
                show.stop().await;
                show.stop().await;
                show.detach("a").await;

                assert_eq!(show.status(), ShowStatus::Stopped);
            })
            .await;
    }
}
