use std::fs::File;
use std::io::{self, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::AudioConfig;

pub mod spectrum;

/// The most recent block of captured samples. `seq` increases with every block.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub seq: u64,
    pub samples: Vec<f32>,
}

/// Something the capture thread can block on for samples.
pub trait AudioSource: Send {
    /// Fill `block` with the next samples, scaled as signed 16 bit values.
    fn read_block(&mut self, block: &mut [f32]) -> io::Result<()>;
}

/// Raw signed 16 bit little endian mono PCM, e.g. a FIFO fed by `arecord -t raw`.
pub struct PcmSource<R> {
    reader: R,
    bytes: Vec<u8>,
}

impl<R: Read + Send> PcmSource<R> {
    pub fn new(reader: R) -> PcmSource<R> {
        PcmSource {
            reader,
            bytes: Vec::new(),
        }
    }
}

impl<R: Read + Send> AudioSource for PcmSource<R> {
    fn read_block(&mut self, block: &mut [f32]) -> io::Result<()> {
        self.bytes.resize(block.len() * 2, 0);
        self.reader.read_exact(&mut self.bytes)?;

        for (sample, bytes) in block.iter_mut().zip(self.bytes.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]) as f32;
        }

        Ok(())
    }
}

pub type SourceOpener = Box<dyn Fn(&AudioConfig) -> io::Result<Box<dyn AudioSource>> + Send + Sync>;

struct CaptureState {
    subscribers: usize,
    /// Set to false to ask the current capture thread to exit after its next block
    running: Option<Arc<AtomicBool>>,
}

struct MicInner {
    config: AudioConfig,
    opener: SourceOpener,
    // Written from the capture thread and read from the show tasks
    slot: Mutex<Option<AudioBlock>>,
    state: Mutex<CaptureState>,
}

/// The lamp's one audio input, shared by every audio reactive show.
///
/// Capture only runs while at least one [`MicSubscription`] is alive. Readers never wait for
/// data: no block yet, or a capture thread holding the lock, both read as `None`.
#[derive(Clone)]
pub struct Microphone {
    inner: Arc<MicInner>,
}

/// Keeps the microphone capturing. Dropping it releases the subscription.
pub struct MicSubscription {
    mic: Microphone,
}

impl Microphone {
    pub fn new(config: AudioConfig) -> Microphone {
        Microphone::with_opener(config, Box::new(open_device))
    }

    pub fn with_opener(config: AudioConfig, opener: SourceOpener) -> Microphone {
        Microphone {
            inner: Arc::new(MicInner {
                config,
                opener,
                slot: Mutex::new(None),
                state: Mutex::new(CaptureState {
                    subscribers: 0,
                    running: None,
                }),
            }),
        }
    }

    pub fn subscribe(&self) -> MicSubscription {
        let mut state = self.inner.state.lock();
        state.subscribers += 1;
        log::debug!("Microphone subscribed ({} clients)", state.subscribers);

        if state.subscribers == 1 {
            let running = Arc::new(AtomicBool::new(true));
            state.running = Some(running.clone());

            let inner = self.inner.clone();
            let spawned = std::thread::Builder::new()
                .name("audio-capture".to_string())
                .spawn(move || capture(inner, running));

            if let Err(e) = spawned {
                log::error!("Failed to start audio capture thread: {}", e);
            }
        }

        MicSubscription { mic: self.clone() }
    }

    fn unsubscribe(&self) {
        let mut state = self.inner.state.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        log::debug!("Microphone released ({} clients)", state.subscribers);

        if state.subscribers == 0 {
            if let Some(running) = state.running.take() {
                running.store(false, Ordering::SeqCst);
            }
            // Nobody should see a stale block on the next subscribe
            self.inner.slot.lock().take();
        }
    }

    #[cfg(test)]
    pub fn subscribers(&self) -> usize {
        self.inner.state.lock().subscribers
    }

    /// A copy of the latest block, if there is one and the capture thread isn't mid-write.
    pub fn latest(&self) -> Option<AudioBlock> {
        self.inner.slot.try_lock().and_then(|slot| slot.clone())
    }

    #[cfg(test)]
    pub fn feed(&self, samples: Vec<f32>) {
        let mut slot = self.inner.slot.lock();
        let seq = slot.as_ref().map_or(0, |b| b.seq + 1);
        *slot = Some(AudioBlock { seq, samples });
    }
}

impl Drop for MicSubscription {
    fn drop(&mut self) {
        self.mic.unsubscribe();
    }
}

fn open_device(config: &AudioConfig) -> io::Result<Box<dyn AudioSource>> {
    let file = File::open(&config.device)?;
    Ok(Box::new(PcmSource::new(BufReader::new(file))))
}

/// Body of the capture thread. Device reads block, which is why this isn't a tokio task.
fn capture(inner: Arc<MicInner>, running: Arc<AtomicBool>) {
    log::info!("Starting audio capture from {}", inner.config.device);

    let mut source = None;
    let mut block = vec![0.0; inner.config.samples_per_block()];
    let mut seq = 0;

    while running.load(Ordering::SeqCst) {
        if source.is_none() {
            match (inner.opener)(&inner.config) {
                Ok(opened) => source = Some(opened),
                Err(e) => {
                    log::warn!("Error opening audio device {}: {}", inner.config.device, e);
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
            }
        }
        let reader = match source.as_mut() {
            Some(reader) => reader,
            None => continue,
        };

        match reader.read_block(&mut block) {
            Ok(()) => {
                let mut slot = inner.slot.lock();
                if running.load(Ordering::SeqCst) {
                    slot.replace(AudioBlock {
                        seq,
                        samples: block.clone(),
                    });
                    seq += 1;
                }
            }
            Err(e) => {
                log::warn!("Error reading audio, reopening: {}", e);
                source = None;
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }

    log::info!("Audio capture stopped");
}
