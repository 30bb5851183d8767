use std::cell::RefCell;
use std::rc::Rc;

use crate::color::{Color, OFF};
use crate::error::Result;

/// The physical strip: an addressable range of pixels plus a brightness and a flush.
pub trait PixelSink {
    fn num_pixels(&self) -> usize;
    fn set_pixel(&mut self, index: usize, color: Color);
    fn brightness(&self) -> u8;
    fn set_brightness(&mut self, brightness: u8);
    /// Push the buffered pixels out to the LEDs.
    fn show(&mut self) -> Result<()>;
}

/// Everything runs on the one scheduler thread, so the sink is shared without locking.
pub type SharedSink = Rc<RefCell<dyn PixelSink>>;

/// A named contiguous range of the lamp's sink.
#[derive(Clone)]
pub struct SubStrip {
    name: Rc<str>,
    first_pixel: usize,
    num_pixels: usize,
    sink: SharedSink,
}

impl SubStrip {
    pub fn new(name: &str, sink: SharedSink, first_pixel: usize, num_pixels: usize) -> SubStrip {
        SubStrip {
            name: name.into(),
            first_pixel,
            num_pixels,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn first_pixel(&self) -> usize {
        self.first_pixel
    }

    pub fn num_pixels(&self) -> usize {
        self.num_pixels
    }

    /// Write a whole frame. Extra colours are ignored, missing ones leave the pixel alone.
    pub fn write(&self, frame: &[Color]) {
        let mut sink = self.sink.borrow_mut();
        for (i, color) in frame.iter().take(self.num_pixels).enumerate() {
            sink.set_pixel(self.first_pixel + i, *color);
        }
    }

    pub fn fill(&self, color: Color) {
        let mut sink = self.sink.borrow_mut();
        for i in 0..self.num_pixels {
            sink.set_pixel(self.first_pixel + i, color);
        }
    }

    pub fn off(&self) {
        self.fill(OFF);
    }

    pub fn show(&self) -> Result<()> {
        self.sink.borrow_mut().show()
    }
}

impl std::fmt::Debug for SubStrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SubStrip({} @{}+{})",
            self.name, self.first_pixel, self.num_pixels
        )
    }
}

/// Pixel buffer with no hardware behind it. Used when the `ws281x` feature is off, and by tests.
pub struct MemorySink {
    pixels: Vec<Color>,
    brightness: u8,
    flushes: usize,
}

impl MemorySink {
    pub fn new(num_pixels: usize, brightness: u8) -> MemorySink {
        MemorySink {
            pixels: vec![OFF; num_pixels],
            brightness,
            flushes: 0,
        }
    }

    #[cfg(test)]
    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    #[cfg(test)]
    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl PixelSink for MemorySink {
    fn num_pixels(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Color) {
        if let Some(p) = self.pixels.get_mut(index) {
            *p = color;
        }
    }

    fn brightness(&self) -> u8 {
        self.brightness
    }

    fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness;
    }

    fn show(&mut self) -> Result<()> {
        self.flushes += 1;
        log::trace!("Flushed {} pixels", self.pixels.len());
        Ok(())
    }
}

#[cfg(feature = "ws281x")]
pub use self::ws281x::Ws281xSink;

#[cfg(feature = "ws281x")]
mod ws281x {
    use rs_ws281x::{ChannelBuilder, Controller, ControllerBuilder, StripType};

    use super::PixelSink;
    use crate::color::Color;
    use crate::config::{self, LedConfig};
    use crate::error::{LampError, Result};

    pub struct Ws281xSink {
        controller: Controller,
        channel: usize,
    }

    impl Ws281xSink {
        pub fn open(led: &LedConfig) -> Result<Ws281xSink> {
            let strip_type = match led.strip_type {
                config::StripType::Grb => StripType::Ws2811Grb,
                config::StripType::Gbr => StripType::Ws2811Gbr,
                config::StripType::Rgb => StripType::Ws2811Rgb,
            };

            log::info!(
                "Opening {} pixel strip on pin {} (channel {})",
                led.count,
                led.pin,
                led.channel
            );

            let controller = ControllerBuilder::new()
                .freq(led.freq_hz)
                .dma(led.dma)
                .channel(
                    led.channel,
                    ChannelBuilder::new()
                        .pin(led.pin)
                        .count(led.count as i32)
                        .strip_type(strip_type)
                        .invert(led.invert)
                        .brightness(led.brightness)
                        .build(),
                )
                .build()
                .map_err(|e| LampError::Sink(format!("Failed to build controller: {}", e)))?;

            Ok(Ws281xSink {
                controller,
                channel: led.channel,
            })
        }
    }

    impl PixelSink for Ws281xSink {
        fn num_pixels(&self) -> usize {
            self.controller.leds(self.channel).len()
        }

        fn set_pixel(&mut self, index: usize, color: Color) {
            if let Some(led) = self.controller.leds_mut(self.channel).get_mut(index) {
                // Raw colours are little endian 0xWWRRGGBB
                *led = [color.b, color.g, color.r, 0];
            }
        }

        fn brightness(&self) -> u8 {
            self.controller.brightness(self.channel)
        }

        fn set_brightness(&mut self, brightness: u8) {
            self.controller.set_brightness(self.channel, brightness);
        }

        fn show(&mut self) -> Result<()> {
            self.controller
                .render()
                .map_err(|e| LampError::Sink(format!("Failed to render: {}", e)))
        }
    }
}
