use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod gamma;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const OFF: Color = Color { r: 0, g: 0, b: 0 };

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Color {
        Color { r, g, b }
    }

    /// Fully saturated colour for a 0-255 hue, the classic colour wheel used by rainbow painters.
    pub fn wheel(hue: u8) -> Color {
        let h = hue as u16;
        match h {
            0..=84 => Color::new((255 - h * 3) as u8, (h * 3) as u8, 0),
            85..=169 => {
                let h = h - 85;
                Color::new(0, (255 - h * 3) as u8, (h * 3) as u8)
            }
            _ => {
                let h = h - 170;
                Color::new((h * 3) as u8, 0, (255 - h * 3) as u8)
            }
        }
    }

    /// Scale every channel by `factor` (clamped to 0..=1).
    pub fn scale(self, factor: f32) -> Color {
        let f = factor.clamp(0.0, 1.0);
        Color::new(
            (self.r as f32 * f) as u8,
            (self.g as f32 * f) as u8,
            (self.b as f32 * f) as u8,
        )
    }

    fn parse(s: &str) -> Option<Color> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 {
                return None;
            }
            let v = u32::from_str_radix(hex, 16).ok()?;
            return Some(Color::new((v >> 16) as u8, (v >> 8) as u8, v as u8));
        }

        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u8>())
            .collect::<Result<Vec<u8>, _>>()
            .ok()?;

        match parts.as_slice() {
            [r, g, b] => Some(Color::new(*r, *g, *b)),
            _ => None,
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.r, self.g, self.b].serialize(serializer)
    }
}

struct ColorVisitor;

impl<'de> Visitor<'de> for ColorVisitor {
    type Value = Color;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an [r, g, b] array, an \"r,g,b\" string or a \"#rrggbb\" string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Color, E> {
        Color::parse(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Color, A::Error> {
        let mut channel = |i: usize| -> Result<u8, A::Error> {
            seq.next_element::<u8>()?
                .ok_or_else(|| de::Error::invalid_length(i, &"3 channels"))
        };
        let color = Color::new(channel(0)?, channel(1)?, channel(2)?);

        if seq.next_element::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(4, &"3 channels"));
        }

        Ok(color)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Color, D::Error> {
        deserializer.deserialize_any(ColorVisitor)
    }
}
