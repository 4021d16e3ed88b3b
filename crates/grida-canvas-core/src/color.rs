//! Linear RGBA color used by document payloads.

use peniko::Color;
use peniko::color::{AlphaColor, LinearSrgb};
use serde::{Deserialize, Serialize};

/// A normalized linear-light RGBA color with `f32` channels.
///
/// Documents store colors in linear space so blending and gradient math never
/// round-trips through 8-bit sRGB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba32F {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba32F {
    pub const BLACK: Rgba32F = Rgba32F::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Rgba32F = Rgba32F::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Rgba32F = Rgba32F::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Convert from 8-bit sRGB channels.
    pub fn from_srgb8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color::from_rgba8(r, g, b, a).into()
    }

    /// Convert to 8-bit sRGB channels.
    pub fn to_srgb8(self) -> [u8; 4] {
        let rgba = Color::from(self).to_rgba8();
        [rgba.r, rgba.g, rgba.b, rgba.a]
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (sRGB).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().strip_prefix('#')?;
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let mut out = [0u8; 3];
                for (i, c) in hex.chars().enumerate() {
                    let v = c.to_digit(16)? as u8;
                    out[i] = v * 17;
                }
                Some(Self::from_srgb8(out[0], out[1], out[2], 255))
            }
            6 | 8 => {
                let r = channel(hex.get(0..2)?)?;
                let g = channel(hex.get(2..4)?)?;
                let b = channel(hex.get(4..6)?)?;
                let a = match hex.get(6..8) {
                    Some(a) => channel(a)?,
                    None => 255,
                };
                Some(Self::from_srgb8(r, g, b, a))
            }
            _ => None,
        }
    }
}

impl From<Color> for Rgba32F {
    fn from(color: Color) -> Self {
        let [r, g, b, a] = color.convert::<LinearSrgb>().components;
        Self { r, g, b, a }
    }
}

impl From<Rgba32F> for Color {
    fn from(color: Rgba32F) -> Self {
        AlphaColor::<LinearSrgb>::new([color.r, color.g, color.b, color.a]).convert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_and_white_are_exact() {
        assert_eq!(Rgba32F::from_srgb8(0, 0, 0, 255), Rgba32F::BLACK);
        let white = Rgba32F::from_srgb8(255, 255, 255, 255);
        assert!((white.r - 1.0).abs() < 1e-5);
        assert!((white.a - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_midtone_is_linearized() {
        // sRGB 0.5 is roughly 0.214 in linear light.
        let gray = Rgba32F::from_srgb8(128, 128, 128, 255);
        assert!(gray.r > 0.2 && gray.r < 0.23);
    }

    #[test]
    fn test_srgb8_roundtrip() {
        let c = Rgba32F::from_srgb8(12, 200, 99, 128);
        assert_eq!(c.to_srgb8(), [12, 200, 99, 128]);
    }

    #[test]
    fn test_from_hex() {
        assert_eq!(Rgba32F::from_hex("#000"), Some(Rgba32F::BLACK));
        assert_eq!(Rgba32F::from_hex("#ff0000").map(|c| c.to_srgb8()), Some([255, 0, 0, 255]));
        assert_eq!(Rgba32F::from_hex("#ff000080").map(|c| c.to_srgb8()[3]), Some(128));
        assert_eq!(Rgba32F::from_hex("red"), None);
    }
}
