//! LSB key channel.
//!
//! A user's 8-byte key is hidden in the least-significant bits of their
//! avatar. Bits are taken MSB-first from each key byte and written to the
//! R, G, B channels of pixels in row-major order, 3 bits per pixel, so the
//! 64 key bits occupy the first 22 pixels (the last one only partly).

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, RgbImage};

use crate::error::CryptoError;
use crate::key::KEY_LEN;

const KEY_BITS: usize = KEY_LEN * 8;

/// Minimum cover size in pixels: ceil(64 / 3).
pub const MIN_COVER_PIXELS: u64 = KEY_BITS.div_ceil(3) as u64;

/// Recover the key string hidden in an encoded image.
///
/// Non-RGB images (grayscale, RGBA, ...) are converted to RGB first.
pub fn extract_key(image_bytes: &[u8]) -> Result<String, CryptoError> {
    let image = image::load_from_memory(image_bytes)
        .map_err(|e| CryptoError::Decode(format!("unreadable image: {}", e)))?;
    let rgb = image.to_rgb8();

    // The raw buffer is R,G,B,R,G,B,... row by row: exactly the scan order.
    let channels = rgb.as_raw();
    if channels.len() < KEY_BITS {
        return Err(CryptoError::Decode(format!(
            "image has {} pixels, at least {} are needed",
            pixel_count(&rgb),
            MIN_COVER_PIXELS
        )));
    }

    let mut key = [0u8; KEY_LEN];
    for (byte, bits) in key.iter_mut().zip(channels[..KEY_BITS].chunks_exact(8)) {
        *byte = bits.iter().fold(0u8, |acc, channel| (acc << 1) | (channel & 1));
    }

    String::from_utf8(key.to_vec())
        .map_err(|e| CryptoError::Decode(format!("hidden key is not UTF-8: {}", e)))
}

/// Hide `key` in a copy of `image`. Only the LSBs of the first 64 channel
/// values change.
pub fn embed_key(image: &DynamicImage, key: &str) -> Result<RgbImage, CryptoError> {
    if key.len() != KEY_LEN || !key.is_ascii() {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }

    let mut rgb = image.to_rgb8();
    let pixels = pixel_count(&rgb);
    if pixels < MIN_COVER_PIXELS {
        return Err(CryptoError::ImageTooSmall { pixels });
    }

    let channels: &mut [u8] = &mut rgb;
    let bits = key
        .as_bytes()
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1));
    for (channel, bit) in channels.iter_mut().zip(bits) {
        *channel = (*channel & 0xFE) | bit;
    }

    Ok(rgb)
}

/// Decode `image_bytes`, hide `key` and re-encode as PNG.
///
/// PNG is lossless, so the hidden bits survive the round trip.
pub fn embed_key_png(image_bytes: &[u8], key: &str) -> Result<Vec<u8>, CryptoError> {
    let image = image::load_from_memory(image_bytes)
        .map_err(|e| CryptoError::Decode(format!("unreadable image: {}", e)))?;
    let stego = embed_key(&image, key)?;

    let mut out = Cursor::new(Vec::new());
    stego.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Read the cover at `input`, hide `key`, write a PNG to `output`.
pub fn embed_key_file(input: &Path, key: &str, output: &Path) -> Result<(), CryptoError> {
    let image = image::open(input)?;
    let stego = embed_key(&image, key)?;
    stego.save_with_format(output, ImageFormat::Png)?;
    Ok(())
}

fn pixel_count(image: &RgbImage) -> u64 {
    u64::from(image.width()) * u64::from(image.height())
}
