use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Embed-time: the key to hide must be exactly 8 ASCII characters.
    #[error("key must be exactly 8 ASCII characters (got {0} bytes)")]
    InvalidKeyLength(usize),

    /// Embed-time: the cover image cannot hold 64 bits.
    #[error("cover image has {pixels} pixels, at least 22 are needed")]
    ImageTooSmall { pixels: u64 },

    /// Bad base64, bad block length, invalid UTF-8 or an undecodable image.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
