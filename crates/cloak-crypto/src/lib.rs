//! Cloak Crypto Library
//!
//! Each user's symmetric key travels hidden in the low bits of their avatar
//! (`stego`). Messages are single-DES ECB with PKCS#7 padding (`cipher`) and
//! the server re-keys them from sender to receiver (`relay`).
//!
//! This is a deliberately weak scheme: a 56-bit key space, no chaining and
//! no authentication. It is reproduced as-is, not hardened.

pub mod cipher;
pub mod error;
pub mod key;
pub mod relay;
pub mod stego;

pub use cipher::{decrypt, encrypt};
pub use error::CryptoError;
pub use key::{KEY_LEN, Key};
pub use relay::relay;
pub use stego::{embed_key, embed_key_file, embed_key_png, extract_key};
