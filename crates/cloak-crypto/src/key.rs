use std::fmt;

/// Block cipher key size in bytes.
pub const KEY_LEN: usize = 8;

/// An 8-byte relay key.
///
/// Derived from a user's stored credential string: UTF-8 bytes truncated to
/// 8, or right-padded with zero bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn from_credential(credential: &str) -> Self {
        let mut key = [0u8; KEY_LEN];
        for (dst, src) in key.iter_mut().zip(credential.as_bytes()) {
            *dst = *src;
        }
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

// Keys never end up in logs.
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}
