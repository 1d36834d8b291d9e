use crate::cipher::{decrypt, encrypt};
use crate::error::CryptoError;
use crate::key::Key;

/// Re-key a ciphertext: decrypt under `from`, encrypt under `to`.
///
/// Pure and side-effect free. Used at send time (sender key -> receiver key,
/// before storage) and at history-read time (receiver key -> viewer key,
/// never written back). The intermediate plaintext is dropped on return.
pub fn relay(ciphertext: &str, from: &Key, to: &Key) -> Result<String, CryptoError> {
    let plain = decrypt(ciphertext, from)?;
    Ok(encrypt(&plain, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relayed_ciphertext_opens_under_target_key() {
        let sender = Key::from_credential("sender88");
        let receiver = Key::from_credential("receive8");

        let from_client = encrypt("Merhaba!", &sender);
        let for_receiver = relay(&from_client, &sender, &receiver).unwrap();

        assert_ne!(for_receiver, from_client);
        assert_eq!(decrypt(&for_receiver, &receiver).unwrap(), "Merhaba!");
        assert_eq!(for_receiver, encrypt("Merhaba!", &receiver));
    }

    #[test]
    fn relay_back_restores_original() {
        let a = Key::from_credential("sender88");
        let b = Key::from_credential("receive8");
        let original = encrypt("görüşürüz", &a);
        let there = relay(&original, &a, &b).unwrap();
        assert_eq!(relay(&there, &b, &a).unwrap(), original);
    }

    #[test]
    fn malformed_ciphertext_fails() {
        let a = Key::from_credential("sender88");
        let b = Key::from_credential("receive8");
        assert!(matches!(relay("%%%", &a, &b), Err(CryptoError::Decode(_))));
    }
}
