//! AEAD seal/open for the ePacket payload.
//!
//! ChaCha20-Poly1305 is the default suite. Alternate suites (ASCON-128/128a,
//! ASCON-80pq, Xoodyak) are build-time substitutions behind [`AeadSuite`];
//! callers observe identical behavior regardless of suite.

use crate::error::{EpacketError, Result};
use crate::keys::SymmetricKey;
use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce, Tag};
use infuse_proto::constants::{NONCE_LEN, TAG_LEN};

/// A detached-tag AEAD over a 32-byte key and 12-byte nonce.
pub trait AeadSuite: Send + Sync {
    /// Encrypts `payload` in place and returns the tag.
    fn seal(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        ad: &[u8],
        payload: &mut [u8],
    ) -> Result<[u8; TAG_LEN]>;

    /// Decrypts `payload` in place, verifying `tag` over `ad`.
    ///
    /// On failure the payload is left in an unspecified scrambled state and
    /// must not be exposed.
    fn open(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        ad: &[u8],
        payload: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<()>;
}

/// The default suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaChaSuite;

impl AeadSuite for ChaChaSuite {
    fn seal(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        ad: &[u8],
        payload: &mut [u8],
    ) -> Result<[u8; TAG_LEN]> {
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        let tag: Tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce), ad, payload)
            .map_err(|_| EpacketError::Unauthenticated)?;
        Ok(tag.into())
    }

    fn open(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        ad: &[u8],
        payload: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<()> {
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        cipher
            .decrypt_in_place_detached(Nonce::from_slice(nonce), ad, payload, Tag::from_slice(tag))
            .map_err(|_| EpacketError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LEN;

    #[test]
    fn seal_open_round_trip() {
        let suite = ChaChaSuite;
        let key = SymmetricKey::new([7; KEY_LEN]);
        let nonce = [9u8; NONCE_LEN];
        let ad = b"header bytes";
        let mut payload = b"hello sensor world".to_vec();

        let tag = suite.seal(&key, &nonce, ad, &mut payload).unwrap();
        assert_ne!(&payload, b"hello sensor world");

        suite.open(&key, &nonce, ad, &mut payload, &tag).unwrap();
        assert_eq!(&payload, b"hello sensor world");
    }

    #[test]
    fn tampered_ad_fails() {
        let suite = ChaChaSuite;
        let key = SymmetricKey::new([7; KEY_LEN]);
        let nonce = [9u8; NONCE_LEN];
        let mut payload = b"payload".to_vec();

        let tag = suite.seal(&key, &nonce, b"genuine", &mut payload).unwrap();
        assert!(suite
            .open(&key, &nonce, b"forgery", &mut payload, &tag)
            .is_err());
    }

    #[test]
    fn tampered_tag_fails() {
        let suite = ChaChaSuite;
        let key = SymmetricKey::new([7; KEY_LEN]);
        let nonce = [9u8; NONCE_LEN];
        let mut payload = b"payload".to_vec();

        let mut tag = suite.seal(&key, &nonce, b"ad", &mut payload).unwrap();
        tag[0] ^= 0x01;
        assert!(suite.open(&key, &nonce, b"ad", &mut payload, &tag).is_err());
    }
}
