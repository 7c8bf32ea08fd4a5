//! Cryptographic primitives: root-key sealing, AEAD and per-type signing.

pub mod root;
pub mod signing;

use rand::RngCore;
use rand::rngs::OsRng;

pub use root::RootCipher;

/// Fill a fixed-size buffer from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Random 128-bit identifier, hex encoded.
pub fn random_id() -> String {
    hex::encode(random_bytes::<16>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_128_bit_hex_and_distinct() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
