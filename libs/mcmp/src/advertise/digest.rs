//! Advertise digest
//!
//! `MD5(salt || date || sequence || server)` where the salt is `MD5(key)`
//! for a configured security key and sixteen zero bytes otherwise. The
//! fields are hashed as the raw bytes the proxy sent.

use md5::{Digest, Md5};

const SALT_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct DigestVerifier {
    salt: [u8; SALT_LEN],
}

impl DigestVerifier {
    pub fn new(security_key: Option<&str>) -> Self {
        let mut salt = [0u8; SALT_LEN];
        if let Some(key) = security_key {
            salt.copy_from_slice(&Md5::digest(key.as_bytes()));
        }
        Self { salt }
    }

    pub fn compute(&self, date: &[u8], sequence: &[u8], server: &[u8]) -> [u8; 16] {
        let mut hasher = Md5::new();
        hasher.update(self.salt);
        hasher.update(date);
        hasher.update(sequence);
        hasher.update(server);

        let mut digest = [0u8; 16];
        digest.copy_from_slice(&hasher.finalize());
        digest
    }

    /// Lowercase hex digest a proxy with the same key would send
    pub fn expected_hex(&self, date: &[u8], sequence: &[u8], server: &[u8]) -> String {
        hex::encode(self.compute(date, sequence, server))
    }

    /// Case-insensitive comparison; any length or byte mismatch fails
    pub fn verify(&self, digest: &str, date: &[u8], sequence: &[u8], server: &[u8]) -> bool {
        let expected = self.expected_hex(date, sequence, server);
        expected.len() == digest.len()
            && expected
                .bytes()
                .zip(digest.bytes())
                .all(|(a, b)| a.eq_ignore_ascii_case(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DATE: &[u8] = b"Mon, 19 Oct 2026 10:00:00 GMT";

    fn reference(key: &str, date: &[u8], sequence: &[u8], server: &[u8]) -> String {
        let salt = Md5::digest(key.as_bytes());
        let mut data = salt.to_vec();
        data.extend_from_slice(date);
        data.extend_from_slice(sequence);
        data.extend_from_slice(server);
        hex::encode(Md5::digest(&data))
    }

    #[test]
    fn test_keyed_digest_matches_reference() {
        let verifier = DigestVerifier::new(Some("secret"));
        let digest = reference("secret", DATE, b"7", b"srv-1");

        assert!(verifier.verify(&digest, DATE, b"7", b"srv-1"));
        assert!(verifier.verify(&digest.to_uppercase(), DATE, b"7", b"srv-1"));
        assert!(!verifier.verify(&digest, DATE, b"8", b"srv-1"));
        assert!(!DigestVerifier::new(None).verify(&digest, DATE, b"7", b"srv-1"));
    }

    #[test]
    fn test_unkeyed_salt_is_zero_bytes() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(b"d1s");
        let expected = hex::encode(Md5::digest(&data));

        assert_eq!(DigestVerifier::new(None).expected_hex(b"d", b"1", b"s"), expected);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let verifier = DigestVerifier::new(None);
        let digest = verifier.expected_hex(DATE, b"1", b"srv");
        assert!(!verifier.verify(&digest[..31], DATE, b"1", b"srv"));
        assert!(!verifier.verify(&format!("{}0", digest), DATE, b"1", b"srv"));
        assert!(!verifier.verify("", DATE, b"1", b"srv"));
    }

    proptest! {
        #[test]
        fn flipping_any_digest_character_is_rejected(
            key in "[a-zA-Z0-9]{1,16}",
            server in "[a-z0-9-]{1,24}",
            sequence in 0u64..1_000_000,
            position in 0usize..32,
            replacement in "[0-9a-f]",
        ) {
            let verifier = DigestVerifier::new(Some(&key));
            let sequence = sequence.to_string();
            let digest = reference(&key, DATE, sequence.as_bytes(), server.as_bytes());
            prop_assert!(verifier.verify(&digest, DATE, sequence.as_bytes(), server.as_bytes()));

            let original = digest.as_bytes()[position] as char;
            prop_assume!(!original.eq_ignore_ascii_case(&replacement.chars().next().unwrap()));

            let mut flipped = digest.clone();
            flipped.replace_range(position..=position, &replacement);
            prop_assert!(!verifier.verify(&flipped, DATE, sequence.as_bytes(), server.as_bytes()));
        }
    }
}
