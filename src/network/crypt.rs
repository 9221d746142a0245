//! Password primitive.
//!
//! Account auth blobs are 64 bytes: a 32-byte SHA-256 hash followed by the
//! 32-byte salt it was computed with. The hash is
//! `SHA-256(SHA-256(password) XOR salt)` and verification compares in
//! constant time. A small self-test against fixed NIST vectors runs at
//! startup; a mismatch is fatal.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

/// Byte length of a stored auth blob (hash + salt).
pub const AUTH_SIZE: usize = 64;

fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Computes the stored hash for `password` under `salt`.
pub fn hash_password(password: &str, salt: &[u8; 32]) -> [u8; 32] {
    let mut digest = sha256(password.as_bytes());
    for (byte, s) in digest.iter_mut().zip(salt.iter()) {
        *byte ^= s;
    }
    sha256(&digest)
}

/// Checks `password` against a 64-byte auth blob. An all-zero blob means
/// the account has no password set and always fails. Both the is-set scan
/// and the digest comparison run in constant time.
pub fn test_password(auth: &[u8], password: &str) -> bool {
    if auth.len() != AUTH_SIZE {
        tracing::error!(
            "expected {} bytes of authentication data (got {})",
            AUTH_SIZE,
            auth.len()
        );
        return false;
    }

    let mut is_set = 0u8;
    for byte in auth {
        is_set |= byte;
    }
    if is_set == 0 {
        return false;
    }

    let hash = &auth[..32];
    let salt: &[u8; 32] = auth[32..].try_into().unwrap();
    let digest = hash_password(password, salt);

    let mut diff = 0u8;
    for (a, b) in digest.iter().zip(hash.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Constant-time byte comparison used for the shared connection secret.
/// Only the length check short-circuits.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Runs the SHA-256 implementation against a handful of NIST test vectors.
/// Catches a broken or miscompiled digest before any password is checked.
pub fn self_test() -> Result<()> {
    const VECTORS: &[(&str, &str)] = &[
        (
            "",
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        ),
        (
            "5738c929c4f4ccb6",
            "963bb88f27f512777aab6c8b1a02c70ec0ad651d428f870036e1917120fb48bf",
        ),
        (
            "1b503fb9a73b16ada3fcf1042623ae7610",
            "d5c30315f72ed05fe519a1bf75ab5fd0ffec5ac1acb0daf66b6b769598594509",
        ),
        (
            "09fc1accc230a205e4a208e64a8f204291f581a12756392da4b8c0cf5ef02b95",
            "4f44c1c7fbebb6f9601829f3897bfd650c56fa07844be76489076356ac1886a4",
        ),
        (
            "03b264be51e4b941864f9b70b4c958f5355aac294b4b87cb037f11f85f07eb57b3f0b89550",
            "d1f8bd684001ac5a4b67bbf79f87de524d2da99ac014dec3e4187728f4557471",
        ),
        (
            "d1be3f13febafefc14414d9fb7f693db16dc1ae270c5b647d80da8583587c1ad8cb8cb01824324411ca5ace3ca22e179a4ff4986f3f21190f3d7f3",
            "02804978eba6e1de65afdbc6a6091ed6b1ecee51e8bff40646a251de6678b7ef",
        ),
    ];

    for (i, (input, expected)) in VECTORS.iter().enumerate() {
        let input = hex::decode(input)?;
        let expected = hex::decode(expected)?;
        let digest = sha256(&input);
        if digest[..] != expected[..] {
            bail!("SHA-256 self-test vector {} failed", i);
        }
    }

    Ok(())
}
