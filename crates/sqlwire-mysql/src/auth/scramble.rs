//! Password scrambles used by the authentication plugins.
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password (fast path)
//!
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))
//! ```
//!
//! # Pre-4.1 ("323") scrambles
//!
//! Servers older than 4.1 use a pair of 31-bit string hashes and a small
//! linear generator to produce printable characters. The arithmetic is
//! 64-bit two's complement with wrap-around; outputs must match the server
//! bit for bit.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]

use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use sqlwire_core::Result;

use crate::error::auth_error;

/// Scramble sent by 4.1.0 clients before the server reveals its salt.
pub const FALSE_SCRAMBLE: &[u8; 8] = b"xxxxxxxx";

/// Length of a 4.1.0 secure-auth server reply (4-byte salt + 20-byte hash).
pub const LEGACY_SECURE_REPLY_LEN: usize = 24;

const SHA1_LEN: usize = 20;

/// Compute the mysql_native_password response.
///
/// Only the first 20 bytes of `seed` are used. An empty password yields an
/// empty response.
pub fn native_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = &seed[..seed.len().min(SHA1_LEN)];

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    xor(&stage1, &stage3)
}

/// Compute the caching_sha2_password fast-auth response.
///
/// A 21-byte seed ending in NUL has the terminator dropped first.
pub fn caching_sha2_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = strip_seed_terminator(seed);

    let hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let hash_hash: [u8; 32] = Sha256::digest(hash).into();

    let mut hasher = Sha256::new();
    hasher.update(hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    xor(&hash, &scramble)
}

/// Drop the NUL MySQL appends to a 20-byte scramble.
pub fn strip_seed_terminator(seed: &[u8]) -> &[u8] {
    if seed.len() == SHA1_LEN + 1 && seed.last() == Some(&0) {
        &seed[..SHA1_LEN]
    } else {
        seed
    }
}

/// Encrypt the password for sha256_password / caching_sha2_password full
/// authentication over an unencrypted channel.
///
/// The NUL-terminated password is XORed with the rotating seed and then
/// RSA-OAEP (SHA-1) encrypted with the server's public key. Both SPKI and
/// PKCS#1 PEM encodings are accepted.
pub fn rsa_encrypt_password(password: &str, seed: &[u8], public_key_pem: &[u8]) -> Result<Vec<u8>> {
    let seed = strip_seed_terminator(seed);
    if seed.is_empty() {
        return Err(auth_error("Cannot encrypt password: server sent an empty seed"));
    }

    let mut plain = password.as_bytes().to_vec();
    plain.push(0);
    for (i, b) in plain.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_error(format!("Server public key is not valid PEM text: {e}")))?;
    let key = RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .map_err(|e| auth_error(format!("Failed to parse server RSA public key: {e}")))?;

    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &plain)
        .map_err(|e| auth_error(format!("RSA encryption of password failed: {e}")))
}

/// Password followed by a NUL, as sent in cleartext over a secure channel.
pub fn null_terminated(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// The two 31-bit hashes of the 323 scheme.
pub fn hash_323(bytes: &[u8]) -> [i64; 2] {
    let mut nr: i64 = 1_345_345_333;
    let mut add: i64 = 7;
    let mut nr2: i64 = 0x1234_5671;
    for &b in bytes {
        let tmp = i64::from(b);
        nr ^= ((nr & 63).wrapping_add(add))
            .wrapping_mul(tmp)
            .wrapping_add(nr << 8);
        nr2 = nr2.wrapping_add((nr2 << 8) ^ nr);
        add = add.wrapping_add(tmp);
    }
    [nr & 0x7fff_ffff, nr2 & 0x7fff_ffff]
}

/// 323 hash of a password with all whitespace removed.
pub fn hash_password_323(password: &[u8]) -> [i64; 2] {
    let compact: Vec<u8> = password
        .iter()
        .copied()
        .filter(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C))
        .collect();
    hash_323(&compact)
}

/// The "new" pre-4.1 scramble used by protocol-10 servers.
///
/// Produces one printable character per seed byte, then XORs every
/// character with one more generator output.
pub fn scramble_323(password: &[u8], seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    const MAX: i64 = 0x3fff_ffff;

    let pw = hash_323(seed);
    let msg = hash_password_323(password);
    let mut seed1 = (pw[0] ^ msg[0]) % MAX;
    let mut seed2 = (pw[1] ^ msg[1]) % MAX;

    let mut next = || {
        seed1 = (seed1 * 3 + seed2) % MAX;
        seed2 = (seed1 + seed2 + 33) % MAX;
        seed1 as f64 / MAX as f64
    };

    let mut out: Vec<u8> = seed
        .iter()
        .map(|_| (next() * 31.0 + 64.0).floor() as u8)
        .collect();
    let extra = (next() * 31.0).floor() as u8;
    for c in &mut out {
        *c ^= extra;
    }
    out
}

/// Single hash used by the "old" scramble; skips spaces and tabs.
pub fn old_hash(bytes: &[u8]) -> i64 {
    let mut nr: i64 = 1_345_345_333;
    let mut nr2: i64 = 7;
    for &b in bytes {
        if b == b' ' || b == b'\t' {
            continue;
        }
        let tmp = i64::from(b);
        nr ^= ((nr & 63).wrapping_add(nr2))
            .wrapping_mul(tmp)
            .wrapping_add(nr << 8);
        nr2 = nr2.wrapping_add(tmp);
    }
    nr & ((1 << 31) - 1)
}

/// The "old" scramble used by protocol-9 servers: 25-bit generator, no
/// final XOR.
pub fn old_scramble(password: &[u8], seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    const MAX: i64 = 0x01ff_ffff;

    let nr = (old_hash(seed) ^ old_hash(password)) % MAX;
    let mut s1 = nr;
    let mut s2 = nr / 2;
    seed.iter()
        .map(|_| {
            s1 = (s1 * 3 + s2) % MAX;
            s2 = (s1 + s2 + 33) % MAX;
            (s1 as f64 / MAX as f64 * 31.0 + 64.0).floor() as u8
        })
        .collect()
}

/// Answer a 4.1.0 server's 24-byte secure-auth reply.
///
/// The reply carries a 4-byte salt and the stored password hash wrapped with
/// `SHA1(salt + SHA1(password))`. The unwrapped scramble is XORed with the
/// password's SHA1 to produce the 20-byte answer.
pub fn legacy_secure_response(password: &str, reply: &[u8]) -> Result<Vec<u8>> {
    if reply.len() != LEGACY_SECURE_REPLY_LEN {
        return Err(auth_error(format!(
            "Legacy secure-auth reply must be {} bytes, got {}",
            LEGACY_SECURE_REPLY_LEN,
            reply.len()
        )));
    }
    let compact: Vec<u8> = password
        .bytes()
        .filter(|&b| b != b' ' && b != b'\t')
        .collect();
    let stage1: [u8; 20] = Sha1::digest(&compact).into();

    let mut hasher = Sha1::new();
    hasher.update(&reply[..4]);
    hasher.update(stage1);
    let stage2: [u8; 20] = hasher.finalize().into();

    let scramble = xor(&reply[4..], &stage2);
    Ok(xor(&scramble, &stage1))
}

/// Key that unwraps a 4.1.0 reply for an account still holding a pre-4.1
/// password: SHA1 of the two 323 hash words, each big-endian.
pub fn old_password_key(password: &str) -> [u8; 20] {
    let [a, b] = hash_password_323(password.as_bytes());
    let mut hasher = Sha1::new();
    hasher.update((a as u32).to_be_bytes());
    hasher.update((b as u32).to_be_bytes());
    hasher.finalize().into()
}

/// Answer a 4.1.0 secure-auth reply that starts with `*`.
///
/// The server keeps a pre-4.1 hash for the account, so the 20 bytes after
/// the salt are the scramble wrapped with [`old_password_key`]. The answer is
/// the 323 scramble of the password over the first 8 unwrapped bytes.
pub fn legacy_old_password_response(password: &str, reply: &[u8]) -> Result<Vec<u8>> {
    if reply.len() != LEGACY_SECURE_REPLY_LEN {
        return Err(auth_error(format!(
            "Legacy secure-auth reply must be {} bytes, got {}",
            LEGACY_SECURE_REPLY_LEN,
            reply.len()
        )));
    }
    let scramble = xor(&reply[4..], &old_password_key(password));
    Ok(scramble_323(password.as_bytes(), &scramble[..8]))
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_native_password_empty() {
        assert!(native_password("", &[0; 20]).is_empty());
    }

    #[test]
    fn test_native_password_known_vector() {
        let seed: Vec<u8> = (1..=20).collect();
        assert_eq!(
            hex(&native_password("password", &seed)),
            "c17d6009a5cb47e59f7483fcf05553bbbf7dd0d6"
        );
    }

    #[test]
    fn test_native_password_verifies_against_stored_hash() {
        // What the server does: SHA1(response XOR SHA1(seed + stored)) == stored
        let stored: [u8; 20] = Sha1::digest(Sha1::digest(b"password")).into();
        assert_eq!(hex(&stored), "2470c0c06dee42fd1618bb99005adca2ec9d1e19");

        let seed = b"abcdefghijklmnopqrst";
        let response = native_password("password", seed);
        let mut hasher = Sha1::new();
        hasher.update(seed);
        hasher.update(stored);
        let mask: [u8; 20] = hasher.finalize().into();
        let stage1 = xor(&response, &mask);
        let check: [u8; 20] = Sha1::digest(&stage1).into();
        assert_eq!(check, stored);
    }

    #[test]
    fn test_native_password_uses_first_20_seed_bytes() {
        let mut seed: Vec<u8> = (1..=20).collect();
        let short = native_password("pw", &seed);
        seed.push(0);
        assert_eq!(native_password("pw", &seed), short);
    }

    #[test]
    fn test_caching_sha2_known_vector() {
        let seed: Vec<u8> = (1..=20).collect();
        assert_eq!(
            hex(&caching_sha2_password("password", &seed)),
            "f7ab1c623a6e98dceab35e926290e5746a3141116115f4dd8ccca994393eccdd"
        );
    }

    #[test]
    fn test_caching_sha2_strips_trailing_nul() {
        let mut seed = vec![7u8; 20];
        let plain = caching_sha2_password("secret", &seed);
        seed.push(0);
        assert_eq!(caching_sha2_password("secret", &seed), plain);
        assert!(caching_sha2_password("", &seed).is_empty());
    }

    #[test]
    fn test_hash_323_matches_old_password_function() {
        // OLD_PASSWORD('password') on a 4.x server
        let [a, b] = hash_password_323(b"password");
        assert_eq!(format!("{a:08x}{b:08x}"), "5d2e19393cc5ef67");
        assert_eq!(hash_password_323(b"pass word"), hash_password_323(b"password"));
    }

    #[test]
    fn test_scramble_323_known_vectors() {
        assert_eq!(scramble_323(b"password", b"ABCDEFGH"), b"ICRVY\\BT");
        assert_eq!(scramble_323(b"secret", b"12345678"), b"VW^]EMZL");
        assert!(scramble_323(b"", b"12345678").is_empty());
    }

    #[test]
    fn test_old_scramble_known_vector() {
        assert_eq!(old_hash(b"password"), 1_563_302_201);
        assert_eq!(old_hash(b"pass\tword"), old_hash(b"password"));
        assert_eq!(old_scramble(b"password", b"ABCDEFGH"), b"NIE]FHTO");
        assert!(old_scramble(b"", b"ABCDEFGH").is_empty());
    }

    #[test]
    fn test_scrambles_are_printable() {
        for c in scramble_323(b"hunter2", b"zyxwvuts") {
            assert!((64..128).contains(&c), "char {c} out of range");
        }
        for c in old_scramble(b"hunter2", b"zyxwvuts") {
            assert!((64..96).contains(&c), "char {c} out of range");
        }
    }

    #[test]
    fn test_legacy_secure_response_unwraps_reply() {
        let salt = [0x11u8, 0x22, 0x33, 0x44];
        let target: Vec<u8> = (100..120).collect();
        let stage1: [u8; 20] = Sha1::digest(b"password").into();
        let mut hasher = Sha1::new();
        hasher.update(salt);
        hasher.update(stage1);
        let wrap: [u8; 20] = hasher.finalize().into();

        let mut reply = salt.to_vec();
        reply.extend(xor(&target, &wrap));

        let answer = legacy_secure_response("pass word", &reply).unwrap();
        assert_eq!(hex(&answer), "3fcf0783a1d055546aef4b641c8941680a93f9af");
    }

    #[test]
    fn test_old_password_key_hashes_323_words() {
        let mut expected = Sha1::new();
        expected.update([0x5d, 0x2e, 0x19, 0x39, 0x3c, 0xc5, 0xef, 0x67]);
        let expected: [u8; 20] = expected.finalize().into();
        assert_eq!(old_password_key("password"), expected);
        assert_eq!(old_password_key("pass word"), expected);
    }

    #[test]
    fn test_legacy_old_password_response_unwraps_reply() {
        let target: Vec<u8> = b"ABCDEFGHIJKLMNOPQRST".to_vec();
        let mut reply = b"*\x01\x02\x03".to_vec();
        reply.extend(xor(&target, &old_password_key("password")));

        let answer = legacy_old_password_response("password", &reply).unwrap();
        assert_eq!(answer, b"ICRVY\\BT");
        assert!(legacy_old_password_response("password", &reply[..20]).is_err());
    }

    #[test]
    fn test_legacy_secure_response_rejects_wrong_length() {
        assert!(legacy_secure_response("pw", &[1u8; 20]).is_err());
    }

    #[test]
    fn test_rsa_encrypt_rejects_bad_key() {
        let err = rsa_encrypt_password("pw", &[1u8; 20], b"not a key").unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_null_terminated() {
        assert_eq!(null_terminated("abc"), b"abc\0");
        assert_eq!(null_terminated(""), b"\0");
    }
}
