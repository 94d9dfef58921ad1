//! Crypto primitives for tacet.
//!
//! Everything here is a leaf: no storage, no async, no policy. Composite
//! services in `tacet-core` combine these into the envelope-encryption and
//! split-key flows.

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce, Tag};
use hkdf::Hkdf;
use rand_core::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

pub mod kem;
pub mod shamir;

pub const TUNNEL_KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Versioned salt for passkey shard derivation. Changing the derivation
/// means a new constant, never a silent edit of this one.
pub const SHARD_SALT_V1: &[u8] = b"staff-crypto-shard-v1";

// ──────────────────────────────────────────────────────────────────────────────
// Symmetric cipher (AES-256-GCM, detached tag)
// ──────────────────────────────────────────────────────────────────────────────

/// Per-tunnel session key. Zeroized on drop.
#[derive(zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct TunnelKey(Zeroizing<[u8; TUNNEL_KEY_LEN]>);

impl TunnelKey {
    pub fn as_bytes(&self) -> &[u8; TUNNEL_KEY_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        let arr: [u8; TUNNEL_KEY_LEN] = bytes.try_into().map_err(|_| CipherError::InvalidLength)?;
        Ok(TunnelKey(Zeroizing::new(arr)))
    }
}

/// Generate a fresh random tunnel key.
pub fn generate_tunnel_key() -> TunnelKey {
    let mut key = Zeroizing::new([0u8; TUNNEL_KEY_LEN]);
    rand_core::OsRng.fill_bytes(key.as_mut());
    TunnelKey(key)
}

pub struct Iv(pub [u8; IV_LEN]);
pub struct AuthTag(pub [u8; TAG_LEN]);

impl Iv {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        Ok(Iv(bytes.try_into().map_err(|_| CipherError::InvalidLength)?))
    }
}

impl AuthTag {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        Ok(AuthTag(bytes.try_into().map_err(|_| CipherError::InvalidLength)?))
    }
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("AEAD encryption failed")]
    EncryptFailed,
    #[error("AEAD authentication failed")]
    AuthFailed,
    #[error("invalid key, iv, or tag length")]
    InvalidLength,
}

/// AEAD encrypt with a random 96-bit iv and detached 128-bit tag.
pub fn encrypt(plaintext: &[u8], key: &TunnelKey) -> Result<(Vec<u8>, Iv, AuthTag), CipherError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut iv = [0u8; IV_LEN];
    rand_core::OsRng.fill_bytes(&mut iv);

    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buf)
        .map_err(|_| CipherError::EncryptFailed)?;

    Ok((buf, Iv(iv), AuthTag(tag.into())))
}

/// AEAD decrypt. Any bit flip in ciphertext, iv, or tag fails; no partial
/// plaintext ever escapes.
pub fn decrypt(
    ciphertext: &[u8],
    key: &TunnelKey,
    iv: &Iv,
    tag: &AuthTag,
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut buf = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&iv.0),
            b"",
            &mut buf,
            Tag::from_slice(&tag.0),
        )
        .map_err(|_| CipherError::AuthFailed)?;

    Ok(Zeroizing::new(buf))
}

// ──────────────────────────────────────────────────────────────────────────────
// PIN key derivation (Argon2id)
// ──────────────────────────────────────────────────────────────────────────────

pub const PIN_KEY_LEN: usize = 32;

const MIB: u32 = 1024;
const DEFAULT_MEMORY_COST_KIB: u32 = 64 * MIB;
const DEFAULT_T_COST: u32 = 3;
const DEFAULT_P_COST: u32 = 1;

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("invalid kdf parameters")]
    InvalidParams(argon2::Error),
    #[error("key derivation failed")]
    DerivationFailed(argon2::Error),
    #[error("invalid derivation output length")]
    InvalidLength,
}

/// Derive a 32-byte key from a low-entropy PIN with the default costs
/// (Argon2id, 64 MiB, t=3, p=1).
pub fn derive_pin_key(pin: &str, salt: &[u8]) -> Result<Zeroizing<[u8; PIN_KEY_LEN]>, KdfError> {
    derive_pin_key_with(
        pin,
        salt,
        DEFAULT_MEMORY_COST_KIB,
        DEFAULT_T_COST,
        DEFAULT_P_COST,
    )
}

/// Derive a PIN key with explicit Argon2id costs.
pub fn derive_pin_key_with(
    pin: &str,
    salt: &[u8],
    m_cost_kib: u32,
    t_cost: u32,
    p_cost: u32,
) -> Result<Zeroizing<[u8; PIN_KEY_LEN]>, KdfError> {
    let params = argon2::Params::new(m_cost_kib, t_cost, p_cost, Some(PIN_KEY_LEN))
        .map_err(KdfError::InvalidParams)?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; PIN_KEY_LEN]);
    argon2
        .hash_password_into(pin.as_bytes(), salt, key.as_mut())
        .map_err(KdfError::DerivationFailed)?;

    Ok(key)
}

// ──────────────────────────────────────────────────────────────────────────────
// Passkey shard derivation (HKDF-SHA256)
// ──────────────────────────────────────────────────────────────────────────────

/// Derive a pseudorandom shard of `len` bytes from a passkey assertion.
///
/// Deterministic for the same (passkey id, assertion) pair; a wrong assertion
/// yields an equally well-formed but unrelated shard.
pub fn derive_passkey_shard(
    passkey_id: &str,
    assertion: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, KdfError> {
    let hk = Hkdf::<Sha256>::new(Some(SHARD_SALT_V1), assertion);
    let info = format!("passkey:{passkey_id}");

    let mut shard = Zeroizing::new(vec![0u8; len]);
    hk.expand(info.as_bytes(), shard.as_mut())
        .map_err(|_| KdfError::InvalidLength)?;

    Ok(shard)
}

/// XOR two equal-length shards. `a XOR xor_shards(a, b) == b`, so the same
/// call recombines a server shard with a passkey shard.
pub fn xor_shards(a: &[u8], b: &[u8]) -> Result<Zeroizing<Vec<u8>>, KdfError> {
    if a.len() != b.len() {
        return Err(KdfError::InvalidLength);
    }
    let mut out = Zeroizing::new(vec![0u8; a.len()]);
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    Ok(out)
}

// ──────────────────────────────────────────────────────────────────────────────
// Hashing utilities
// ──────────────────────────────────────────────────────────────────────────────

/// SHA-256 of arbitrary data (throttle identifiers, email hashes).
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex-encoded SHA-256, the storage form for hashed identifiers.
pub fn hash_identifier(data: &[u8]) -> String {
    hex::encode(hash_sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests use cheap Argon2 costs; the defaults are too slow for CI.
    fn test_pin_key(pin: &str, salt: &[u8]) -> Zeroizing<[u8; PIN_KEY_LEN]> {
        derive_pin_key_with(pin, salt, 1024, 2, 1).unwrap()
    }

    #[test]
    fn cipher_round_trip() {
        let key = generate_tunnel_key();
        let plaintext = b"appointment: tooth hurts, please be discreet";

        let (ct, iv, tag) = encrypt(plaintext, &key).unwrap();
        assert_ne!(&ct[..], &plaintext[..]);

        let pt = decrypt(&ct, &key, &iv, &tag).unwrap();
        assert_eq!(&pt[..], plaintext);
    }

    #[test]
    fn cipher_rejects_ciphertext_tamper() {
        let key = generate_tunnel_key();
        let (mut ct, iv, tag) = encrypt(b"hello", &key).unwrap();
        ct[0] ^= 0x01;
        assert!(decrypt(&ct, &key, &iv, &tag).is_err());
    }

    #[test]
    fn cipher_rejects_iv_tamper() {
        let key = generate_tunnel_key();
        let (ct, mut iv, tag) = encrypt(b"hello", &key).unwrap();
        iv.0[0] ^= 0x01;
        assert!(decrypt(&ct, &key, &iv, &tag).is_err());
    }

    #[test]
    fn cipher_rejects_tag_tamper() {
        let key = generate_tunnel_key();
        let (ct, iv, mut tag) = encrypt(b"hello", &key).unwrap();
        tag.0[0] ^= 0x01;
        assert!(decrypt(&ct, &key, &iv, &tag).is_err());
    }

    #[test]
    fn cipher_rejects_wrong_key() {
        let key = generate_tunnel_key();
        let other = generate_tunnel_key();
        let (ct, iv, tag) = encrypt(b"hello", &key).unwrap();
        assert!(decrypt(&ct, &other, &iv, &tag).is_err());
    }

    #[test]
    fn cipher_empty_plaintext_ok() {
        let key = generate_tunnel_key();
        let (ct, iv, tag) = encrypt(b"", &key).unwrap();
        let pt = decrypt(&ct, &key, &iv, &tag).unwrap();
        assert_eq!(pt.len(), 0);
    }

    #[test]
    fn tunnel_key_from_bytes_validates_length() {
        assert!(TunnelKey::from_bytes(&[0u8; 31]).is_err());
        assert!(TunnelKey::from_bytes(&[0u8; 32]).is_ok());
    }

    #[test]
    fn pin_key_is_deterministic() {
        let a = test_pin_key("482913", b"client@example.com");
        let b = test_pin_key("482913", b"client@example.com");
        assert_eq!(*a, *b);
    }

    #[test]
    fn pin_key_depends_on_pin_and_salt() {
        let base = test_pin_key("482913", b"client@example.com");
        let other_pin = test_pin_key("482914", b"client@example.com");
        let other_salt = test_pin_key("482913", b"other@example.com");
        assert_ne!(*base, *other_pin);
        assert_ne!(*base, *other_salt);
    }

    #[test]
    fn pin_key_rejects_short_salt() {
        assert!(derive_pin_key("1234", b"x").is_err());
    }

    #[test]
    fn passkey_shard_is_deterministic() {
        let assertion = b"authenticator-assertion-signature-bytes";
        let a = derive_passkey_shard("pk-1", assertion, 2400).unwrap();
        let b = derive_passkey_shard("pk-1", assertion, 2400).unwrap();
        assert_eq!(*a, *b);
        assert_eq!(a.len(), 2400);
    }

    #[test]
    fn passkey_shard_domain_separated() {
        let assertion = b"authenticator-assertion-signature-bytes";
        let a = derive_passkey_shard("pk-1", assertion, 64).unwrap();
        let b = derive_passkey_shard("pk-2", assertion, 64).unwrap();
        let c = derive_passkey_shard("pk-1", b"different assertion", 64).unwrap();
        assert_ne!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn xor_shards_recombines() {
        let secret = vec![0xAB; 128];
        let mask = vec![0x5C; 128];
        let shard = xor_shards(&secret, &mask).unwrap();
        let recovered = xor_shards(&shard, &mask).unwrap();
        assert_eq!(*recovered, secret);
    }

    #[test]
    fn xor_shards_rejects_length_mismatch() {
        assert!(xor_shards(&[1, 2, 3], &[1, 2]).is_err());
    }

    #[test]
    fn hash_identifier_is_hex_sha256() {
        let h = hash_identifier(b"client@example.com");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hex::encode(hash_sha256(b"client@example.com")));
    }
}
