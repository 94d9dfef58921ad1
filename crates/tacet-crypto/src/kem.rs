//! ML-KEM-768 key encapsulation (FIPS 203).
//!
//! Byte-slice API because every caller stores keys and ciphertexts as opaque
//! blobs. Decapsulation uses implicit rejection between valid keys: a
//! mismatched but valid private key returns a different shared secret instead
//! of an error. Arbitrary byte strings are a separate case — FIPS 203 requires
//! a hash check on import, so they are rejected as malformed.

use fips203::ml_kem_768::{CipherText, DecapsKey, EncapsKey, CT_LEN, DK_LEN, EK_LEN, KG};
use fips203::traits::{Decaps, Encaps, KeyGen, SerDes};
use thiserror::Error;
use zeroize::Zeroizing;

pub const PUBLIC_KEY_LEN: usize = EK_LEN; // 1184
pub const PRIVATE_KEY_LEN: usize = DK_LEN; // 2400
pub const CIPHERTEXT_LEN: usize = CT_LEN; // 1088
pub const SHARED_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KemError {
    #[error("key generation failed")]
    KeyGen,
    #[error("malformed key material")]
    Malformed,
    #[error("encapsulation failed")]
    Encaps,
    #[error("decapsulation failed")]
    Decaps,
}

/// Shared secret produced by encapsulate/decapsulate. Zeroized on drop.
pub struct SharedSecret(Zeroizing<[u8; SHARED_SECRET_LEN]>);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("data", &"[redacted]")
            .finish()
    }
}

/// Generate a fresh keypair as (public, private) byte blobs.
pub fn generate_keypair() -> Result<(Vec<u8>, Zeroizing<Vec<u8>>), KemError> {
    let (ek, dk) = KG::try_keygen().map_err(|_| KemError::KeyGen)?;
    let public = ek.into_bytes().to_vec();
    let private = Zeroizing::new(dk.into_bytes().to_vec());
    Ok((public, private))
}

/// Encapsulate against a public key, producing the shared secret and the
/// ciphertext to hand to the key holder.
pub fn encapsulate(public_key: &[u8]) -> Result<(SharedSecret, Vec<u8>), KemError> {
    let arr: [u8; EK_LEN] = public_key.try_into().map_err(|_| KemError::Malformed)?;
    let ek = EncapsKey::try_from_bytes(arr).map_err(|_| KemError::Malformed)?;
    let (ssk, ct) = ek.try_encaps().map_err(|_| KemError::Encaps)?;
    Ok((
        SharedSecret(Zeroizing::new(ssk.into_bytes())),
        ct.into_bytes().to_vec(),
    ))
}

/// Recover the shared secret from a ciphertext with the private key.
pub fn decapsulate(private_key: &[u8], ciphertext: &[u8]) -> Result<SharedSecret, KemError> {
    let sk_arr: [u8; DK_LEN] = private_key.try_into().map_err(|_| KemError::Malformed)?;
    let dk = DecapsKey::try_from_bytes(sk_arr).map_err(|_| KemError::Malformed)?;

    let ct_arr: [u8; CT_LEN] = ciphertext.try_into().map_err(|_| KemError::Malformed)?;
    let ct = CipherText::try_from_bytes(ct_arr).map_err(|_| KemError::Malformed)?;

    let ssk = dk.try_decaps(&ct).map_err(|_| KemError::Decaps)?;
    Ok(SharedSecret(Zeroizing::new(ssk.into_bytes())))
}
