//! Multi-recipient key envelopes.
//!
//! A tunnel's session key is wrapped once per recipient: KEM-encapsulate
//! against the recipient's public key, then AEAD-encrypt the session key
//! under the shared secret. The envelope is self-describing:
//!
//! ```text
//! [version:1][recipient kind:1][kem ct:1088][iv:12][tag:16][wrapped key:32]
//! ```
//!
//! Unwrapping with the wrong private key fails at the AEAD tag check, not at
//! decapsulation (implicit rejection), so the failure mode is uniform.

use tacet_crypto::kem;
use tacet_crypto::{AuthTag, Iv, TunnelKey, IV_LEN, TAG_LEN, TUNNEL_KEY_LEN};
use thiserror::Error;

pub const ENVELOPE_VERSION: u8 = 1;

const HEADER_LEN: usize = 2;
const ENVELOPE_LEN: usize =
    HEADER_LEN + kem::CIPHERTEXT_LEN + IV_LEN + TAG_LEN + TUNNEL_KEY_LEN;

/// Who an envelope was wrapped for. Client and staff envelopes are distinct
/// record shapes, never interchangeable blobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecipientKind {
    Client,
    Staff,
}

impl RecipientKind {
    fn as_byte(self) -> u8 {
        match self {
            RecipientKind::Client => 0x01,
            RecipientKind::Staff => 0x02,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(RecipientKind::Client),
            0x02 => Some(RecipientKind::Staff),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed key envelope")]
    Malformed,
    #[error("unsupported envelope version: {0}")]
    Version(u8),
    #[error("envelope is for a different recipient kind")]
    RecipientMismatch,
    #[error("key wrapping failed")]
    Wrap,
    #[error("key unwrapping failed")]
    Unwrap,
}

/// Wrap a session key for one recipient.
pub fn wrap_tunnel_key(
    key: &TunnelKey,
    kind: RecipientKind,
    recipient_public_key: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let (shared, kem_ct) =
        kem::encapsulate(recipient_public_key).map_err(|_| EnvelopeError::Wrap)?;
    // The 32-byte shared secret is used directly as the AES-256 wrapping key.
    let wrapping = TunnelKey::from_bytes(shared.as_bytes()).map_err(|_| EnvelopeError::Wrap)?;

    let (wrapped, iv, tag) =
        tacet_crypto::encrypt(key.as_bytes(), &wrapping).map_err(|_| EnvelopeError::Wrap)?;

    let mut out = Vec::with_capacity(ENVELOPE_LEN);
    out.push(ENVELOPE_VERSION);
    out.push(kind.as_byte());
    out.extend_from_slice(&kem_ct);
    out.extend_from_slice(&iv.0);
    out.extend_from_slice(&tag.0);
    out.extend_from_slice(&wrapped);
    Ok(out)
}

/// Recover the session key from an envelope with the recipient's private key.
pub fn unwrap_tunnel_key(
    envelope: &[u8],
    kind: RecipientKind,
    private_key: &[u8],
) -> Result<TunnelKey, EnvelopeError> {
    if envelope.len() != ENVELOPE_LEN {
        return Err(EnvelopeError::Malformed);
    }
    if envelope[0] != ENVELOPE_VERSION {
        return Err(EnvelopeError::Version(envelope[0]));
    }
    match RecipientKind::from_byte(envelope[1]) {
        Some(k) if k == kind => {}
        Some(_) => return Err(EnvelopeError::RecipientMismatch),
        None => return Err(EnvelopeError::Malformed),
    }

    let mut at = HEADER_LEN;
    let kem_ct = &envelope[at..at + kem::CIPHERTEXT_LEN];
    at += kem::CIPHERTEXT_LEN;
    let iv = Iv::from_bytes(&envelope[at..at + IV_LEN]).map_err(|_| EnvelopeError::Malformed)?;
    at += IV_LEN;
    let tag =
        AuthTag::from_bytes(&envelope[at..at + TAG_LEN]).map_err(|_| EnvelopeError::Malformed)?;
    at += TAG_LEN;
    let wrapped = &envelope[at..];

    let shared = kem::decapsulate(private_key, kem_ct).map_err(|_| EnvelopeError::Unwrap)?;
    let wrapping = TunnelKey::from_bytes(shared.as_bytes()).map_err(|_| EnvelopeError::Unwrap)?;

    let key = tacet_crypto::decrypt(wrapped, &wrapping, &iv, &tag)
        .map_err(|_| EnvelopeError::Unwrap)?;
    TunnelKey::from_bytes(&key).map_err(|_| EnvelopeError::Unwrap)
}
