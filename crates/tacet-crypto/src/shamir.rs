//! Shamir secret sharing over GF(2^8).
//!
//! k-of-n threshold splitting of byte strings. The field is GF(2^8) with the
//! AES polynomial; addition is XOR and multiplication is a masked
//! constant-time peasant multiply, so share arithmetic leaks nothing through
//! timing. Each share records the threshold it was split with, which lets
//! `reconstruct` reject undersized share sets instead of silently returning
//! garbage.
//!
//! The client-side ceremony uses k=2, n=3 (PIN share, browser share, server
//! share); the server only ever holds one share.

use rand::{CryptoRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Error)]
pub enum ShamirError {
    #[error("threshold must be at least 1 and at most the share count")]
    InvalidThreshold,
    #[error("secret cannot be empty")]
    EmptySecret,
    #[error("reconstruction failed")]
    Reconstruction,
}

/// One share of a split secret. Index is the x-coordinate (never 0, which
/// would be the secret itself); data holds one y-value per secret byte.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    #[zeroize(skip)]
    index: u8,
    #[zeroize(skip)]
    threshold: u8,
    data: Vec<u8>,
}

impl Share {
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serialize as `[index, threshold, data...]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.data.len());
        out.push(self.index);
        out.push(self.threshold);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShamirError> {
        if bytes.len() < 3 || bytes[0] == 0 || bytes[1] == 0 {
            return Err(ShamirError::Reconstruction);
        }
        Ok(Share {
            index: bytes[0],
            threshold: bytes[1],
            data: bytes[2..].to_vec(),
        })
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("threshold", &self.threshold)
            .field("data", &"[redacted]")
            .finish()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// GF(2^8) arithmetic
// ──────────────────────────────────────────────────────────────────────────────

/// AES irreducible polynomial, x^8 + x^4 + x^3 + x + 1.
const GF_MODULUS: u16 = 0x11B;

#[inline]
const fn gf_add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Constant-time multiply (masked peasant algorithm, no table lookups).
#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    let mut a = u16::from(a);
    let mut b = u16::from(b);
    let mut result: u16 = 0;

    for _ in 0..8 {
        let mask = 0u16.wrapping_sub(b & 1);
        result ^= a & mask;

        let reduce = 0u16.wrapping_sub((a >> 7) & 1);
        a = (a << 1) ^ (GF_MODULUS & reduce);
        b >>= 1;
    }

    result as u8
}

/// Inverse via Fermat: a^254 = a^(-1) in GF(2^8).
#[inline]
fn gf_inv(a: u8) -> u8 {
    let a2 = gf_mul(a, a);
    let a4 = gf_mul(a2, a2);
    let a8 = gf_mul(a4, a4);
    let a16 = gf_mul(a8, a8);
    let a32 = gf_mul(a16, a16);
    let a64 = gf_mul(a32, a32);
    let a128 = gf_mul(a64, a64);

    // 254 = 2 + 4 + 8 + 16 + 32 + 64 + 128
    gf_mul(
        gf_mul(gf_mul(a128, a64), gf_mul(a32, a16)),
        gf_mul(gf_mul(a8, a4), a2),
    )
}

#[inline]
fn gf_div(a: u8, b: u8) -> u8 {
    gf_mul(a, gf_inv(b))
}

/// Horner evaluation of `coeffs[0] + coeffs[1]·x + …` at x.
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coeffs.iter().rev() {
        acc = gf_add(gf_mul(acc, x), c);
    }
    acc
}

/// Lagrange interpolation at x = 0 over the given (x, y) points.
fn interpolate_at_zero(points: &[(u8, u8)]) -> u8 {
    let mut acc = 0u8;
    for (i, &(x_i, y_i)) in points.iter().enumerate() {
        let mut basis = 1u8;
        for (j, &(x_j, _)) in points.iter().enumerate() {
            if i != j {
                // In GF(2^8): 0 - x_j = x_j and x_i - x_j = x_i ^ x_j.
                basis = gf_mul(basis, gf_div(x_j, x_i ^ x_j));
            }
        }
        acc = gf_add(acc, gf_mul(y_i, basis));
    }
    acc
}

// ──────────────────────────────────────────────────────────────────────────────
// Split / reconstruct
// ──────────────────────────────────────────────────────────────────────────────

/// Split `secret` into `n` shares with threshold `k`.
pub fn split(secret: &[u8], k: u8, n: u8) -> Result<Vec<Share>, ShamirError> {
    split_with_rng(&mut rand::rngs::OsRng, secret, k, n)
}

/// Split with a caller-supplied RNG (deterministic tests).
pub fn split_with_rng<R: RngCore + CryptoRng>(
    rng: &mut R,
    secret: &[u8],
    k: u8,
    n: u8,
) -> Result<Vec<Share>, ShamirError> {
    if k == 0 || n == 0 || k > n {
        return Err(ShamirError::InvalidThreshold);
    }
    if secret.is_empty() {
        return Err(ShamirError::EmptySecret);
    }

    let mut shares: Vec<Share> = (1..=n)
        .map(|index| Share {
            index,
            threshold: k,
            data: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut coeffs = vec![0u8; usize::from(k)];
    for &secret_byte in secret {
        coeffs[0] = secret_byte;
        rng.fill_bytes(&mut coeffs[1..]);

        for share in &mut shares {
            share.data.push(poly_eval(&coeffs, share.index));
        }
    }
    coeffs.zeroize();

    Ok(shares)
}

/// Reconstruct the secret from at least `threshold` distinct shares.
///
/// Undersized sets, duplicate x-coordinates, inconsistent thresholds, and
/// mismatched lengths all fail with the same `Reconstruction` error.
pub fn reconstruct(shares: &[Share]) -> Result<zeroize::Zeroizing<Vec<u8>>, ShamirError> {
    let first = shares.first().ok_or(ShamirError::Reconstruction)?;
    let threshold = first.threshold;
    let secret_len = first.data.len();

    if shares.len() < usize::from(threshold) {
        return Err(ShamirError::Reconstruction);
    }

    let mut seen = [false; 256];
    for share in shares {
        if share.index == 0
            || share.threshold != threshold
            || share.data.len() != secret_len
            || seen[usize::from(share.index)]
        {
            return Err(ShamirError::Reconstruction);
        }
        seen[usize::from(share.index)] = true;
    }

    let mut secret = zeroize::Zeroizing::new(Vec::with_capacity(secret_len));
    let mut points = vec![(0u8, 0u8); shares.len()];
    for byte_idx in 0..secret_len {
        for (p, share) in points.iter_mut().zip(shares.iter()) {
            *p = (share.index, share.data[byte_idx]);
        }
        secret.push(interpolate_at_zero(&points));
    }
    points.zeroize();

    Ok(secret)
}
