//! Sealed tokens used as the session cookie format.
//!
//! Tokens follow PASETO version 4 in `local` mode: the payload is a JSON set
//! of [`Claims`] encrypted with XChaCha20 and authenticated with BLAKE2b.

pub mod claims;
pub mod local;

pub use claims::{Claims, ClaimsValidator};
pub use local::SecretKey;

/// Pre-authentication encoding (PAE) of a list of byte strings, as used to
/// build the authenticated data of a token.
pub(crate) fn pre_auth_encode(pieces: &[&[u8]]) -> Vec<u8> {
    let capacity = 8 + pieces.iter().map(|p| 8 + p.len()).sum::<usize>();
    let mut out = Vec::with_capacity(capacity);

    out.extend_from_slice(&le64(pieces.len()));
    for piece in pieces {
        out.extend_from_slice(&le64(piece.len()));
        out.extend_from_slice(piece);
    }

    out
}

// most significant bit is always cleared for interoperability
fn le64(n: usize) -> [u8; 8] {
    ((n as u64) & (u64::MAX >> 1)).to_le_bytes()
}
