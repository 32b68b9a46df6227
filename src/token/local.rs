//! PASETO version 4 local tokens.

use crate::token::claims::{Claims, ClaimsValidator};
use crate::token::pre_auth_encode;

use std::fmt;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use blake2::{
    digest::{
        consts::{U32, U56},
        Mac,
    },
    Blake2bMac,
};
use chacha20::{
    cipher::{KeyIvInit, StreamCipher},
    XChaCha20,
};
use getrandom::getrandom;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const LOCAL_HEADER: &str = "v4.local.";

const DOMAIN_ENCRYPT: &[u8] = b"paseto-encryption-key";
const DOMAIN_AUTH: &[u8] = b"paseto-auth-key-for-aead";

const NONCE_LEN: usize = 32;
const MAC_LEN: usize = 32;

/// Errors while sealing or opening local tokens.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum Error {
    #[error("key must be 32 bytes")]
    SizeError,
    #[error("key is not valid base64")]
    KeyEncoding,
    #[error("unable to encode claims as json")]
    EncodeError,
    #[error("failed to get randomness for nonce")]
    RngError,
    #[error("supplied token has invalid header")]
    InvalidHeader,
    #[error("unable to decode token message")]
    InvalidMessage,
    #[error("unable to decode token footer")]
    InvalidFooter,
    #[error("failed to authenticate ciphertext")]
    AuthFailure,
    #[error("unable to decode claims as json")]
    DecodeError,
    #[error("token claims failed validation")]
    BadClaims,
}

/// A symmetric key for sealing local tokens. The key material is wiped
/// when dropped and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_slice(key: &[u8]) -> Result<Self, Error> {
        Ok(Self(key.try_into().map_err(|_| Error::SizeError)?))
    }

    /// Load a key from its standard base64 encoding.
    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| Error::KeyEncoding)?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();

        key
    }

    fn encrypt_message(
        &self,
        message: &[u8],
        nonce: &[u8],
        footer: Option<&[u8]>,
        implicit: Option<&[u8]>,
    ) -> Result<String, Error> {
        let keys = SplitKey::derive(&self.0, nonce)?;

        let mut c = message.to_vec();
        XChaCha20::new(&keys.enc.into(), &keys.nonce.into()).apply_keystream(&mut c);

        let mac = Blake2bMac::<U32>::new_from_slice(&keys.auth)
            .map_err(|_| Error::SizeError)?
            .chain_update(pre_auth_encode(&[
                LOCAL_HEADER.as_bytes(),
                nonce,
                &c,
                footer.unwrap_or(&[]),
                implicit.unwrap_or(&[]),
            ]))
            .finalize()
            .into_bytes();

        let mut token = LOCAL_HEADER.to_string();
        token += &URL_SAFE_NO_PAD.encode([nonce, &c, &mac].concat());
        if let Some(footer) = footer {
            token += ".";
            token += &URL_SAFE_NO_PAD.encode(footer);
        }

        Ok(token)
    }

    /// Seal a set of claims into a new local token. The implicit assertion
    /// is authenticated but not stored; the same value must be given when
    /// decrypting.
    ///
    /// # Errors
    ///
    /// If any of the claims is unable to be serialized as JSON, or the OS
    /// can't provide randomness for the nonce, an error is returned.
    pub fn encrypt(&self, claims: &Claims, implicit: Option<&[u8]>) -> Result<String, Error> {
        let message = serde_json::to_vec(&claims).map_err(|_| Error::EncodeError)?;

        let mut nonce = [0; NONCE_LEN];
        getrandom(&mut nonce).map_err(|_| Error::RngError)?;

        self.encrypt_message(&message, &nonce, None, implicit)
    }

    fn decrypt_message(
        &self,
        token: &[u8],
        implicit: Option<&[u8]>,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), Error> {
        let mut body = token
            .strip_prefix(LOCAL_HEADER.as_bytes())
            .ok_or(Error::InvalidHeader)?
            .split(|b| *b == b'.');

        let message = match body.next().map(|msg| URL_SAFE_NO_PAD.decode(msg)) {
            Some(Ok(d)) if d.len() >= NONCE_LEN + MAC_LEN => d,
            _ => return Err(Error::InvalidMessage),
        };
        let footer = body
            .next()
            .map(|msg| URL_SAFE_NO_PAD.decode(msg))
            .transpose()
            .map_err(|_| Error::InvalidFooter)?;
        if body.next().is_some() {
            return Err(Error::InvalidMessage);
        }

        let (nonce, remaining) = message.split_at(NONCE_LEN);
        let (c, mac) = remaining.split_at(remaining.len() - MAC_LEN);

        let keys = SplitKey::derive(&self.0, nonce)?;

        // verify_slice compares in constant time
        Blake2bMac::<U32>::new_from_slice(&keys.auth)
            .map_err(|_| Error::SizeError)?
            .chain_update(pre_auth_encode(&[
                LOCAL_HEADER.as_bytes(),
                nonce,
                c,
                footer.as_deref().unwrap_or(&[]),
                implicit.unwrap_or(&[]),
            ]))
            .verify_slice(mac)
            .map_err(|_| Error::AuthFailure)?;

        let mut p = c.to_vec();
        XChaCha20::new(&keys.enc.into(), &keys.nonce.into()).apply_keystream(&mut p);

        Ok((p, footer))
    }

    /// Decrypt a local token, checking it against a claims validator.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, fails authentication
    /// under this key and implicit assertion, or its claims are rejected by
    /// the validator.
    pub fn decrypt(
        &self,
        token: &str,
        validator: &ClaimsValidator,
        implicit: Option<&[u8]>,
    ) -> Result<Claims, Error> {
        let (message, _) = self.decrypt_message(token.as_bytes(), implicit)?;

        let claims = serde_json::from_slice(&message).map_err(|_| Error::DecodeError)?;

        if validator.validate(&claims) {
            Ok(claims)
        } else {
            Err(Error::BadClaims)
        }
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Per-token keys derived from the base key and the token nonce.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SplitKey {
    enc: [u8; 32],
    nonce: [u8; 24],
    auth: [u8; 32],
}

impl SplitKey {
    fn derive(base_key: &[u8], split_nonce: &[u8]) -> Result<Self, Error> {
        let enc_hash = Blake2bMac::<U56>::new_from_slice(base_key)
            .map_err(|_| Error::SizeError)?
            .chain_update([DOMAIN_ENCRYPT, split_nonce].concat())
            .finalize()
            .into_bytes();

        let auth_hash = Blake2bMac::<U32>::new_from_slice(base_key)
            .map_err(|_| Error::SizeError)?
            .chain_update([DOMAIN_AUTH, split_nonce].concat())
            .finalize()
            .into_bytes();

        let mut keys = Self {
            enc: [0; 32],
            nonce: [0; 24],
            auth: [0; 32],
        };
        keys.enc.copy_from_slice(&enc_hash[..32]);
        keys.nonce.copy_from_slice(&enc_hash[32..]);
        keys.auth.copy_from_slice(&auth_hash);

        Ok(keys)
    }
}
