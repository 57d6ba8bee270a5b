//! The cipher factory consumed by the relay core.
//!
//! The relay never looks inside a [`CipherContext`]; it only calls
//! [`encrypt`]/[`decrypt`] on it. Swapping in a different stream cipher, or a
//! real Shadowsocks AEAD, means touching this module only.

use cipher::consts::U16;
use cipher::{KeyInit, StreamCipher};
use md5::{Digest, Md5};
use rc4::Rc4;
use serde_derive::Deserialize;
use std::fmt;

/// Key length used for every stateful method we support. Matches the
/// 16-byte key Shadowsocks derives for `rc4-md5`.
const KEY_LEN: usize = 16;

/// Cipher methods recognized by the configuration provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CipherMethod {
    /// Stateless/identity path: `encrypt`/`decrypt` are no-ops.
    #[serde(rename = "none")]
    None,
    /// Stateful stream cipher; the only one named explicitly by the spec.
    #[serde(rename = "rc4")]
    Rc4,
}

impl Default for CipherMethod {
    fn default() -> Self {
        CipherMethod::Rc4
    }
}

impl fmt::Display for CipherMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherMethod::None => write!(f, "none"),
            CipherMethod::Rc4 => write!(f, "rc4"),
        }
    }
}

/// Process-wide, read-only after construction: the derived key and the
/// configured method. Obtained once at startup, then handed to every
/// accepted pair as an `Arc`.
pub struct CipherConfig {
    method: CipherMethod,
    key: [u8; KEY_LEN],
}

impl CipherConfig {
    /// Derive the process-wide key from `password` using the same
    /// iterated-MD5 `EVP_BytesToKey` scheme Shadowsocks uses: repeatedly
    /// hash `prev_digest || password` until we have enough key material.
    pub fn new(password: &str, method: CipherMethod) -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut generated = 0usize;
        let mut prev: Vec<u8> = Vec::new();

        while generated < KEY_LEN {
            let mut hasher = Md5::new();
            hasher.update(&prev);
            hasher.update(password.as_bytes());
            let digest = hasher.finalize();

            let take = std::cmp::min(KEY_LEN - generated, digest.len());
            key[generated..generated + take].copy_from_slice(&digest[..take]);
            generated += take;
            prev = digest.to_vec();
        }

        CipherConfig { method, key }
    }

    pub fn method(&self) -> CipherMethod {
        self.method
    }

    /// Two independent contexts per pair when the method is stateful, one
    /// per direction; `None` for both when it's the identity method.
    pub fn new_context_pair(&self) -> (Option<CipherContext>, Option<CipherContext>) {
        match self.method {
            CipherMethod::None => (None, None),
            CipherMethod::Rc4 => (
                Some(CipherContext::new_rc4(&self.key)),
                Some(CipherContext::new_rc4(&self.key)),
            ),
        }
    }
}

/// Opaque per-direction cipher state. The relay core only ever calls
/// [`encrypt`]/[`decrypt`] with `&mut Option<CipherContext>`; it never reads
/// the variants directly.
pub enum CipherContext {
    Rc4(Rc4<U16>),
}

impl CipherContext {
    fn new_rc4(key: &[u8; KEY_LEN]) -> Self {
        CipherContext::Rc4(Rc4::<U16>::new_from_slice(key).expect("rc4 key is exactly KEY_LEN"))
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            CipherContext::Rc4(cipher) => cipher.apply_keystream(buf),
        }
    }
}

/// `decrypt(buf, d_ctx)`: mutates `buf` in place. A no-op when `ctx` is
/// `None` (the stateless/identity method).
pub fn decrypt(buf: &mut [u8], ctx: Option<&mut CipherContext>) {
    if let Some(ctx) = ctx {
        ctx.apply(buf);
    }
}

/// `encrypt(buf, e_ctx)`: mutates `buf` in place. A no-op when `ctx` is
/// `None`.
pub fn encrypt(buf: &mut [u8], ctx: Option<&mut CipherContext>) {
    if let Some(ctx) = ctx {
        ctx.apply(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc4_round_trips() {
        let cfg = CipherConfig::new("hunter2", CipherMethod::Rc4);
        let (mut enc, mut dec) = cfg.new_context_pair();

        let plaintext = b"the quick brown fox".to_vec();
        let mut buf = plaintext.clone();

        encrypt(&mut buf, enc.as_mut());
        assert_ne!(buf, plaintext);

        decrypt(&mut buf, dec.as_mut());
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn identity_method_is_a_no_op() {
        let cfg = CipherConfig::new("hunter2", CipherMethod::None);
        let (mut enc, mut dec) = cfg.new_context_pair();
        assert!(enc.is_none() && dec.is_none());

        let plaintext = b"unchanged".to_vec();
        let mut buf = plaintext.clone();
        encrypt(&mut buf, enc.as_mut());
        decrypt(&mut buf, dec.as_mut());
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn same_password_derives_same_key_material() {
        let a = CipherConfig::new("correct horse battery staple", CipherMethod::Rc4);
        let b = CipherConfig::new("correct horse battery staple", CipherMethod::Rc4);
        assert_eq!(a.key, b.key);
    }
}
