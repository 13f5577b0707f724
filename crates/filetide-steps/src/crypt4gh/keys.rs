//! Crypt4GH key material: PEM-style armors around raw X25519 keys.
//!
//! Public keys are 32 raw bytes; private keys sit in the `c4gh-v1` container
//! with ssh-style big-endian length-prefixed strings. Only unencrypted
//! (`none` KDF) private keys are accepted; secret bytes are wiped on drop.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use zeroize::Zeroizing;

use filetide_core::{Error, Result};

const PUBLIC_BEGIN: &str = "-----BEGIN CRYPT4GH PUBLIC KEY-----";
const PUBLIC_END: &str = "-----END CRYPT4GH PUBLIC KEY-----";
const PRIVATE_BEGIN: &str = "-----BEGIN CRYPT4GH PRIVATE KEY-----";
const PRIVATE_END: &str = "-----END CRYPT4GH PRIVATE KEY-----";

const CONTAINER_MAGIC: &[u8] = b"c4gh-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(pub [u8; 32]);

/// X25519 secret scalar, zeroized on drop.
pub struct SecretKey(Zeroizing<[u8; 32]>);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn public_key(&self) -> PublicKey {
        let secret = x25519_dalek::StaticSecret::from(*self.0);
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    pub fn diffie_hellman(&self, peer: &PublicKey) -> Zeroizing<[u8; 32]> {
        let secret = x25519_dalek::StaticSecret::from(*self.0);
        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer.0));
        Zeroizing::new(shared.to_bytes())
    }
}

pub fn parse_public_key(pem: &str) -> Result<PublicKey> {
    let raw = decode_armor(pem, PUBLIC_BEGIN, PUBLIC_END)?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| Error::invalid_arguments("public key must be exactly 32 bytes"))?;
    Ok(PublicKey(bytes))
}

pub fn parse_secret_key(pem: &str) -> Result<SecretKey> {
    let raw = Zeroizing::new(decode_armor(pem, PRIVATE_BEGIN, PRIVATE_END)?);
    let mut reader = ContainerReader::new(&raw);

    let magic = reader.take(CONTAINER_MAGIC.len())?;
    if magic != CONTAINER_MAGIC {
        return Err(Error::invalid_arguments(
            "private key is not a c4gh-v1 container",
        ));
    }

    let kdf_name = reader.string()?;
    if kdf_name != b"none" {
        // Password-protected keys would need the KDF rounds and salt that
        // follow here; the server only accepts unencrypted key material.
        return Err(Error::invalid_arguments(
            "encrypted private keys are not supported",
        ));
    }
    let cipher_name = reader.string()?;
    if cipher_name != b"none" {
        return Err(Error::invalid_arguments(
            "encrypted private keys are not supported",
        ));
    }

    let blob = Zeroizing::new(reader.string()?.to_vec());
    let bytes: [u8; 32] = blob
        .as_slice()
        .try_into()
        .map_err(|_| Error::invalid_arguments("private key must be exactly 32 bytes"))?;
    Ok(SecretKey::from_bytes(bytes))
}

fn decode_armor(pem: &str, begin: &str, end: &str) -> Result<Vec<u8>> {
    let text = pem.trim();
    let start = text
        .find(begin)
        .ok_or_else(|| Error::invalid_arguments(format!("missing `{begin}` armor")))?;
    let rest = &text[start + begin.len()..];
    let stop = rest
        .find(end)
        .ok_or_else(|| Error::invalid_arguments(format!("missing `{end}` armor")))?;
    let body: String = rest[..stop].split_whitespace().collect();
    BASE64
        .decode(body.as_bytes())
        .map_err(|error| Error::invalid_arguments(format!("malformed key base64: {error}")))
}

/// Big-endian length-prefixed field reader for the key container.
struct ContainerReader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> ContainerReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.at < n {
            return Err(Error::invalid_arguments("private key container is truncated"));
        }
        let out = &self.buf[self.at..self.at + n];
        self.at += n;
        Ok(out)
    }

    fn string(&mut self) -> Result<&'a [u8]> {
        let len_bytes = self.take(2)?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        self.take(len)
    }
}
