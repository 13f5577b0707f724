//! Crypt4GH container framing and header-packet cryptography.
//!
//! A file is `crypt4gh` magic + version + packet count, then length-prefixed
//! header packets, then the encrypted payload. Each packet seals the data key
//! to one recipient with ChaCha20-Poly1305 under the libsodium-kx session key
//! `BLAKE2b-512(q ‖ writer_pk ‖ reader_pk)[0..32]`, where `q` is the X25519
//! shared secret. Payload segments are 64 KiB of plaintext, each carried as
//! nonce + ciphertext + tag.

use blake2::{Blake2b512, Digest};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroizing;

use filetide_core::{Error, PipelineData, Result};

use super::keys::{PublicKey, SecretKey};

pub const MAGIC: &[u8; 8] = b"crypt4gh";
pub const VERSION: u32 = 1;

pub const SEGMENT_SIZE: usize = 65536;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// On-wire size of one full payload segment.
pub const CIPHER_SEGMENT_SIZE: usize = SEGMENT_SIZE + NONCE_LEN + TAG_LEN;

const PACKET_ENCRYPTION_X25519_CHACHA20_POLY1305: u32 = 0;
const PACKET_TYPE_DATA_KEY: u32 = 0;
const DATA_ENCRYPTION_CHACHA20_POLY1305: u32 = 0;

/// Everything in a packet after the 4-byte length prefix:
/// method + writer public key + nonce + sealed payload.
const PACKET_OVERHEAD: usize = 4 + 32 + NONCE_LEN + TAG_LEN;

const MAX_HEADER_PACKETS: u32 = 1024;
const MAX_PACKET_LEN: u32 = 1024 * 1024;

/// Parsed header: the packet bodies, still sealed.
pub struct Header {
    pub packets: Vec<Vec<u8>>,
}

/// Read the header off the front of a carrier, leaving the cursor at the
/// first payload segment.
pub async fn read_header(data: &mut PipelineData) -> Result<Header> {
    let intro = data.read_full(16).await?;
    if intro.len() < 16 {
        return Err(Error::format("crypt4gh", "input is shorter than the header"));
    }
    if &intro[..8] != MAGIC {
        return Err(Error::format("crypt4gh", "bad magic bytes"));
    }
    let version = u32::from_le_bytes([intro[8], intro[9], intro[10], intro[11]]);
    if version != VERSION {
        return Err(Error::format(
            "crypt4gh",
            format!("unsupported version {version}"),
        ));
    }
    let packet_count = u32::from_le_bytes([intro[12], intro[13], intro[14], intro[15]]);
    if packet_count == 0 || packet_count > MAX_HEADER_PACKETS {
        return Err(Error::format(
            "crypt4gh",
            format!("implausible header packet count {packet_count}"),
        ));
    }

    let mut packets = Vec::with_capacity(packet_count as usize);
    for _ in 0..packet_count {
        let len_bytes = data.read_full(4).await?;
        if len_bytes.len() < 4 {
            return Err(Error::format("crypt4gh", "header packet length is truncated"));
        }
        // The length field counts itself.
        let packet_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        if packet_len < 4 + PACKET_OVERHEAD as u32 || packet_len > MAX_PACKET_LEN {
            return Err(Error::format(
                "crypt4gh",
                format!("implausible header packet length {packet_len}"),
            ));
        }
        let body = data.read_full(packet_len as usize - 4).await?;
        if body.len() != packet_len as usize - 4 {
            return Err(Error::format("crypt4gh", "header packet is truncated"));
        }
        packets.push(body.to_vec());
    }
    Ok(Header { packets })
}

/// Magic + version + count + length-prefixed packets.
pub fn serialize_header(packets: &[Vec<u8>]) -> Vec<u8> {
    let body_len: usize = packets.iter().map(|p| p.len() + 4).sum();
    let mut out = Vec::with_capacity(16 + body_len);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(packets.len() as u32).to_le_bytes());
    for packet in packets {
        out.extend_from_slice(&(packet.len() as u32 + 4).to_le_bytes());
        out.extend_from_slice(packet);
    }
    out
}

/// Try to open one sealed packet body with the reader's key.
pub fn open_packet(body: &[u8], key: &SecretKey) -> Option<Zeroizing<Vec<u8>>> {
    if body.len() < PACKET_OVERHEAD {
        return None;
    }
    let method = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    if method != PACKET_ENCRYPTION_X25519_CHACHA20_POLY1305 {
        return None;
    }
    let mut writer_pk = [0u8; 32];
    writer_pk.copy_from_slice(&body[4..36]);
    let nonce = &body[36..36 + NONCE_LEN];
    let sealed = &body[36 + NONCE_LEN..];

    let shared = reader_session_key(key, &PublicKey(writer_pk));
    let cipher = ChaCha20Poly1305::new(Key::from_slice(shared.as_slice()));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .ok()
        .map(Zeroizing::new)
}

/// Extract the 32-byte data key out of a decrypted data-key packet payload.
pub fn data_key_from_payload(payload: &[u8]) -> Option<Zeroizing<[u8; 32]>> {
    if payload.len() != 4 + 4 + 32 {
        return None;
    }
    let packet_type = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let method = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    if packet_type != PACKET_TYPE_DATA_KEY || method != DATA_ENCRYPTION_CHACHA20_POLY1305 {
        return None;
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&payload[8..40]);
    Some(key)
}

/// Open packets until one yields the data key.
///
/// Packets that decrypt to something other than a data-key payload (edit
/// lists) are skipped; failing to open any packet at all is an
/// authentication failure.
pub fn find_data_key(header: &Header, key: &SecretKey) -> Result<Zeroizing<[u8; 32]>> {
    for body in &header.packets {
        if let Some(payload) = open_packet(body, key) {
            if let Some(data_key) = data_key_from_payload(&payload) {
                return Ok(data_key);
            }
        }
    }
    Err(Error::crypto_auth(
        "no header packet could be opened with the provided key",
    ))
}

/// Seal the data key to a new recipient under a fresh ephemeral keypair.
pub fn seal_data_key_packet(data_key: &[u8; 32], recipient: &PublicKey) -> Result<Vec<u8>> {
    let ephemeral = SecretKey::from_bytes(
        x25519_dalek::StaticSecret::random_from_rng(OsRng).to_bytes(),
    );
    let shared = writer_session_key(&ephemeral, recipient);

    let mut payload = Zeroizing::new(Vec::with_capacity(40));
    payload.extend_from_slice(&PACKET_TYPE_DATA_KEY.to_le_bytes());
    payload.extend_from_slice(&DATA_ENCRYPTION_CHACHA20_POLY1305.to_le_bytes());
    payload.extend_from_slice(data_key);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(shared.as_slice()));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, payload.as_slice())
        .map_err(|_| Error::crypto_auth("failed to seal header packet"))?;

    let mut body = Vec::with_capacity(PACKET_OVERHEAD + 32);
    body.extend_from_slice(&PACKET_ENCRYPTION_X25519_CHACHA20_POLY1305.to_le_bytes());
    body.extend_from_slice(&ephemeral.public_key().0);
    body.extend_from_slice(&nonce);
    body.extend_from_slice(&sealed);
    Ok(body)
}

/// Decrypt one payload segment (nonce + ciphertext + tag).
pub fn decrypt_segment(data_key: &[u8; 32], segment: &[u8]) -> Result<Vec<u8>> {
    if segment.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::format("crypt4gh", "data segment is truncated"));
    }
    let (nonce, sealed) = segment.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(data_key));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| Error::crypto_auth("data segment failed authentication"))
}

/// Session key the reader derives to open a packet.
fn reader_session_key(reader: &SecretKey, writer_pk: &PublicKey) -> Zeroizing<[u8; 32]> {
    let q = reader.diffie_hellman(writer_pk);
    session_key_hash(&q, &writer_pk.0, &reader.public_key().0)
}

/// Session key the writer derives to seal a packet.
fn writer_session_key(writer: &SecretKey, reader_pk: &PublicKey) -> Zeroizing<[u8; 32]> {
    let q = writer.diffie_hellman(reader_pk);
    session_key_hash(&q, &writer.public_key().0, &reader_pk.0)
}

fn session_key_hash(
    q: &Zeroizing<[u8; 32]>,
    writer_pk: &[u8; 32],
    reader_pk: &[u8; 32],
) -> Zeroizing<[u8; 32]> {
    let mut hasher = Blake2b512::new();
    hasher.update(q.as_slice());
    hasher.update(writer_pk);
    hasher.update(reader_pk);
    let digest = hasher.finalize();
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&digest[..32]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_and_reader_derive_the_same_session_key() {
        let writer = SecretKey::from_bytes([3u8; 32]);
        let reader = SecretKey::from_bytes([4u8; 32]);
        let from_writer = writer_session_key(&writer, &reader.public_key());
        let from_reader = reader_session_key(&reader, &writer.public_key());
        assert_eq!(from_writer.as_slice(), from_reader.as_slice());
    }

    #[test]
    fn sealed_packet_opens_with_the_recipient_key() {
        let recipient = SecretKey::from_bytes([8u8; 32]);
        let data_key = [42u8; 32];
        let body = seal_data_key_packet(&data_key, &recipient.public_key()).expect("seal");

        let payload = open_packet(&body, &recipient).expect("open");
        let recovered = data_key_from_payload(&payload).expect("data key payload");
        assert_eq!(recovered.as_slice(), &data_key);
    }

    #[test]
    fn sealed_packet_stays_closed_for_other_keys() {
        let recipient = SecretKey::from_bytes([8u8; 32]);
        let stranger = SecretKey::from_bytes([9u8; 32]);
        let body =
            seal_data_key_packet(&[42u8; 32], &recipient.public_key()).expect("seal");
        assert!(open_packet(&body, &stranger).is_none());
    }

    #[test]
    fn header_serialization_roundtrips() {
        let packets = vec![vec![1u8; 60], vec![2u8; 80]];
        let raw = serialize_header(&packets);
        assert_eq!(&raw[..8], MAGIC);
        assert_eq!(u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]), VERSION);
        assert_eq!(u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]), 2);
        assert_eq!(
            u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]),
            64
        );
    }

    #[test]
    fn segment_roundtrip_and_tamper_detection() {
        let data_key = [7u8; 32];
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&data_key));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = cipher.encrypt(&nonce, b"payload".as_slice()).expect("seal");

        let mut segment = nonce.to_vec();
        segment.extend_from_slice(&sealed);
        assert_eq!(decrypt_segment(&data_key, &segment).expect("open"), b"payload");

        let mut tampered = segment.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        assert!(matches!(
            decrypt_segment(&data_key, &tampered),
            Err(Error::CryptoAuth { .. })
        ));
    }
}
