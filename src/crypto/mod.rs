/*
    HiMDFox
    https://github.com/dbalsom/himdfox

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/crypto/mod.rs

    Cipher primitives for the Sony Hi-MD DRM scheme: DES-ECB/CBC, 3DES-ECB,
    the EKB root table, key derivations, the ANSI X9.19 retail-MAC, and the
    MP3 obfuscation key. All key material in this system is 8, 16 or 24
    bytes; lengths are enforced by the type system, so a mismatch is a
    programming fault rather than a runtime error.

    These implementations are for offline disc mastering and are not
    constant-time.
*/

use des::{
    cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit},
    Des,
    TdesEde3,
};

use crate::HimdError;

pub mod provider;

pub use provider::{CryptoProvider, DefaultCryptoProvider};

/// Root key for EKB 0x00010012, the only key block ever issued for Hi-MD.
const EKB_ROOT_00010012: [u8; 24] = [
    0xF5, 0x1E, 0xCB, 0x2A, 0x80, 0x8F, 0x15, 0xFD, 0x54, 0x2E, 0xF5, 0x12, 0x3B, 0xCD, 0xBC, 0xA4, 0xF5, 0x1E, 0xCB,
    0x2A, 0x80, 0x8F, 0x15, 0xFD,
];

/// The first 16 bytes of the EKB root, used as the retail-MAC key during
/// device authentication.
pub const MAIN_KEY: [u8; 16] = [
    0xF5, 0x1E, 0xCB, 0x2A, 0x80, 0x8F, 0x15, 0xFD, 0x54, 0x2E, 0xF5, 0x12, 0x3B, 0xCD, 0xBC, 0xA4,
];

/// Look up the 24-byte root for an EKB number.
pub fn ekb_root(ekb: u32) -> Result<[u8; 24], HimdError> {
    match ekb {
        crate::HIMD_EKB_VERSION => Ok(EKB_ROOT_00010012),
        _ => Err(HimdError::UnknownEkb(ekb)),
    }
}

pub fn des_ecb_encrypt(key: &[u8; 8], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = Des::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub fn des_ecb_decrypt(key: &[u8; 8], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = Des::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(8) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub fn des_cbc_encrypt(key: &[u8; 8], iv: &[u8; 8], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = Des::new(GenericArray::from_slice(key));
    let mut prev = *iv;
    for block in data.chunks_exact_mut(8) {
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        prev.copy_from_slice(block);
    }
}

pub fn des_cbc_decrypt(key: &[u8; 8], iv: &[u8; 8], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = Des::new(GenericArray::from_slice(key));
    let mut prev = *iv;
    for block in data.chunks_exact_mut(8) {
        let mut saved = [0u8; 8];
        saved.copy_from_slice(block);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        prev = saved;
    }
}

pub fn triple_des_ecb_encrypt(key: &[u8; 24], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = TdesEde3::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub fn triple_des_ecb_decrypt(key: &[u8; 24], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = TdesEde3::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(8) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

/// Unwrap a track slot's encrypted key with the root for its EKB number.
pub fn create_track_key(ekb: u32, encrypted_key: &[u8; 8]) -> Result<[u8; 8], HimdError> {
    let root = ekb_root(ekb)?;
    let mut key = *encrypted_key;
    triple_des_ecb_decrypt(&root, &mut key);
    Ok(key)
}

/// Wrap a fresh track key for storage in a track slot. New tracks are always
/// issued under EKB 0x00010012.
pub fn encrypt_track_key(track_key: &[u8; 8]) -> [u8; 8] {
    let mut kek = *track_key;
    triple_des_ecb_encrypt(&EKB_ROOT_00010012, &mut kek);
    kek
}

/// Derive the DES key protecting one audio block's payload.
pub fn derive_block_key(track_key: &[u8; 8], fragment_key: &[u8; 8], block_key: &[u8; 8]) -> [u8; 8] {
    let mut xored = [0u8; 8];
    for i in 0..8 {
        xored[i] = track_key[i] ^ fragment_key[i];
    }
    let mut derived = *block_key;
    des_ecb_encrypt(&xored, &mut derived);
    derived
}

/// Encrypt a block payload in place. `audio` must be the full
/// [crate::HIMD_AUDIO_SIZE] payload.
pub fn encrypt_block(
    track_key: &[u8; 8],
    fragment_key: &[u8; 8],
    block_key: &[u8; 8],
    block_iv: &[u8; 8],
    audio: &mut [u8],
) {
    let derived = derive_block_key(track_key, fragment_key, block_key);
    des_cbc_encrypt(&derived, block_iv, audio);
}

/// Decrypt a block payload in place.
pub fn decrypt_block(
    track_key: &[u8; 8],
    fragment_key: &[u8; 8],
    block_key: &[u8; 8],
    block_iv: &[u8; 8],
    audio: &mut [u8],
) {
    let derived = derive_block_key(track_key, fragment_key, block_key);
    des_cbc_decrypt(&derived, block_iv, audio);
}

/// ANSI X9.19 retail MAC, no padding. The message length must be a multiple
/// of eight; every message this scheme signs already is.
pub fn retail_mac(message: &[u8], key: &[u8; 16]) -> [u8; 8] {
    debug_assert_eq!(message.len() % 8, 0);
    let k1: [u8; 8] = key[0..8].try_into().unwrap();
    let k2: [u8; 8] = key[8..16].try_into().unwrap();

    let mut chained = message.to_vec();
    des_cbc_encrypt(&k1, &[0u8; 8], &mut chained);

    let mut mac: [u8; 8] = chained[chained.len() - 8..].try_into().unwrap();
    des_ecb_decrypt(&k2, &mut mac);
    des_ecb_encrypt(&k1, &mut mac);
    mac
}

/// MAC binding the ICV header and value to a session key.
pub fn create_icv_mac(header_icv: &[u8; 24], session_key: &[u8; 8]) -> [u8; 8] {
    let mut chained = *header_icv;
    des_cbc_encrypt(session_key, &[0u8; 8], &mut chained);
    chained[16..24].try_into().unwrap()
}

/// Sign the DRM-relevant tail of a serialized track slot (bytes 0x28..0x50).
pub fn create_track_mac(track_key: &[u8; 8], track_entry: &[u8]) -> [u8; 8] {
    debug_assert_eq!(track_entry.len(), 0x28);
    let mut mac_key = [0u8; 8];
    des_ecb_encrypt(track_key, &mut mac_key);

    let mut chained = track_entry.to_vec();
    des_cbc_encrypt(&mac_key, &[0u8; 8], &mut chained);
    chained[chained.len() - 8..].try_into().unwrap()
}

/// Unwrap one of the two disc-scoped MAC list keys.
pub fn decrypt_maclist_key(key_cipher: &[u8; 16]) -> [u8; 16] {
    let mut key = *key_cipher;
    triple_des_ecb_decrypt(&EKB_ROOT_00010012, &mut key);
    key
}

/// The 4-byte XOR key obfuscating MP3 payloads, derived from the disc id and
/// the one-based track number.
pub fn mp3_encryption_key(disc_id: &[u8; 16], track_number: u16) -> [u8; 4] {
    let tail = u32::from_be_bytes([disc_id[12], disc_id[13], disc_id[14], disc_id[15]]);
    let key = (track_number as u32).wrapping_mul(0x6953_B2ED).wrapping_add(0x6B_AAB1) ^ tail;
    key.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_des_known_vector() {
        // FIPS 81 single-block ECB example.
        let key = [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF];
        let mut block = *b"Now is t";
        des_ecb_encrypt(&key, &mut block);
        assert_eq!(block, [0x3F, 0xA4, 0x0E, 0x8A, 0x98, 0x4D, 0x48, 0x15]);
        des_ecb_decrypt(&key, &mut block);
        assert_eq!(&block, b"Now is t");
    }

    #[test]
    fn test_cbc_round_trip() {
        let key = [0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE];
        let iv = [9u8; 8];
        let mut data = (0u8..48).collect::<Vec<_>>();
        let original = data.clone();
        des_cbc_encrypt(&key, &iv, &mut data);
        assert_ne!(data, original);
        des_cbc_decrypt(&key, &iv, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_track_key_round_trip() {
        let track_key = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04];
        let kek = encrypt_track_key(&track_key);
        assert_eq!(create_track_key(crate::HIMD_EKB_VERSION, &kek).unwrap(), track_key);
    }

    #[test]
    fn test_unknown_ekb() {
        assert!(matches!(
            create_track_key(0x00010013, &[0u8; 8]),
            Err(HimdError::UnknownEkb(0x00010013))
        ));
    }

    #[test]
    fn test_block_round_trip() {
        let tk = [1u8; 8];
        let fk = [2u8; 8];
        let bk = [3u8; 8];
        let iv = [4u8; 8];
        let mut payload = vec![0u8; crate::HIMD_AUDIO_SIZE];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let original = payload.clone();
        encrypt_block(&tk, &fk, &bk, &iv, &mut payload);
        assert_ne!(payload, original);
        decrypt_block(&tk, &fk, &bk, &iv, &mut payload);
        assert_eq!(payload, original);
    }

    #[test]
    fn test_retail_mac_properties() {
        let msg = [0x55u8; 32];
        let mac = retail_mac(&msg, &MAIN_KEY);
        assert_eq!(mac, retail_mac(&msg, &MAIN_KEY));

        let mut other_key = MAIN_KEY;
        other_key[0] ^= 1;
        assert_ne!(mac, retail_mac(&msg, &other_key));

        let mut other_msg = msg;
        other_msg[31] ^= 1;
        assert_ne!(mac, retail_mac(&other_msg, &MAIN_KEY));
    }

    #[test]
    fn test_mp3_key_depends_on_track_and_disc() {
        let mut disc_id = [0u8; 16];
        disc_id[12..16].copy_from_slice(&[0x12, 0x34, 0x56, 0x78]);
        let k1 = mp3_encryption_key(&disc_id, 1);
        let k2 = mp3_encryption_key(&disc_id, 2);
        assert_ne!(k1, k2);

        disc_id[15] ^= 0xFF;
        assert_ne!(k1, mp3_encryption_key(&disc_id, 1));
    }
}
