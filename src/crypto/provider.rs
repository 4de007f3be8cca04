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

    src/crypto/provider.rs

    The crypto provider seam. Block payload work may be handed to an
    alternate implementation (a worker thread, an accelerator); the contract
    is the per-block encrypt/decrypt pair plus a streaming encryptor that
    consumes a raw audio buffer and yields ready-to-write blocks one at a
    time. A provider is not reentrant: concurrent use of the same provider
    surfaces ProviderBusy.
*/

use std::cell::Cell;

use crate::{
    block::AudioBlock,
    crypto,
    HimdError,
    HIMD_AUDIO_SIZE,
};

pub trait CryptoProvider {
    /// Encrypt one block payload in place.
    fn encrypt(
        &self,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block_key: &[u8; 8],
        block_iv: &[u8; 8],
        data: &mut [u8],
    ) -> Result<(), HimdError>;

    /// Decrypt one block payload in place.
    fn decrypt(
        &self,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block_key: &[u8; 8],
        block_iv: &[u8; 8],
        data: &mut [u8],
    ) -> Result<(), HimdError>;
}

/// The in-process provider. Runs DES-CBC on the calling task; the busy flag
/// still enforces the no-reentrancy contract so callers behave identically
/// against offloaded providers.
#[derive(Default)]
pub struct DefaultCryptoProvider {
    busy: Cell<bool>,
}

struct BusyGuard<'a> {
    flag: &'a Cell<bool>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl DefaultCryptoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self) -> Result<BusyGuard<'_>, HimdError> {
        if self.busy.replace(true) {
            return Err(HimdError::ProviderBusy);
        }
        Ok(BusyGuard { flag: &self.busy })
    }
}

impl CryptoProvider for DefaultCryptoProvider {
    fn encrypt(
        &self,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block_key: &[u8; 8],
        block_iv: &[u8; 8],
        data: &mut [u8],
    ) -> Result<(), HimdError> {
        let _guard = self.acquire()?;
        crypto::encrypt_block(track_key, fragment_key, block_key, block_iv, data);
        Ok(())
    }

    fn decrypt(
        &self,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block_key: &[u8; 8],
        block_iv: &[u8; 8],
        data: &mut [u8],
    ) -> Result<(), HimdError> {
        let _guard = self.acquire()?;
        crypto::decrypt_block(track_key, fragment_key, block_key, block_iv, data);
        Ok(())
    }
}

/// Streaming block encryptor. Pulls one block's worth of frames from the raw
/// buffer per step, so at most one encrypted chunk is ever in flight.
pub struct EncryptStream<'a, P: CryptoProvider + ?Sized> {
    provider: &'a P,
    track_key: [u8; 8],
    fragment_key: [u8; 8],
    raw: &'a [u8],
    pos: usize,
    frame_size: usize,
    frames_per_block: usize,
    block_type: [u8; 4],
    m_code: u16,
    content_id_lo32: u32,
    serial: u32,
}

impl<'a, P: CryptoProvider + ?Sized> EncryptStream<'a, P> {
    pub fn new(
        provider: &'a P,
        track_key: [u8; 8],
        fragment_key: [u8; 8],
        raw: &'a [u8],
        frame_size: usize,
        frames_per_block: usize,
        block_type: [u8; 4],
        m_code: u16,
        content_id_lo32: u32,
    ) -> Self {
        debug_assert!(frame_size * frames_per_block <= HIMD_AUDIO_SIZE);
        Self {
            provider,
            track_key,
            fragment_key,
            raw,
            pos: 0,
            frame_size,
            frames_per_block,
            block_type,
            m_code,
            content_id_lo32,
            serial: 1,
        }
    }
}

impl<P: CryptoProvider + ?Sized> Iterator for EncryptStream<'_, P> {
    type Item = Result<Box<AudioBlock>, HimdError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.raw.len() {
            return None;
        }

        let remaining = self.raw.len() - self.pos;
        let chunk_len = remaining.min(self.frame_size * self.frames_per_block);
        // The caller hands us whole frames; a trailing partial frame would be
        // unplayable, so it is an arithmetic fault upstream.
        debug_assert_eq!(chunk_len % self.frame_size, 0);

        let block_key = rand::random::<[u8; 8]>();
        let block_iv = rand::random::<[u8; 8]>();

        let mut block = AudioBlock::new(self.block_type, self.m_code, self.serial, self.content_id_lo32);
        block.n_frames = (chunk_len / self.frame_size) as u16;
        block.len_data = chunk_len as u16;
        block.key = block_key;
        block.iv = block_iv;
        block.audio[..chunk_len].copy_from_slice(&self.raw[self.pos..self.pos + chunk_len]);

        if let Err(e) = self.provider.encrypt(
            &self.track_key,
            &self.fragment_key,
            &block_key,
            &block_iv,
            &mut block.audio[..],
        ) {
            // Poison the stream; a failed chunk must not be retried with a
            // fresh key against half-written state.
            self.pos = self.raw.len();
            return Some(Err(e));
        }

        self.pos += chunk_len;
        self.serial += 1;
        Some(Ok(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_flag_released_on_drop() {
        let provider = DefaultCryptoProvider::new();
        let mut data = [0u8; 16];
        provider
            .encrypt(&[0; 8], &[0; 8], &[0; 8], &[0; 8], &mut data)
            .unwrap();
        // A second sequential use must succeed.
        provider
            .decrypt(&[0; 8], &[0; 8], &[0; 8], &[0; 8], &mut data)
            .unwrap();
        assert_eq!(data, [0u8; 16]);
    }

    #[test]
    fn test_stream_chunks_frames() {
        let provider = DefaultCryptoProvider::new();
        let raw = vec![0xA5u8; 192 * 3];
        let stream = EncryptStream::new(
            &provider,
            [1; 8],
            [2; 8],
            &raw,
            192,
            2,
            *b"A3D ",
            3,
            0xDEAD_BEEF,
        );
        let blocks: Vec<_> = stream.collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].n_frames, 2);
        assert_eq!(blocks[1].n_frames, 1);
        assert_eq!(blocks[0].serial, 1);
        assert_eq!(blocks[1].serial, 2);
    }
}
