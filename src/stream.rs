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

    src/stream.rs

    Audio streaming over the ATDATA container. A track's fragments are
    walked into an ordered chain, a lazy block reader pulls 16 KiB blocks
    off the chain one at a time, and codec-specific readers turn blocks
    into decrypted (or de-obfuscated) frame runs. Writing appends blocks at
    the container tail and reports the block range for the fragment record.
*/

use crate::{
    block::{mp3_obfuscate, AudioBlock},
    crypto::CryptoProvider,
    storage::StorageFile,
    tif::{Fragment, TrackIndex},
    util::be16,
    HimdError,
    HIMD_AUDIO_SIZE,
    HIMD_BLOCK_SIZE,
};

/// Maximum fragments one track may chain before the walk is declared broken.
const MAX_FRAGMENT_HOPS: usize = 4096;

/// Collect a track's fragment chain in playback order.
pub fn fragment_chain(tif: &TrackIndex, first_fragment: u16) -> Result<Vec<(u16, Fragment)>, HimdError> {
    let mut chain = Vec::new();
    let mut cursor = first_fragment;
    while cursor != 0 {
        if chain.len() >= MAX_FRAGMENT_HOPS {
            return Err(HimdError::FragmentChainBroken);
        }
        let fragment = tif.fragment(cursor);
        if fragment.last_block < fragment.first_block {
            return Err(HimdError::FragmentChainBroken);
        }
        let next = fragment.next_fragment;
        chain.push((cursor, fragment));
        cursor = next;
    }
    if chain.is_empty() {
        return Err(HimdError::FragmentChainBroken);
    }
    Ok(chain)
}

/// One raw block pulled off a fragment chain, with the frame window that
/// belongs to the track.
pub struct RawBlock {
    pub data: Vec<u8>,
    pub fragment_key: [u8; 8],
    pub first_frame:  u16,
    pub last_frame:   u16,
}

/// Lazy reader over the blocks of a fragment chain.
pub struct BlockReader<'a> {
    file: &'a mut dyn StorageFile,
    fragments: Vec<(u16, Fragment)>,
    frag_pos: usize,
    /// None between fragments; the next step enters the next fragment.
    current_block: Option<u16>,
    mpeg: bool,
    frames_per_block: u16,
}

impl<'a> BlockReader<'a> {
    pub fn new(
        file: &'a mut dyn StorageFile,
        fragments: Vec<(u16, Fragment)>,
        mpeg: bool,
        frames_per_block: u16,
    ) -> Self {
        Self {
            file,
            fragments,
            frag_pos: 0,
            current_block: None,
            mpeg,
            frames_per_block,
        }
    }
}

impl Iterator for BlockReader<'_> {
    type Item = Result<RawBlock, HimdError>;

    fn next(&mut self) -> Option<Self::Item> {
        let fragment = &self.fragments.get(self.frag_pos)?.1;

        let (block, first_frame) = match self.current_block {
            // Entering a fragment: seek to its first block.
            None => {
                let block = fragment.first_block;
                if let Err(e) = self.file.seek(block as u64 * HIMD_BLOCK_SIZE as u64) {
                    self.frag_pos = self.fragments.len();
                    return Some(Err(e.into()));
                }
                (block, fragment.first_frame as u16)
            }
            Some(block) => (block, 0),
        };

        let mut data = vec![0u8; HIMD_BLOCK_SIZE];
        if let Err(e) = self.file.read_exact(&mut data) {
            self.frag_pos = self.fragments.len();
            return Some(Err(e.into()));
        }

        let last_frame = if block == fragment.last_block {
            // MPEG fragments store their last frame one past the end.
            let last = (fragment.last_frame as u16).saturating_sub(self.mpeg as u16);
            self.frag_pos += 1;
            self.current_block = None;
            last
        }
        else {
            self.current_block = Some(block + 1);
            if self.mpeg {
                be16(&data[4..]).saturating_sub(1)
            }
            else {
                self.frames_per_block.saturating_sub(1)
            }
        };

        Some(Ok(RawBlock {
            data,
            fragment_key: fragment.key,
            first_frame,
            last_frame,
        }))
    }
}

/// Decrypting reader for the DES-protected codecs. Yields each block's frame
/// window as raw codec bytes.
pub struct AudioFrameReader<'a, P: CryptoProvider + ?Sized> {
    inner: BlockReader<'a>,
    provider: &'a P,
    track_key:  [u8; 8],
    frame_size: usize,
}

impl<'a, P: CryptoProvider + ?Sized> AudioFrameReader<'a, P> {
    pub fn new(inner: BlockReader<'a>, provider: &'a P, track_key: [u8; 8], frame_size: usize) -> Self {
        Self {
            inner,
            provider,
            track_key,
            frame_size,
        }
    }
}

impl<P: CryptoProvider + ?Sized> Iterator for AudioFrameReader<'_, P> {
    type Item = Result<Vec<u8>, HimdError>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = match self.inner.next()? {
            Ok(raw) => raw,
            Err(e) => return Some(Err(e)),
        };
        Some(self.decrypt_window(raw))
    }
}

impl<P: CryptoProvider + ?Sized> AudioFrameReader<'_, P> {
    fn decrypt_window(&mut self, raw: RawBlock) -> Result<Vec<u8>, HimdError> {
        let mut block = AudioBlock::parse(&raw.data)?;
        if block.len_data as usize > HIMD_AUDIO_SIZE {
            return Err(HimdError::BlockDataTooLarge);
        }
        if raw.last_frame < raw.first_frame {
            return Err(HimdError::LastFrameBeforeFirstFrame);
        }
        let start = raw.first_frame as usize * self.frame_size;
        let end = (raw.last_frame as usize + 1) * self.frame_size;
        if end > HIMD_AUDIO_SIZE {
            return Err(HimdError::FrameOutOfRange);
        }

        let key = block.key;
        let iv = block.iv;
        self.provider
            .decrypt(&self.track_key, &raw.fragment_key, &key, &iv, &mut block.audio[..])?;
        Ok(block.audio[start..end].to_vec())
    }
}

/// De-obfuscating reader for MP3 tracks. Yields each block's payload bytes.
pub struct Mp3BlockReader<'a> {
    inner: BlockReader<'a>,
    key:   [u8; 4],
}

impl<'a> Mp3BlockReader<'a> {
    pub fn new(inner: BlockReader<'a>, key: [u8; 4]) -> Self {
        Self { inner, key }
    }
}

impl Iterator for Mp3BlockReader<'_> {
    type Item = Result<Vec<u8>, HimdError>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = match self.inner.next()? {
            Ok(raw) => raw,
            Err(e) => return Some(Err(e)),
        };

        let data_frames = be16(&raw.data[4..]);
        let data_bytes = be16(&raw.data[8..]) as usize;
        if data_bytes > HIMD_AUDIO_SIZE {
            return Some(Err(HimdError::BlockDataTooLarge));
        }
        if raw.last_frame >= data_frames {
            return Some(Err(HimdError::FrameOutOfRange));
        }

        let mut payload = raw.data[0x20..0x20 + data_bytes].to_vec();
        mp3_obfuscate(&mut payload, &self.key, data_bytes);
        Some(Ok(payload))
    }
}

/// Appends audio blocks at the ATDATA tail, tracking the block range for
/// the eventual fragment record.
pub struct BlockWriteStream<'a> {
    file: &'a mut dyn StorageFile,
    first_block: u16,
    blocks_written: u16,
}

impl<'a> BlockWriteStream<'a> {
    /// Open the container tail for appending. A cluster spans two blocks and
    /// tracks must start on a cluster boundary (deletion frees whole
    /// clusters), so an odd tail is padded with one zero block first.
    pub fn new(file: &'a mut dyn StorageFile) -> Result<Self, HimdError> {
        let length = file.length()?;
        debug_assert_eq!(length % HIMD_BLOCK_SIZE as u64, 0);
        let mut first_block = (length / HIMD_BLOCK_SIZE as u64) as u16;
        file.seek(length)?;
        if first_block % 2 == 1 {
            file.write_all(&[0u8; HIMD_BLOCK_SIZE])?;
            first_block += 1;
        }
        Ok(Self {
            file,
            first_block,
            blocks_written: 0,
        })
    }

    /// Append a block whose payload is already in its final (encrypted or
    /// obfuscated) form.
    pub fn append(&mut self, block: &AudioBlock) -> Result<(), HimdError> {
        self.file.write_all(&block.to_bytes())?;
        self.blocks_written += 1;
        Ok(())
    }

    /// Encrypt a block's payload in place with the given keys, then append.
    pub fn append_encrypted<P: CryptoProvider + ?Sized>(
        &mut self,
        provider: &P,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block: &mut AudioBlock,
    ) -> Result<(), HimdError> {
        let key = block.key;
        let iv = block.iv;
        provider.encrypt(track_key, fragment_key, &key, &iv, &mut block.audio[..])?;
        self.append(block)
    }

    /// The `(first_block, last_block)` range written, if anything was.
    pub fn finish(self) -> Option<(u16, u16)> {
        if self.blocks_written == 0 {
            None
        }
        else {
            Some((self.first_block, self.first_block + self.blocks_written - 1))
        }
    }
}
