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

    src/tif/strings.rs

    Variable-length strings over 0x10-byte chunks. A root chunk carries a
    type nibble of 0x8 or above and opens with an encoding discriminator
    byte; continuation chunks are type 0x1; free chunks are type 0x0 and
    chain through the same 12-bit link. Encodings are always tried in the
    fixed order Latin-1, Shift-JIS, UTF-16BE and the first that round-trips
    wins; devices refuse mixed content encoded any other way.
*/

use crate::{
    tif::{TrackIndex, OFS_STRINGS, STRING_CHUNKS},
    util::{be16, put_be16},
    HimdError,
};

pub const STRING_CHUNK_SIZE: usize = 0x10;
pub const STRING_CONTENT_SIZE: usize = 14;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StringType {
    Unused = 0x0,
    Continuation = 0x1,
    Title = 0x8,
    Artist = 0x9,
    Album = 0xA,
    Group = 0xB,
}

impl StringType {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(StringType::Unused),
            0x1 => Some(StringType::Continuation),
            0x8 => Some(StringType::Title),
            0x9 => Some(StringType::Artist),
            0xA => Some(StringType::Album),
            0xB => Some(StringType::Group),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HimdStringEncoding {
    Latin1 = 0x05,
    Utf16Be = 0x84,
    ShiftJis = 0x90,
}

impl HimdStringEncoding {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x05 => Some(HimdStringEncoding::Latin1),
            0x84 => Some(HimdStringEncoding::Utf16Be),
            0x90 => Some(HimdStringEncoding::ShiftJis),
            _ => None,
        }
    }
}

/// Encode a string with the first encoding that represents it exactly,
/// in the fixed trial order.
pub fn encode_string(s: &str) -> Result<(HimdStringEncoding, Vec<u8>), HimdError> {
    for encoding in [
        HimdStringEncoding::Latin1,
        HimdStringEncoding::ShiftJis,
        HimdStringEncoding::Utf16Be,
    ] {
        if let Ok(bytes) = encode_string_as(encoding, s) {
            return Ok((encoding, bytes));
        }
    }
    Err(HimdError::Unencodable)
}

/// Encode with one specific encoding, failing unless the result decodes back
/// to the identical string.
pub fn encode_string_as(encoding: HimdStringEncoding, s: &str) -> Result<Vec<u8>, HimdError> {
    match encoding {
        HimdStringEncoding::Latin1 => {
            if s.chars().all(|c| (c as u32) <= 0xFF) {
                Ok(s.chars().map(|c| c as u8).collect())
            }
            else {
                Err(HimdError::Unencodable)
            }
        }
        HimdStringEncoding::ShiftJis => {
            let (bytes, _, had_errors) = encoding_rs::SHIFT_JIS.encode(s);
            if had_errors {
                return Err(HimdError::Unencodable);
            }
            let (round, _, decode_errors) = encoding_rs::SHIFT_JIS.decode(&bytes);
            if decode_errors || round != s {
                return Err(HimdError::Unencodable);
            }
            Ok(bytes.into_owned())
        }
        // UTF-16BE represents any Rust string; encoding_rs has no UTF-16
        // encoder, so pack the code units ourselves.
        HimdStringEncoding::Utf16Be => {
            let mut bytes = Vec::with_capacity(s.len() * 2);
            for unit in s.encode_utf16() {
                bytes.extend_from_slice(&unit.to_be_bytes());
            }
            Ok(bytes)
        }
    }
}

/// Decode a chunk payload (discriminator byte already stripped), trimming
/// the zero padding of the final chunk.
pub fn decode_string(encoding: HimdStringEncoding, payload: &[u8]) -> Result<String, HimdError> {
    match encoding {
        HimdStringEncoding::Latin1 => {
            let trimmed = trim_trailing_zeroes(payload, 1);
            Ok(trimmed.iter().map(|&b| b as char).collect())
        }
        HimdStringEncoding::ShiftJis => {
            let trimmed = trim_trailing_zeroes(payload, 1);
            let (s, _, had_errors) = encoding_rs::SHIFT_JIS.decode(trimmed);
            if had_errors {
                return Err(HimdError::InvalidEncoding);
            }
            Ok(s.into_owned())
        }
        HimdStringEncoding::Utf16Be => {
            let trimmed = trim_trailing_zeroes(payload, 2);
            let (s, _, had_errors) = encoding_rs::UTF_16BE.decode(trimmed);
            if had_errors {
                return Err(HimdError::InvalidEncoding);
            }
            Ok(s.into_owned())
        }
    }
}

fn trim_trailing_zeroes(payload: &[u8], unit: usize) -> &[u8] {
    let mut len = payload.len() - payload.len() % unit;
    while len >= unit && payload[len - unit..len].iter().all(|&b| b == 0) {
        len -= unit;
    }
    &payload[..len]
}

struct StringChunk {
    content: [u8; STRING_CONTENT_SIZE],
    nibble:  u8,
    link:    u16,
}

impl TrackIndex {
    fn string_chunk(&self, idx: u16) -> StringChunk {
        debug_assert!(idx < STRING_CHUNKS);
        let offset = OFS_STRINGS + idx as usize * STRING_CHUNK_SIZE;
        let mut content = [0u8; STRING_CONTENT_SIZE];
        content.copy_from_slice(&self.image()[offset..offset + STRING_CONTENT_SIZE]);
        let word = be16(&self.image()[offset + 0x0E..]);
        StringChunk {
            content,
            nibble: (word >> 12) as u8,
            link: word & 0x0FFF,
        }
    }

    fn write_string_chunk(&mut self, idx: u16, chunk: &StringChunk) {
        let offset = OFS_STRINGS + idx as usize * STRING_CHUNK_SIZE;
        let word = ((chunk.nibble as u16) << 12) | (chunk.link & 0x0FFF);
        let image = self.image_mut();
        image[offset..offset + STRING_CONTENT_SIZE].copy_from_slice(&chunk.content);
        put_be16(&mut image[offset + 0x0E..], word);
        self.mark_dirty();
    }

    /// Type nibble of a string root.
    pub fn string_type(&self, root: u16) -> Option<StringType> {
        StringType::from_nibble(self.string_chunk(root).nibble)
    }

    /// Walk a chain and collect the chunk indices in order.
    fn string_chain(&self, root: u16) -> Result<Vec<u16>, HimdError> {
        let mut indices = Vec::new();
        let mut cursor = root;
        loop {
            if indices.len() > STRING_CHUNKS as usize {
                return Err(HimdError::InvalidTrackIndex);
            }
            indices.push(cursor);
            let link = self.string_chunk(cursor).link;
            if link == 0 {
                return Ok(indices);
            }
            cursor = link;
        }
    }

    pub fn string(&self, root: u16) -> Result<String, HimdError> {
        Ok(self.string_with_encoding(root)?.0)
    }

    pub fn string_with_encoding(&self, root: u16) -> Result<(String, HimdStringEncoding), HimdError> {
        let chunk = self.string_chunk(root);
        if chunk.nibble < 0x8 {
            return Err(HimdError::InvalidEncoding);
        }
        let mut payload = Vec::new();
        for idx in self.string_chain(root)? {
            payload.extend_from_slice(&self.string_chunk(idx).content);
        }
        let encoding = HimdStringEncoding::from_byte(payload[0]).ok_or(HimdError::InvalidEncoding)?;
        let text = decode_string(encoding, &payload[1..])?;
        Ok((text, encoding))
    }

    /// Store a string, consuming as many chunks from the freelist as the
    /// chosen encoding needs. Nothing is mutated on failure.
    pub fn add_string(&mut self, s: &str, string_type: StringType) -> Result<u16, HimdError> {
        let (encoding, encoded) = encode_string(s)?;
        self.add_string_payload(encoding, encoded, string_type)
    }

    /// Store a string in one specific encoding, bypassing the trial order.
    pub fn add_string_with_encoding(
        &mut self,
        s: &str,
        string_type: StringType,
        encoding: HimdStringEncoding,
    ) -> Result<u16, HimdError> {
        let encoded = encode_string_as(encoding, s)?;
        self.add_string_payload(encoding, encoded, string_type)
    }

    fn add_string_payload(
        &mut self,
        encoding: HimdStringEncoding,
        encoded: Vec<u8>,
        string_type: StringType,
    ) -> Result<u16, HimdError> {
        debug_assert!(string_type as u8 >= 0x8);
        let mut payload = Vec::with_capacity(encoded.len() + 1);
        payload.push(encoding as u8);
        payload.extend_from_slice(&encoded);
        let chunks_needed = payload.len().div_ceil(STRING_CONTENT_SIZE);

        // Collect the slots first; a short freelist must not be half-consumed.
        let mut slots = Vec::with_capacity(chunks_needed);
        let mut cursor = self.string_chunk(0).link;
        while slots.len() < chunks_needed {
            if cursor == 0 {
                return Err(HimdError::NotEnoughStringSlots);
            }
            slots.push(cursor);
            cursor = self.string_chunk(cursor).link;
        }

        // New freelist head skips past everything we claimed.
        self.write_string_chunk(
            0,
            &StringChunk {
                content: [0u8; STRING_CONTENT_SIZE],
                nibble:  StringType::Unused as u8,
                link:    cursor,
            },
        );

        for (i, slot) in slots.iter().enumerate() {
            let mut content = [0u8; STRING_CONTENT_SIZE];
            let start = i * STRING_CONTENT_SIZE;
            let end = (start + STRING_CONTENT_SIZE).min(payload.len());
            content[..end - start].copy_from_slice(&payload[start..end]);
            let nibble = if i == 0 {
                string_type as u8
            }
            else {
                StringType::Continuation as u8
            };
            let link = slots.get(i + 1).copied().unwrap_or(0);
            self.write_string_chunk(*slot, &StringChunk { content, nibble, link });
        }
        Ok(slots[0])
    }

    /// Release a chain: zero content, mark unused, splice onto the freelist.
    pub fn remove_string(&mut self, root: u16) {
        let Ok(chain) = self.string_chain(root) else {
            log::warn!("remove_string(): chain at {} is cyclic, leaking it", root);
            return;
        };
        let old_head = self.string_chunk(0).link;
        for (i, idx) in chain.iter().enumerate() {
            let link = chain.get(i + 1).copied().unwrap_or(old_head);
            self.write_string_chunk(
                *idx,
                &StringChunk {
                    content: [0u8; STRING_CONTENT_SIZE],
                    nibble: StringType::Unused as u8,
                    link,
                },
            );
        }
        self.write_string_chunk(
            0,
            &StringChunk {
                content: [0u8; STRING_CONTENT_SIZE],
                nibble:  StringType::Unused as u8,
                link:    chain[0],
            },
        );
    }

    pub fn free_string_chunks(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.string_chunk(0).link;
        while cursor != 0 && count <= STRING_CHUNKS as usize {
            count += 1;
            cursor = self.string_chunk(cursor).link;
        }
        count
    }
}
