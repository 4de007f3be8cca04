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

    src/tif/fragment.rs

    The 0x10-byte fragment slot. A fragment names a contiguous run of
    ATDATA blocks and the frame window within its first and last block; a
    track is a forward chain of fragments. The final word packs a type
    nibble over a 12-bit next-fragment link, and the freelist reuses the
    link with a zero type.
*/

use crate::util::{be16, put_be16};

pub const FRAGMENT_SLOT_SIZE: usize = 0x10;

/// Type nibble of a live audio fragment.
pub const FRAGMENT_TYPE_AUDIO: u8 = 0x1;
/// Type nibble of a free fragment slot.
pub const FRAGMENT_TYPE_FREE: u8 = 0x0;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fragment {
    pub key: [u8; 8],
    pub first_block: u16,
    pub last_block:  u16,
    pub first_frame: u8,
    pub last_frame:  u8,
    pub fragment_type: u8,
    pub next_fragment: u16,
}

impl Fragment {
    pub fn from_bytes(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= FRAGMENT_SLOT_SIZE);
        let mut key = [0u8; 8];
        key.copy_from_slice(&buf[0x00..0x08]);
        let link = be16(&buf[0x0E..]);
        Self {
            key,
            first_block: be16(&buf[0x08..]),
            last_block: be16(&buf[0x0A..]),
            first_frame: buf[0x0C],
            last_frame: buf[0x0D],
            fragment_type: (link >> 12) as u8,
            next_fragment: link & 0x0FFF,
        }
    }

    pub fn to_bytes(&self) -> [u8; FRAGMENT_SLOT_SIZE] {
        let mut buf = [0u8; FRAGMENT_SLOT_SIZE];
        buf[0x00..0x08].copy_from_slice(&self.key);
        put_be16(&mut buf[0x08..], self.first_block);
        put_be16(&mut buf[0x0A..], self.last_block);
        buf[0x0C] = self.first_frame;
        buf[0x0D] = self.last_frame;
        put_be16(
            &mut buf[0x0E..],
            ((self.fragment_type as u16) << 12) | (self.next_fragment & 0x0FFF),
        );
        buf
    }

    /// Number of blocks this fragment spans.
    pub fn block_count(&self) -> u16 {
        self.last_block.saturating_sub(self.first_block) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_round_trip() {
        let frag = Fragment {
            key: [0xAB; 8],
            first_block: 12,
            last_block: 37,
            first_frame: 2,
            last_frame: 41,
            fragment_type: FRAGMENT_TYPE_AUDIO,
            next_fragment: 0x123,
        };
        let bytes = frag.to_bytes();
        assert_eq!(Fragment::from_bytes(&bytes), frag);
        // Type nibble packs over the 12-bit link.
        assert_eq!(be16(&bytes[0x0E..]), 0x1123);
    }

    #[test]
    fn test_free_fragment_is_zero() {
        assert_eq!(Fragment::default().to_bytes(), [0u8; FRAGMENT_SLOT_SIZE]);
    }
}
