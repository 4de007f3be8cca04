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

    src/block.rs

    The 16 KiB ATDATA audio block. A block carries up to 0x3FC0 payload bytes
    between a big-endian header and a trailer that duplicates the type, mode
    code and serial; real players cross-check the duplicates after a torn
    write. For DES-protected codecs the payload is CBC ciphertext under the
    block's own key and IV; for MP3 it is XOR-obfuscated instead.
*/

use binrw::{binrw, BinRead, BinWrite};

use crate::{HimdError, HIMD_AUDIO_SIZE, HIMD_BLOCK_SIZE};

pub const BLOCK_TYPE_SMPA: [u8; 4] = *b"SMPA";
pub const BLOCK_TYPE_ATRAC3: [u8; 4] = *b"A3D ";
pub const BLOCK_TYPE_ATRAC3PLUS: [u8; 4] = *b"ATX ";
pub const BLOCK_TYPE_LPCM: [u8; 4] = *b"LPCM";

/// Mode code for every codec except LPCM.
pub const MCODE_DEFAULT: u16 = 3;
/// Mode code for LPCM blocks.
pub const MCODE_LPCM: u16 = 0x0124;

#[derive(Clone)]
#[binrw]
#[brw(big)]
pub struct AudioBlock {
    pub block_type: [u8; 4],
    pub n_frames:   u16,
    pub m_code:     u16,
    pub len_data:   u16,
    #[brw(pad_before = 2)]
    pub serial: u32,
    pub key: [u8; 8],
    pub iv:  [u8; 8],
    pub audio: [u8; HIMD_AUDIO_SIZE],
    #[brw(pad_before = 48)]
    pub backup_type: [u8; 4],
    #[brw(pad_before = 2)]
    pub backup_m_code: u16,
    pub content_id_lo32: u32,
    pub backup_serial:   u32,
}

impl AudioBlock {
    pub fn new(block_type: [u8; 4], m_code: u16, serial: u32, content_id_lo32: u32) -> Box<Self> {
        Box::new(Self {
            block_type,
            n_frames: 0,
            m_code,
            len_data: 0,
            serial,
            key: [0u8; 8],
            iv: [0u8; 8],
            audio: [0u8; HIMD_AUDIO_SIZE],
            backup_type: block_type,
            backup_m_code: m_code,
            content_id_lo32,
            backup_serial: serial,
        })
    }

    pub fn parse(raw: &[u8]) -> Result<Box<Self>, HimdError> {
        if raw.len() != HIMD_BLOCK_SIZE {
            return Err(HimdError::BlockDataTooLarge);
        }
        let mut cursor = binrw::io::Cursor::new(raw);
        let block = Self::read(&mut cursor).map_err(|_e| HimdError::BlockDataTooLarge)?;
        Ok(Box::new(block))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cursor = binrw::io::Cursor::new(Vec::with_capacity(HIMD_BLOCK_SIZE));
        // Writing a fixed-layout struct to a Vec cannot fail.
        self.write(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        debug_assert_eq!(bytes.len(), HIMD_BLOCK_SIZE);
        bytes
    }

    pub fn is_mpeg(&self) -> bool {
        self.block_type == BLOCK_TYPE_SMPA
    }
}

/// XOR-(de)obfuscate an MP3 payload in place. The transform covers only the
/// leading whole multiple of eight bytes of `len`; the tail stays clear.
/// Involutive, so the same call encrypts and decrypts.
pub fn mp3_obfuscate(data: &mut [u8], key: &[u8; 4], len: usize) {
    let masked = len & !7;
    for (i, b) in data[..masked].iter_mut().enumerate() {
        *b ^= key[i & 3];
    }
}
