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

    src/codec.rs

    The codec descriptor. Each track slot carries a one-byte codec id and a
    five-byte codec info tuple from which frame size, sample rate, bitrate
    and samples-per-frame are all derived; seeking, duration and block
    sizing depend on this math. Codec id 1 is overloaded: it means ATRAC3+
    unless the low two bits of the first info byte read 0b11, which marks an
    MPEG track.
*/

use std::fmt::{Display, Formatter};

use crate::{HIMD_AUDIO_SIZE, HIMD_BLOCK_SIZE};

pub const CODEC_ID_ATRAC3: u8 = 0x00;
pub const CODEC_ID_ATRAC3PLUS: u8 = 0x01;
pub const CODEC_ID_LPCM: u8 = 0x80;

pub type CodecInfo = [u8; 5];

/// ATRAC sample-rate table, indexed by the top three bits of info byte 1.
const ATRAC_SAMPLE_RATES: [u32; 8] = [32000, 44100, 48000, 88200, 96000, 0, 0, 0];

/// MPEG base sample-rate table, indexed by the top two bits of info byte 4.
const MPEG_SAMPLE_RATES: [u32; 4] = [44100, 48000, 32000, 0];

/// MPEG bitrate tables in kbps, `[table][index]`. Table selection follows
/// the usual header rules: MPEG1 has one table per layer, MPEG2/2.5 share a
/// table for layers II and III. Index 0 ("free") and 15 are reserved.
const MPEG_BITRATES: [[u32; 16]; 5] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, 0],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0],
];

/// Resolved codec of a track, with the id-1 overload already disambiguated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecId {
    Atrac3,
    Atrac3Plus,
    Mpeg,
    Lpcm,
}

impl Display for CodecId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecId::Atrac3 => write!(f, "ATRAC3"),
            CodecId::Atrac3Plus => write!(f, "ATRAC3+"),
            CodecId::Mpeg => write!(f, "MPEG"),
            CodecId::Lpcm => write!(f, "LPCM"),
        }
    }
}

/// True when a codec-id-1 info tuple describes an MPEG track.
pub fn is_mpeg(info: &CodecInfo) -> bool {
    (info[0] & 0b11) == 0b11
}

impl CodecId {
    pub fn resolve(codec_id: u8, info: &CodecInfo) -> Option<CodecId> {
        match codec_id {
            CODEC_ID_ATRAC3 => Some(CodecId::Atrac3),
            CODEC_ID_ATRAC3PLUS if is_mpeg(info) => Some(CodecId::Mpeg),
            CODEC_ID_ATRAC3PLUS => Some(CodecId::Atrac3Plus),
            CODEC_ID_LPCM => Some(CodecId::Lpcm),
            _ => None,
        }
    }

    pub fn to_id_byte(self) -> u8 {
        match self {
            CodecId::Atrac3 => CODEC_ID_ATRAC3,
            CodecId::Atrac3Plus | CodecId::Mpeg => CODEC_ID_ATRAC3PLUS,
            CodecId::Lpcm => CODEC_ID_LPCM,
        }
    }

    pub fn block_type(self) -> [u8; 4] {
        match self {
            CodecId::Atrac3 => crate::block::BLOCK_TYPE_ATRAC3,
            CodecId::Atrac3Plus => crate::block::BLOCK_TYPE_ATRAC3PLUS,
            CodecId::Mpeg => crate::block::BLOCK_TYPE_SMPA,
            CodecId::Lpcm => crate::block::BLOCK_TYPE_LPCM,
        }
    }
}

/// MPEG bitrate in kbps, 0 for the reserved index values.
pub fn mpeg_bitrate_kbps(info: &CodecInfo) -> u32 {
    let version = info[3] >> 6;
    let layer = (info[3] >> 4) & 0b11;
    let index = (info[3] & 0x0F) as usize;
    let table = if version == 3 {
        match layer {
            3 => 0, // Layer I
            2 => 1, // Layer II
            1 => 2, // Layer III
            _ => return 0,
        }
    }
    else {
        match layer {
            3 => 3,
            2 | 1 => 4,
            _ => return 0,
        }
    };
    MPEG_BITRATES[table][index]
}

pub fn sample_rate(codec: CodecId, info: &CodecInfo) -> u32 {
    match codec {
        CodecId::Lpcm => 44100,
        CodecId::Atrac3 | CodecId::Atrac3Plus => ATRAC_SAMPLE_RATES[(info[1] >> 5) as usize],
        CodecId::Mpeg => {
            let base = MPEG_SAMPLE_RATES[(info[4] >> 6) as usize];
            base / (4 - (info[3] >> 6)) as u32
        }
    }
}

pub fn samples_per_frame(codec: CodecId, info: &CodecInfo) -> u32 {
    match codec {
        CodecId::Lpcm => 16,
        CodecId::Atrac3 => 1024,
        CodecId::Atrac3Plus => 2048,
        // Layer I frames carry 384 samples, layers II and III 1152.
        CodecId::Mpeg => {
            if (info[3] >> 4) & 0b11 == 3 {
                384
            }
            else {
                1152
            }
        }
    }
}

pub fn bytes_per_frame(codec: CodecId, info: &CodecInfo) -> usize {
    match codec {
        CodecId::Lpcm => 64,
        CodecId::Atrac3 => info[2] as usize * 8,
        CodecId::Atrac3Plus => (((u16::from_be_bytes([info[1], info[2]]) & 0x3FF) as usize) + 1) * 8,
        CodecId::Mpeg => {
            let rate = sample_rate(codec, info);
            if rate == 0 {
                return 0;
            }
            let raw = samples_per_frame(codec, info) as usize * 125 * mpeg_bitrate_kbps(info) as usize / rate as usize;
            // MPEG1 seek math rounds frames down to 4-byte slots.
            let mask = if (info[3] & 0xC0) == 0xC0 { !3usize } else { !0usize };
            raw & mask
        }
    }
}

/// Frames stored per 16 KiB block. Zero signals an MPEG track, whose frame
/// count varies per block.
pub fn frames_per_block(codec: CodecId, info: &CodecInfo) -> u16 {
    match codec {
        CodecId::Mpeg => 0,
        CodecId::Lpcm => (HIMD_AUDIO_SIZE / 64) as u16,
        _ => {
            let bpf = bytes_per_frame(codec, info);
            if bpf == 0 {
                0
            }
            else {
                ((HIMD_BLOCK_SIZE - 0x41) / bpf) as u16
            }
        }
    }
}

/// Build a descriptor for a freshly uploaded ATRAC3, ATRAC3+ or LPCM track.
/// MPEG descriptors come out of the ingest scanner instead.
pub fn generate_codec_info(codec: CodecId, frame_bytes: u16, _channels: u8, sample_rate: u32) -> (u8, CodecInfo) {
    let rate_index = ATRAC_SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .unwrap_or(1) as u8;
    match codec {
        CodecId::Atrac3 => {
            let info = [0, rate_index << 5, (frame_bytes / 8) as u8, 0, 0];
            (CODEC_ID_ATRAC3, info)
        }
        CodecId::Atrac3Plus => {
            let units = (frame_bytes / 8).saturating_sub(1) & 0x3FF;
            let info = [0, (rate_index << 5) | (units >> 8) as u8, (units & 0xFF) as u8, 0, 0];
            (CODEC_ID_ATRAC3PLUS, info)
        }
        _ => (CODEC_ID_LPCM, [0, rate_index << 5, 8, 0, 0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atrac3_frame_size() {
        // LP2-style 132-byte frames at 44.1 kHz.
        let (id, info) = generate_codec_info(CodecId::Atrac3, 132, 2, 44100);
        let codec = CodecId::resolve(id, &info).unwrap();
        assert_eq!(codec, CodecId::Atrac3);
        assert_eq!(bytes_per_frame(codec, &info), 128);
        assert_eq!(sample_rate(codec, &info), 44100);
        assert_eq!(samples_per_frame(codec, &info), 1024);
    }

    #[test]
    fn test_atrac3plus_frame_size() {
        let (id, info) = generate_codec_info(CodecId::Atrac3Plus, 384, 2, 44100);
        let codec = CodecId::resolve(id, &info).unwrap();
        assert_eq!(codec, CodecId::Atrac3Plus);
        assert_eq!(bytes_per_frame(codec, &info), 384);
        assert_eq!(frames_per_block(codec, &info), 42);
    }

    #[test]
    fn test_mpeg_disambiguation() {
        let mpeg_info: CodecInfo = [3, 0, 0x80, 0xD9, 0x00];
        assert_eq!(CodecId::resolve(1, &mpeg_info), Some(CodecId::Mpeg));
        let a3p_info: CodecInfo = [0, 0x21, 0x2F, 0, 0];
        assert_eq!(CodecId::resolve(1, &a3p_info), Some(CodecId::Atrac3Plus));
    }

    #[test]
    fn test_mpeg_derivations() {
        // MPEG1 Layer III, 128 kbps, 44.1 kHz stereo.
        let info: CodecInfo = [3, 0, 0x80, 0xD9, 0x00];
        assert_eq!(mpeg_bitrate_kbps(&info), 128);
        assert_eq!(sample_rate(CodecId::Mpeg, &info), 44100);
        assert_eq!(samples_per_frame(CodecId::Mpeg, &info), 1152);
        // 1152 * 125 * 128 / 44100 = 417, masked down to a 4-byte slot.
        assert_eq!(bytes_per_frame(CodecId::Mpeg, &info), 416);
        assert_eq!(frames_per_block(CodecId::Mpeg, &info), 0);
    }

    #[test]
    fn test_lpcm_constants() {
        let info: CodecInfo = [0, 0x20, 8, 0, 0];
        assert_eq!(bytes_per_frame(CodecId::Lpcm, &info), 64);
        assert_eq!(sample_rate(CodecId::Lpcm, &info), 44100);
        assert_eq!(frames_per_block(CodecId::Lpcm, &info), 255);
    }
}
