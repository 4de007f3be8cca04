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

    src/container.rs

    Emitted container formats: the 96-byte EA3 header fronting `.oma` ATRAC
    dumps, and the RIFF/WAVE header fronting LPCM dumps. Hi-MD stores PCM
    big-endian; WAV wants little-endian, so LPCM dumps are byte-swapped on
    the way out.
*/

use binrw::{binrw, BinWrite};

use crate::codec::CodecInfo;

pub const EA3_HEADER_SIZE: usize = 96;

/// Build the EA3 header for an `.oma` dump. Bytes 32..36 carry the codec id
/// and the first three codec info bytes, which is all a player needs to
/// parameterize the decoder.
pub fn ea3_header(codec_id: u8, codec_info: &CodecInfo) -> [u8; EA3_HEADER_SIZE] {
    let mut header = [0u8; EA3_HEADER_SIZE];
    header[0..8].copy_from_slice(&[0x45, 0x41, 0x33, 0x01, 0x00, 0x60, 0xFF, 0xFF]);
    header[32] = codec_id;
    header[33..36].copy_from_slice(&codec_info[0..3]);
    header
}

/// The canonical 44-byte PCM WAVE header.
#[binrw]
#[brw(little, magic = b"RIFF")]
struct WavHeader {
    riff_size: u32,
    #[brw(magic = b"WAVEfmt ")]
    fmt_size: u32,
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
    #[brw(magic = b"data")]
    data_size: u32,
}

/// Wrap little-endian PCM samples into a complete `.wav` file body.
/// Hi-MD LPCM is fixed 44.1 kHz 16-bit stereo.
pub fn make_wav(pcm_le: &[u8]) -> Vec<u8> {
    let header = WavHeader {
        riff_size: 36 + pcm_le.len() as u32,
        fmt_size: 16,
        audio_format: 1,
        channels: 2,
        sample_rate: 44100,
        byte_rate: 44100 * 4,
        block_align: 4,
        bits_per_sample: 16,
        data_size: pcm_le.len() as u32,
    };
    let mut cursor = binrw::io::Cursor::new(Vec::with_capacity(44 + pcm_le.len()));
    header.write(&mut cursor).unwrap();
    let mut out = cursor.into_inner();
    out.extend_from_slice(pcm_le);
    out
}

/// Swap 16-bit samples between big- and little-endian in place.
pub fn swap_pcm_bytes(pcm: &mut [u8]) {
    for pair in pcm.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
