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

    src/mp3.rs

    MP3 ingest. The scanner walks MPEG audio frames (skipping a leading
    ID3v2 tag) and the ingester packs raw frames into 16 KiB SMPA blocks,
    XOR-obfuscated with the per-track key. Along the way it aggregates the
    five-byte codec descriptor: first-seen header values, widened when a
    frame disagrees, with a variability bit set per disagreeing field.
*/

use bitflags::bitflags;

use crate::{
    block::{mp3_obfuscate, AudioBlock, BLOCK_TYPE_SMPA, MCODE_DEFAULT},
    codec::CodecInfo,
    HimdError,
    HIMD_AUDIO_SIZE,
};

/// Samples per frame, `[version][layer]` by header code. Layer III halves
/// its frame in MPEG2/2.5.
const SAMPLES_PER_FRAME: [[u32; 4]; 4] = [
    [0, 576, 1152, 384],  // MPEG 2.5
    [0, 0, 0, 0],         // Reserved
    [0, 576, 1152, 384],  // MPEG 2
    [0, 1152, 1152, 384], // MPEG 1
];

/// Bitrate tables in kbps. MPEG1 has one table per layer; MPEG2/2.5 share a
/// table for layers II and III.
const BITRATES_V1_L1: [u32; 16] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0];
const BITRATES_V1_L2: [u32; 16] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0];
const BITRATES_V1_L3: [u32; 16] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0];
const BITRATES_V2_L1: [u32; 16] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, 0];
const BITRATES_V2_L23: [u32; 16] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0];

/// Sample rate table `[version][index]` in Hz.
const SAMPLE_RATES: [[u32; 4]; 4] = [
    [11025, 12000, 8000, 0],  // MPEG 2.5
    [0, 0, 0, 0],             // Reserved
    [22050, 24000, 16000, 0], // MPEG 2
    [44100, 48000, 32000, 0], // MPEG 1
];

bitflags! {
    /// The codec-info variability byte. Bit 7 marks a valid descriptor; the
    /// lower bits record which header fields varied across the stream.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Mp3Flags: u8 {
        const VALID               = 0x80;
        const VERSION_VARIES      = 0x40;
        const LAYER_VARIES        = 0x20;
        const BITRATE_VARIES      = 0x10;
        const SAMPLE_RATE_VARIES  = 0x08;
        const CHANNEL_MODE_VARIES = 0x04;
        const PREEMPHASIS_VARIES  = 0x02;
    }
}

/// One MPEG audio frame as reported by the scanner. Field values are raw
/// header codes.
#[derive(Clone, Copy, Debug)]
pub struct Mp3Frame {
    pub offset: usize,
    pub byte_length: usize,
    pub sample_length: u32,
    pub version: u8,
    pub layer:   u8,
    pub bitrate_index:     u8,
    pub sample_rate_index: u8,
    pub channel_mode: u8,
    pub preemphasis:  u8,
}

fn parse_frame_header(data: &[u8], offset: usize) -> Option<Mp3Frame> {
    let header = data.get(offset..offset + 4)?;
    if header[0] != 0xFF || (header[1] & 0xE0) != 0xE0 {
        return None;
    }
    let version = (header[1] >> 3) & 0b11;
    let layer = (header[1] >> 1) & 0b11;
    let bitrate_index = header[2] >> 4;
    let sample_rate_index = (header[2] >> 2) & 0b11;
    let padding = ((header[2] >> 1) & 1) as usize;
    let channel_mode = header[3] >> 6;
    let preemphasis = header[3] & 0b11;

    if version == 1 || layer == 0 || bitrate_index == 0 || bitrate_index == 15 || sample_rate_index == 3 {
        return None;
    }

    let bitrate = if version == 3 {
        match layer {
            3 => BITRATES_V1_L1[bitrate_index as usize],
            2 => BITRATES_V1_L2[bitrate_index as usize],
            _ => BITRATES_V1_L3[bitrate_index as usize],
        }
    }
    else {
        match layer {
            3 => BITRATES_V2_L1[bitrate_index as usize],
            _ => BITRATES_V2_L23[bitrate_index as usize],
        }
    };
    let sample_rate = SAMPLE_RATES[version as usize][sample_rate_index as usize];
    let sample_length = SAMPLES_PER_FRAME[version as usize][layer as usize];
    if bitrate == 0 || sample_rate == 0 || sample_length == 0 {
        return None;
    }

    let byte_length = if layer == 3 {
        // Layer I counts in 4-byte slots.
        ((12 * bitrate * 1000 / sample_rate) as usize + padding) * 4
    }
    else {
        (sample_length / 8 * bitrate * 1000 / sample_rate) as usize + padding
    };

    Some(Mp3Frame {
        offset,
        byte_length,
        sample_length,
        version,
        layer,
        bitrate_index,
        sample_rate_index,
        channel_mode,
        preemphasis,
    })
}

/// Total size of a leading ID3v2 tag, if one starts the buffer.
fn id3v2_size(data: &[u8]) -> usize {
    if data.len() < 10 || &data[0..3] != b"ID3" {
        return 0;
    }
    // Syncsafe 28-bit size, header excluded.
    let size = ((data[6] as usize & 0x7F) << 21)
        | ((data[7] as usize & 0x7F) << 14)
        | ((data[8] as usize & 0x7F) << 7)
        | (data[9] as usize & 0x7F);
    10 + size
}

/// Scan a complete MP3 buffer into frames. The walk starts at the first
/// sync word after any ID3v2 tag and stops at the first byte that no longer
/// parses as a frame (trailing tags, truncation).
pub fn scan_frames(data: &[u8]) -> Vec<Mp3Frame> {
    let mut frames = Vec::new();
    let mut pos = id3v2_size(data);

    // Seek the initial sync word.
    while pos + 4 <= data.len() && parse_frame_header(data, pos).is_none() {
        pos += 1;
    }

    while let Some(frame) = parse_frame_header(data, pos) {
        if pos + frame.byte_length > data.len() {
            break;
        }
        pos += frame.byte_length;
        frames.push(frame);
    }
    frames
}

pub struct Mp3IngestResult {
    pub blocks: Vec<Box<AudioBlock>>,
    pub codec_info:  CodecInfo,
    pub flags:       Mp3Flags,
    pub frame_count: u32,
    pub total_samples: u64,
    pub sample_rate: u32,
    pub duration_seconds: u16,
}

/// Rank a sample-rate code for widening: index 1 is 48 kHz and counts as
/// highest, 0 is 44.1 kHz, 2 is 32 kHz.
fn sample_rate_rank(index: u8) -> u8 {
    match index {
        1 => 2,
        0 => 1,
        _ => 0,
    }
}

/// Pack a scanned MP3 stream into obfuscated SMPA blocks and derive the
/// aggregated codec descriptor.
pub fn ingest_mp3(data: &[u8], key: &[u8; 4], content_id_lo32: u32) -> Result<Mp3IngestResult, HimdError> {
    let frames = scan_frames(data);
    if frames.is_empty() {
        return Err(HimdError::InvalidEncoding);
    }

    let first = frames[0];
    let mut version = first.version;
    let mut layer = first.layer;
    let mut bitrate = first.bitrate_index;
    let mut sample_rate_index = first.sample_rate_index;
    let channel_mode = first.channel_mode;
    let preemphasis = first.preemphasis;
    let mut flags = Mp3Flags::VALID;

    let mut blocks: Vec<Box<AudioBlock>> = Vec::new();
    let mut bucket: Vec<u8> = Vec::with_capacity(HIMD_AUDIO_SIZE);
    let mut bucket_frames: u16 = 0;
    let mut total_samples: u64 = 0;

    let mut emit = |bucket: &mut Vec<u8>, bucket_frames: &mut u16, blocks: &mut Vec<Box<AudioBlock>>| {
        let mut block = AudioBlock::new(BLOCK_TYPE_SMPA, MCODE_DEFAULT, blocks.len() as u32 + 1, content_id_lo32);
        block.n_frames = *bucket_frames;
        block.len_data = bucket.len() as u16;
        block.audio[..bucket.len()].copy_from_slice(bucket);
        mp3_obfuscate(&mut block.audio[..], key, bucket.len());
        blocks.push(block);
        bucket.clear();
        *bucket_frames = 0;
    };

    for frame in &frames {
        if frame.version != version {
            flags |= Mp3Flags::VERSION_VARIES;
            version = version.min(frame.version);
        }
        if frame.layer != layer {
            flags |= Mp3Flags::LAYER_VARIES;
            layer = layer.min(frame.layer);
        }
        if frame.bitrate_index != bitrate {
            flags |= Mp3Flags::BITRATE_VARIES;
            bitrate = bitrate.max(frame.bitrate_index);
        }
        if frame.sample_rate_index != sample_rate_index {
            flags |= Mp3Flags::SAMPLE_RATE_VARIES;
            if sample_rate_rank(frame.sample_rate_index) < sample_rate_rank(sample_rate_index) {
                sample_rate_index = frame.sample_rate_index;
            }
        }
        if frame.channel_mode != channel_mode {
            flags |= Mp3Flags::CHANNEL_MODE_VARIES;
        }
        if frame.preemphasis != preemphasis {
            flags |= Mp3Flags::PREEMPHASIS_VARIES;
        }

        if bucket.len() + frame.byte_length >= HIMD_AUDIO_SIZE {
            emit(&mut bucket, &mut bucket_frames, &mut blocks);
        }
        bucket.extend_from_slice(&data[frame.offset..frame.offset + frame.byte_length]);
        bucket_frames += 1;
        total_samples += frame.sample_length as u64;
    }
    if !bucket.is_empty() {
        emit(&mut bucket, &mut bucket_frames, &mut blocks);
    }

    let codec_info: CodecInfo = [
        3,
        0,
        flags.bits(),
        (version << 6) | (layer << 4) | bitrate,
        (sample_rate_index << 6) | (channel_mode << 4) | (preemphasis << 2),
    ];
    let sample_rate = SAMPLE_RATES[3][sample_rate_index as usize];
    let duration_seconds = (total_samples / sample_rate as u64) as u16;

    Ok(Mp3IngestResult {
        blocks,
        codec_info,
        flags,
        frame_count: frames.len() as u32,
        total_samples,
        sample_rate,
        duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A syntactically valid MPEG-1 Layer III 128 kbps 44.1 kHz stereo
    /// frame: 417 bytes, no padding.
    pub(crate) fn test_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 417];
        frame[0] = 0xFF;
        frame[1] = 0xFB; // MPEG1, Layer III, no CRC
        frame[2] = 0x90; // 128 kbps, 44.1 kHz, no padding
        frame[3] = 0x00; // stereo, no emphasis
        for (i, b) in frame.iter_mut().enumerate().skip(4) {
            *b = (i % 255) as u8;
        }
        frame
    }

    #[test]
    fn test_scan_single_frame() {
        let data = test_frame();
        let frames = scan_frames(&data);
        assert_eq!(frames.len(), 1);
        let f = frames[0];
        assert_eq!(f.byte_length, 417);
        assert_eq!(f.sample_length, 1152);
        assert_eq!((f.version, f.layer, f.bitrate_index), (3, 1, 9));
        assert_eq!((f.sample_rate_index, f.channel_mode, f.preemphasis), (0, 0, 0));
    }

    #[test]
    fn test_scan_skips_id3v2() {
        let mut data = vec![0u8; 0];
        // 10-byte header + 22 bytes of tag.
        data.extend_from_slice(b"ID3\x04\x00\x00\x00\x00\x00\x16");
        data.extend_from_slice(&[0u8; 22]);
        data.extend_from_slice(&test_frame());
        let frames = scan_frames(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].offset, 32);
    }

    #[test]
    fn test_ingest_single_frame() {
        let data = test_frame();
        let key = [0x12, 0x34, 0x56, 0x78];
        let result = ingest_mp3(&data, &key, 0xCAFE_F00D).unwrap();

        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.flags, Mp3Flags::VALID);
        assert_eq!(result.codec_info, [3, 0, 0x80, 0xD9, 0x00]);
        assert_eq!(result.frame_count, 1);
        assert_eq!(result.total_samples, 1152);
        assert_eq!(result.sample_rate, 44100);
        assert_eq!(result.duration_seconds, 0);

        let block = &result.blocks[0];
        assert_eq!(block.n_frames, 1);
        assert_eq!(block.len_data, 417);
        assert_eq!(block.content_id_lo32, 0xCAFE_F00D);

        // De-obfuscating restores the frame; the unmasked tail was stored
        // clear.
        let mut payload = block.audio[..417].to_vec();
        mp3_obfuscate(&mut payload, &key, 417);
        assert_eq!(payload, data);
    }

    #[test]
    fn test_ingest_duration_truncates() {
        // 58 frames: 66816 samples at 44.1 kHz is 1.515 s, which must store
        // as 1, not round up to 2.
        let frame = test_frame();
        let mut data = Vec::new();
        for _ in 0..58 {
            data.extend_from_slice(&frame);
        }
        let result = ingest_mp3(&data, &[0; 4], 0).unwrap();
        assert_eq!(result.total_samples, 58 * 1152);
        assert_eq!(result.duration_seconds, 1);
    }

    #[test]
    fn test_ingest_buckets_many_frames() {
        // 417-byte frames: 39 fit below 0x3FC0, the 40th spills.
        let frame = test_frame();
        let mut data = Vec::new();
        for _ in 0..45 {
            data.extend_from_slice(&frame);
        }
        let result = ingest_mp3(&data, &[0; 4], 0).unwrap();
        assert_eq!(result.blocks.len(), 2);
        assert_eq!(result.blocks[0].n_frames, 39);
        assert_eq!(result.blocks[1].n_frames, 6);
        assert_eq!(result.blocks[0].serial, 1);
        assert_eq!(result.blocks[1].serial, 2);
        assert_eq!(result.frame_count, 45);
    }
}
