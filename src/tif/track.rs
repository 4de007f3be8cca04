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

    src/tif/track.rs

    The 0x50-byte track slot record. A live track has a nonzero first
    fragment and a track number equal to its own slot index; free slots
    thread the freelist through the track number field and are otherwise
    all-zero, since players choke on residual bytes in freed slots.

    The DRM MAC covers bytes 0x28..0x50 of the serialized record: duration,
    licence bytes, content id and licence window.
*/

use crate::{
    codec::CodecInfo,
    date_time::DosDateTime,
    util::{be16, be32, put_be16, put_be32},
};

pub const TRACK_SLOT_SIZE: usize = 0x50;

/// Byte range of the serialized record covered by the track MAC.
pub const TRACK_MAC_RANGE: std::ops::Range<usize> = 0x28..0x50;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackEntry {
    pub recording_time: DosDateTime,
    pub ekb_number:     u32,
    pub title_index:    u16,
    pub artist_index:   u16,
    pub album_index:    u16,
    pub track_in_album: u8,
    /// The track key in its EKB-wrapped (kek) form.
    pub key: [u8; 8],
    pub mac: [u8; 8],
    pub codec_id:   u8,
    pub codec_info: CodecInfo,
    pub first_fragment: u16,
    pub track_number:   u16,
    pub seconds: u16,
    pub lt:   u8,
    pub dest: u8,
    pub xcc:  u8,
    pub ct:   u8,
    pub cc:   u8,
    pub cn:   u8,
    pub content_id: [u8; 20],
    pub license_start: DosDateTime,
    pub license_end:   DosDateTime,
}

impl TrackEntry {
    pub fn from_bytes(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= TRACK_SLOT_SIZE);
        let mut key = [0u8; 8];
        key.copy_from_slice(&buf[0x10..0x18]);
        let mut mac = [0u8; 8];
        mac.copy_from_slice(&buf[0x18..0x20]);
        let mut content_id = [0u8; 20];
        content_id.copy_from_slice(&buf[0x34..0x48]);
        Self {
            recording_time: DosDateTime::unpack(be16(&buf[0x00..]), be16(&buf[0x02..])),
            ekb_number: be32(&buf[0x04..]),
            title_index: be16(&buf[0x08..]),
            artist_index: be16(&buf[0x0A..]),
            album_index: be16(&buf[0x0C..]),
            track_in_album: buf[0x0E],
            key,
            mac,
            codec_id: buf[0x20],
            codec_info: [buf[0x21], buf[0x22], buf[0x23], buf[0x2C], buf[0x2D]],
            first_fragment: be16(&buf[0x24..]),
            track_number: be16(&buf[0x26..]),
            seconds: be16(&buf[0x28..]),
            lt: buf[0x2A],
            dest: buf[0x2B],
            xcc: buf[0x2E],
            ct: buf[0x2F],
            cc: buf[0x30],
            cn: buf[0x31],
            content_id,
            license_start: DosDateTime::unpack(be16(&buf[0x48..]), be16(&buf[0x4A..])),
            license_end: DosDateTime::unpack(be16(&buf[0x4C..]), be16(&buf[0x4E..])),
        }
    }

    pub fn to_bytes(&self) -> [u8; TRACK_SLOT_SIZE] {
        let mut buf = [0u8; TRACK_SLOT_SIZE];
        let (date, time) = self.recording_time.pack();
        put_be16(&mut buf[0x00..], date);
        put_be16(&mut buf[0x02..], time);
        put_be32(&mut buf[0x04..], self.ekb_number);
        put_be16(&mut buf[0x08..], self.title_index);
        put_be16(&mut buf[0x0A..], self.artist_index);
        put_be16(&mut buf[0x0C..], self.album_index);
        buf[0x0E] = self.track_in_album;
        buf[0x10..0x18].copy_from_slice(&self.key);
        buf[0x18..0x20].copy_from_slice(&self.mac);
        buf[0x20] = self.codec_id;
        buf[0x21..0x24].copy_from_slice(&self.codec_info[0..3]);
        put_be16(&mut buf[0x24..], self.first_fragment);
        put_be16(&mut buf[0x26..], self.track_number);
        put_be16(&mut buf[0x28..], self.seconds);
        buf[0x2A] = self.lt;
        buf[0x2B] = self.dest;
        buf[0x2C] = self.codec_info[3];
        buf[0x2D] = self.codec_info[4];
        buf[0x2E] = self.xcc;
        buf[0x2F] = self.ct;
        buf[0x30] = self.cc;
        buf[0x31] = self.cn;
        buf[0x34..0x48].copy_from_slice(&self.content_id);
        let (date, time) = self.license_start.pack();
        put_be16(&mut buf[0x48..], date);
        put_be16(&mut buf[0x4A..], time);
        let (date, time) = self.license_end.pack();
        put_be16(&mut buf[0x4C..], date);
        put_be16(&mut buf[0x4E..], time);
        buf
    }

    pub fn is_live(&self, slot: u16) -> bool {
        self.first_fragment != 0 && self.track_number == slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_round_trip() {
        let entry = TrackEntry {
            recording_time: DosDateTime {
                year:   2006,
                month:  3,
                day:    14,
                hour:   15,
                minute: 9,
                second: 26,
            },
            ekb_number: 0x0001_0012,
            title_index: 3,
            artist_index: 4,
            album_index: 5,
            track_in_album: 2,
            key: [0x11; 8],
            mac: [0x22; 8],
            codec_id: 1,
            codec_info: [3, 0, 0x80, 0xD9, 0x00],
            first_fragment: 7,
            track_number: 9,
            seconds: 245,
            lt: 1,
            dest: 0,
            xcc: 1,
            ct: 0,
            cc: 0,
            cn: 0,
            content_id: [0x33; 20],
            license_start: DosDateTime::unpack(0, 0),
            license_end: DosDateTime::unpack(0, 0),
        };
        let bytes = entry.to_bytes();
        assert_eq!(TrackEntry::from_bytes(&bytes), entry);
        // Pinned offsets: codec id, split codec info, fragment and number.
        assert_eq!(bytes[0x20], 1);
        assert_eq!(&bytes[0x21..0x24], &[3, 0, 0x80]);
        assert_eq!(&bytes[0x2C..0x2E], &[0xD9, 0x00]);
        assert_eq!(be16(&bytes[0x24..]), 7);
        assert_eq!(be16(&bytes[0x26..]), 9);
    }

    #[test]
    fn test_free_slot_is_zero() {
        // A default entry zeroed of its epoch date must serialize flat.
        let mut entry = TrackEntry::default();
        entry.recording_time = DosDateTime::unpack(0, 0);
        entry.license_start = DosDateTime::unpack(0, 0);
        entry.license_end = DosDateTime::unpack(0, 0);
        assert_eq!(entry.to_bytes(), [0u8; TRACK_SLOT_SIZE]);
    }
}
