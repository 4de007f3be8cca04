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

    src/tif/group.rs

    Group records: eight bytes each, starting at 0x2100. Record 0 belongs to
    the disc title and carries only a title string index; records 1..N are
    user groups over contiguous, non-overlapping ranges of the track
    ordering, stored with a one-based start and exclusive end, and the list
    ends at the first all-zero record.
*/

use crate::{
    tif::{TrackIndex, OFS_GROUPS, OFS_TRACKS},
    util::{be16, put_be16},
    HimdError,
};

pub const GROUP_RECORD_SIZE: usize = 8;
pub const GROUP_FLAG_LIVE: u8 = 0x10;

const MAX_GROUPS: u16 = ((OFS_TRACKS - OFS_GROUPS) / GROUP_RECORD_SIZE) as u16;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Group {
    /// One-based first track index; zero in the disc-title record.
    pub start_plus_one: u16,
    /// Exclusive end track index.
    pub end_track:   u16,
    pub title_index: u16,
    pub flags:       u8,
}

impl Group {
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            start_plus_one: be16(&buf[0..]),
            end_track: be16(&buf[2..]),
            title_index: be16(&buf[4..]),
            flags: buf[6],
        }
    }

    pub fn to_bytes(&self) -> [u8; GROUP_RECORD_SIZE] {
        let mut buf = [0u8; GROUP_RECORD_SIZE];
        put_be16(&mut buf[0..], self.start_plus_one);
        put_be16(&mut buf[2..], self.end_track);
        put_be16(&mut buf[4..], self.title_index);
        buf[6] = self.flags;
        buf
    }

    /// Zero-based inclusive start.
    pub fn start_track(&self) -> u16 {
        self.start_plus_one.saturating_sub(1)
    }

    /// An all-zero record terminates the group list.
    pub fn is_terminator(&self) -> bool {
        self.start_plus_one == 0 && self.end_track == 0 && self.title_index == 0 && self.flags == 0
    }
}

impl TrackIndex {
    fn group_offset(idx: u16) -> usize {
        debug_assert!(idx < MAX_GROUPS);
        OFS_GROUPS + idx as usize * GROUP_RECORD_SIZE
    }

    pub fn group(&self, idx: u16) -> Group {
        let offset = Self::group_offset(idx);
        Group::from_bytes(&self.image()[offset..offset + GROUP_RECORD_SIZE])
    }

    pub fn write_group(&mut self, idx: u16, group: &Group) {
        let offset = Self::group_offset(idx);
        self.image_mut()[offset..offset + GROUP_RECORD_SIZE].copy_from_slice(&group.to_bytes());
        self.mark_dirty();
    }

    /// Number of live user groups (record 0 excluded).
    pub fn group_count(&self) -> u16 {
        let mut count = 0;
        for idx in 1..MAX_GROUPS {
            if self.group(idx).is_terminator() {
                break;
            }
            count += 1;
        }
        count
    }

    /// Check the §"groups" invariants: every user group within the track
    /// count and pairwise non-overlapping.
    pub fn validate_groups(&self) -> Result<(), HimdError> {
        let track_count = self.track_count();
        let count = self.group_count();
        let mut ranges: Vec<(u16, u16)> = Vec::with_capacity(count as usize);
        for idx in 1..=count {
            let group = self.group(idx);
            let start = group.start_track();
            if group.start_plus_one == 0 || start >= group.end_track || group.end_track > track_count {
                return Err(HimdError::InvalidTrackIndex);
            }
            ranges.push((start, group.end_track));
        }
        ranges.sort();
        for pair in ranges.windows(2) {
            if pair[1].0 < pair[0].1 {
                return Err(HimdError::InvalidTrackIndex);
            }
        }
        Ok(())
    }
}
