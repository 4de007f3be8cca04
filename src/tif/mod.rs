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

    src/tif/mod.rs

    The track index ("TIF") object store. The 0x50000-byte TRKIDX image is
    held in memory as an arena: tracks, fragments and string chunks are
    fixed-size slots addressed by index, freelists are threaded through the
    same link field each record uses when live, and every mutation marks the
    image dirty for the next flush. Slot 0 of each table is its freelist
    head and never holds live data.
*/

use crate::{
    util::{be16, put_be16},
    HimdError,
    HIMD_TIF_SIZE,
};

pub mod fragment;
pub mod group;
pub mod strings;
pub mod track;

pub use fragment::{Fragment, FRAGMENT_SLOT_SIZE, FRAGMENT_TYPE_AUDIO, FRAGMENT_TYPE_FREE};
pub use group::{Group, GROUP_FLAG_LIVE};
pub use strings::{HimdStringEncoding, StringType};
pub use track::{TrackEntry, TRACK_MAC_RANGE, TRACK_SLOT_SIZE};

pub const TIF_MAGIC: [u8; 4] = *b"TIF ";

pub(crate) const OFS_TRACK_COUNT: usize = 0x100;
pub(crate) const OFS_ORDERING: usize = 0x102;
pub(crate) const OFS_GROUPS: usize = 0x2100;
pub(crate) const OFS_TRACKS: usize = 0x8000;
pub(crate) const OFS_FRAGMENTS: usize = 0x30000;
pub(crate) const OFS_STRINGS: usize = 0x40000;

pub const TRACK_SLOTS: u16 = 2048;
pub const FRAGMENT_SLOTS: u16 = 4096;
pub const STRING_CHUNKS: u16 = 4096;

pub struct TrackIndex {
    image: Vec<u8>,
    dirty: bool,
}

impl TrackIndex {
    /// Wrap a raw TRKIDX image, verifying magic and length.
    pub fn from_image(image: Vec<u8>) -> Result<Self, HimdError> {
        if image.len() != HIMD_TIF_SIZE || image[0..4] != TIF_MAGIC {
            return Err(HimdError::InvalidTrackIndex);
        }
        Ok(Self { image, dirty: false })
    }

    /// A freshly formatted index: no tracks, no groups, every slot of every
    /// table threaded onto its freelist in ascending order.
    pub fn blank() -> Self {
        let mut image = vec![0u8; HIMD_TIF_SIZE];
        image[0..4].copy_from_slice(&TIF_MAGIC);

        // Track freelist through the track number field at slot offset 0x26.
        for slot in 0..TRACK_SLOTS - 1 {
            let offset = OFS_TRACKS + slot as usize * TRACK_SLOT_SIZE + 0x26;
            put_be16(&mut image[offset..], slot + 1);
        }
        // Fragment and string freelists through their 12-bit links.
        for idx in 0..FRAGMENT_SLOTS - 1 {
            let offset = OFS_FRAGMENTS + idx as usize * FRAGMENT_SLOT_SIZE + 0x0E;
            put_be16(&mut image[offset..], idx + 1);
        }
        for idx in 0..STRING_CHUNKS - 1 {
            let offset = OFS_STRINGS + idx as usize * 0x10 + 0x0E;
            put_be16(&mut image[offset..], idx + 1);
        }
        Self { image, dirty: true }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub(crate) fn image_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // --- Track slots ------------------------------------------------------

    fn track_offset(slot: u16) -> usize {
        debug_assert!(slot < TRACK_SLOTS);
        OFS_TRACKS + slot as usize * TRACK_SLOT_SIZE
    }

    pub fn track(&self, slot: u16) -> TrackEntry {
        TrackEntry::from_bytes(&self.image[Self::track_offset(slot)..])
    }

    pub fn write_track(&mut self, slot: u16, entry: &TrackEntry) {
        let offset = Self::track_offset(slot);
        self.image[offset..offset + TRACK_SLOT_SIZE].copy_from_slice(&entry.to_bytes());
        self.dirty = true;
    }

    /// The track number field alone; doubles as the freelist link.
    fn track_number_field(&self, slot: u16) -> u16 {
        be16(&self.image[Self::track_offset(slot) + 0x26..])
    }

    fn set_track_number_field(&mut self, slot: u16, value: u16) {
        let offset = Self::track_offset(slot) + 0x26;
        put_be16(&mut self.image[offset..], value);
        self.dirty = true;
    }

    /// The slot the next `add_track` will hand out, without popping it.
    /// Zero means the freelist is empty.
    pub fn next_free_track_slot(&self) -> u16 {
        self.track_number_field(0)
    }

    /// Pop a free slot, stamp the entry's own number and store it.
    pub fn add_track(&mut self, entry: &TrackEntry) -> Result<u16, HimdError> {
        let slot = self.track_number_field(0);
        if slot == 0 {
            return Err(HimdError::OutOfTrackSlots);
        }
        let next = self.track_number_field(slot);
        self.set_track_number_field(0, next);

        let mut entry = entry.clone();
        entry.track_number = slot;
        self.write_track(slot, &entry);
        Ok(slot)
    }

    /// Free a slot, returning the first fragment index it pointed at. The
    /// slot is zeroed before relinking; players crash on residual bytes.
    pub fn remove_track(&mut self, slot: u16) -> u16 {
        let first_fragment = self.track(slot).first_fragment;

        let offset = Self::track_offset(slot);
        self.image[offset..offset + TRACK_SLOT_SIZE].fill(0);

        let head = self.track_number_field(0);
        self.set_track_number_field(slot, head);
        self.set_track_number_field(0, slot);
        first_fragment
    }

    pub fn free_track_slots(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.track_number_field(0);
        while cursor != 0 && count <= TRACK_SLOTS as usize {
            count += 1;
            cursor = self.track_number_field(cursor);
        }
        count
    }

    // --- Fragment slots ---------------------------------------------------

    fn fragment_offset(idx: u16) -> usize {
        debug_assert!(idx < FRAGMENT_SLOTS);
        OFS_FRAGMENTS + idx as usize * FRAGMENT_SLOT_SIZE
    }

    pub fn fragment(&self, idx: u16) -> Fragment {
        Fragment::from_bytes(&self.image[Self::fragment_offset(idx)..])
    }

    pub fn write_fragment(&mut self, idx: u16, fragment: &Fragment) {
        let offset = Self::fragment_offset(idx);
        self.image[offset..offset + FRAGMENT_SLOT_SIZE].copy_from_slice(&fragment.to_bytes());
        self.dirty = true;
    }

    pub fn add_fragment(&mut self, fragment: &Fragment) -> Result<u16, HimdError> {
        let head = self.fragment(0);
        let idx = head.next_fragment;
        if idx == 0 {
            return Err(HimdError::OutOfFragmentSlots);
        }
        let next = self.fragment(idx).next_fragment;
        self.write_fragment(
            0,
            &Fragment {
                next_fragment: next,
                ..Fragment::default()
            },
        );
        self.write_fragment(idx, fragment);
        Ok(idx)
    }

    pub fn remove_fragment(&mut self, idx: u16) {
        let head = self.fragment(0).next_fragment;
        self.write_fragment(
            idx,
            &Fragment {
                fragment_type: FRAGMENT_TYPE_FREE,
                next_fragment: head,
                ..Fragment::default()
            },
        );
        self.write_fragment(
            0,
            &Fragment {
                next_fragment: idx,
                ..Fragment::default()
            },
        );
    }

    pub fn free_fragment_slots(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.fragment(0).next_fragment;
        while cursor != 0 && count <= FRAGMENT_SLOTS as usize {
            count += 1;
            cursor = self.fragment(cursor).next_fragment;
        }
        count
    }

    // --- Track ordering ---------------------------------------------------

    pub fn track_count(&self) -> u16 {
        be16(&self.image[OFS_TRACK_COUNT..])
    }

    pub fn set_track_count(&mut self, count: u16) {
        put_be16(&mut self.image[OFS_TRACK_COUNT..], count);
        self.dirty = true;
    }

    /// Slot stored at a position in the ordering array.
    pub fn track_at(&self, index: u16) -> u16 {
        be16(&self.image[OFS_ORDERING + index as usize * 2..])
    }

    pub fn set_track_at(&mut self, index: u16, slot: u16) {
        let offset = OFS_ORDERING + index as usize * 2;
        put_be16(&mut self.image[offset..], slot);
        self.dirty = true;
    }

    /// Append a slot at the end of the ordering, bumping the count. Returns
    /// the new track index.
    pub fn append_to_ordering(&mut self, slot: u16) -> u16 {
        let index = self.track_count();
        self.set_track_at(index, slot);
        self.set_track_count(index + 1);
        index
    }

    /// Remove one position from the ordering, shifting later entries down
    /// and clearing the vacated tail word.
    pub fn remove_from_ordering(&mut self, index: u16) {
        let count = self.track_count();
        debug_assert!(index < count);
        for i in index..count - 1 {
            let slot = self.track_at(i + 1);
            self.set_track_at(i, slot);
        }
        self.set_track_at(count - 1, 0);
        self.set_track_count(count - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_invariants() {
        let tif = TrackIndex::blank();
        assert_eq!(&tif.image()[0..4], b"TIF ");
        assert_eq!(tif.track_count(), 0);
        assert_eq!(tif.free_track_slots(), TRACK_SLOTS as usize - 1);
        assert_eq!(tif.free_fragment_slots(), FRAGMENT_SLOTS as usize - 1);
    }

    #[test]
    fn test_add_track_stamps_slot() {
        let mut tif = TrackIndex::blank();
        let entry = TrackEntry {
            first_fragment: 1,
            ..TrackEntry::default()
        };
        let slot = tif.add_track(&entry).unwrap();
        assert_eq!(slot, 1);
        assert_eq!(tif.track(slot).track_number, slot);
        assert!(tif.track(slot).is_live(slot));

        let second = tif.add_track(&entry).unwrap();
        assert_eq!(second, 2);
    }

    #[test]
    fn test_remove_track_zeroes_and_recycles() {
        let mut tif = TrackIndex::blank();
        let entry = TrackEntry {
            first_fragment: 17,
            key: [0xFF; 8],
            ..TrackEntry::default()
        };
        let slot = tif.add_track(&entry).unwrap();
        let first_fragment = tif.remove_track(slot);
        assert_eq!(first_fragment, 17);

        // Slot bytes must be clear except for the freelist link.
        let offset = OFS_TRACKS + slot as usize * TRACK_SLOT_SIZE;
        let raw = &tif.image()[offset..offset + TRACK_SLOT_SIZE];
        assert!(raw[..0x26].iter().all(|&b| b == 0));
        assert!(raw[0x28..].iter().all(|&b| b == 0));

        // The freed slot is handed out again first.
        assert_eq!(tif.add_track(&entry).unwrap(), slot);
    }

    #[test]
    fn test_fragment_freelist_cycle() {
        let mut tif = TrackIndex::blank();
        let frag = Fragment {
            first_block: 0,
            last_block: 3,
            fragment_type: FRAGMENT_TYPE_AUDIO,
            ..Fragment::default()
        };
        let before = tif.free_fragment_slots();
        let idx = tif.add_fragment(&frag).unwrap();
        assert_eq!(tif.free_fragment_slots(), before - 1);
        tif.remove_fragment(idx);
        assert_eq!(tif.free_fragment_slots(), before);
        assert_eq!(tif.fragment(idx).fragment_type, FRAGMENT_TYPE_FREE);
        assert_eq!(tif.fragment(idx).key, [0u8; 8]);
    }

    #[test]
    fn test_ordering_shift() {
        let mut tif = TrackIndex::blank();
        for slot in [5u16, 9, 13] {
            tif.append_to_ordering(slot);
        }
        tif.remove_from_ordering(0);
        assert_eq!(tif.track_count(), 2);
        assert_eq!(tif.track_at(0), 9);
        assert_eq!(tif.track_at(1), 13);
        assert_eq!(tif.track_at(2), 0);
    }
}
