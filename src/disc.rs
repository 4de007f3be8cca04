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

    src/disc.rs

    The disc handle. `Himd` mounts the three `<NN>`-suffixed files under
    /HMDHIFI, keeps the track index in memory, and composes the object
    store, streams and crypto into the high-level operations: listing,
    renaming, MP3 upload, dumping, deletion with region freeing, generation
    rotation, and flush. Anything that must survive device verification
    additionally goes through a `SecureSession`.
*/

use crate::{
    codec::{self, CodecId},
    crypto::{self, CryptoProvider},
    date_time::DosDateTime,
    mp3,
    secure::generate_content_id,
    storage::{FileRegion, OpenMode, Storage, StorageFile},
    stream::{fragment_chain, AudioFrameReader, BlockReader, BlockWriteStream, Mp3BlockReader},
    tif::{
        Fragment,
        Group,
        HimdStringEncoding,
        StringType,
        TrackEntry,
        TrackIndex,
        FRAGMENT_TYPE_AUDIO,
        GROUP_FLAG_LIVE,
    },
    util::be32,
    HimdError,
    HIMD_BLOCK_SIZE,
    HIMD_DIR,
    HIMD_EKB_VERSION,
    HIMD_TIF_SIZE,
};

/// Offsets within the MCLIST file shared with the secure session.
pub(crate) const MCLIST_OFS_HEAD_KEY: usize = 0x10;
pub(crate) const MCLIST_OFS_GENERATION: usize = 0x20;
pub(crate) const MCLIST_OFS_EKB_ID: usize = 0x38;
pub(crate) const MCLIST_OFS_DISC_ID: usize = 0x40;
pub(crate) const MCLIST_OFS_BODY_KEY: usize = 0x60;
pub(crate) const MCLIST_OFS_MACS: usize = 0x70;
pub(crate) const MCLIST_HEAD_SIZE: usize = 0x70;
pub(crate) const MCLIST_MACS_SIZE: usize = 4000 * 8;

#[derive(Clone, Debug)]
pub struct TrackInfo {
    pub index: u16,
    pub slot:  u16,
    pub title:  Option<String>,
    pub artist: Option<String>,
    pub album:  Option<String>,
    pub title_encoding: Option<HimdStringEncoding>,
    pub codec: Option<CodecId>,
    pub seconds: u16,
}

/// Caller-supplied metadata for a new track.
#[derive(Clone, Debug, Default)]
pub struct TrackMetadata {
    pub title:  Option<String>,
    pub artist: Option<String>,
    pub album:  Option<String>,
    pub track_in_album: u8,
    pub recording_time: DosDateTime,
}

/// A dumped track, ready to be written out as a file.
pub struct TrackDump {
    pub codec: CodecId,
    pub extension: &'static str,
    pub data: Vec<u8>,
}

pub struct Himd<S: Storage> {
    storage: S,
    tif: TrackIndex,
    disc_id: [u8; 16],
    generation: u32,
    datanum: u8,
    hjs_counter: u32,
}

impl<S: Storage> Himd<S> {
    /// Mount a disc: locate exactly one `atdata<NN>.hma`, load the TRKIDX
    /// image of the same generation, and read the disc id off the MCLIST.
    pub fn open(storage: S) -> Result<Self, HimdError> {
        let mut himd = Self {
            storage,
            tif: TrackIndex::blank(),
            disc_id: [0u8; 16],
            generation: 0,
            datanum: 0,
            hjs_counter: 0,
        };
        himd.reload()?;
        Ok(himd)
    }

    /// Format a blank disc in the given storage and mount it. A real disc
    /// gets its maclist keys from the recorder; a freshly formatted one gets
    /// random key ciphers, which decrypt to stable (if arbitrary) keys.
    pub fn format(mut storage: S) -> Result<Self, HimdError> {
        let tif = TrackIndex::blank();
        {
            let mut file = storage.open(&format!("{HIMD_DIR}/TRKIDX00.HMA"), OpenMode::ReadWrite)?;
            file.write_all(tif.image())?;
        }
        {
            let mut file = storage.open(&format!("{HIMD_DIR}/ATDATA00.HMA"), OpenMode::ReadWrite)?;
            file.write_all(&[])?;
        }
        {
            let mut mclist = vec![0u8; MCLIST_HEAD_SIZE + MCLIST_MACS_SIZE];
            let head_key_cipher = rand::random::<[u8; 16]>();
            let body_key_cipher = rand::random::<[u8; 16]>();
            let disc_id = rand::random::<[u8; 16]>();
            mclist[MCLIST_OFS_HEAD_KEY..MCLIST_OFS_HEAD_KEY + 16].copy_from_slice(&head_key_cipher);
            mclist[MCLIST_OFS_EKB_ID..MCLIST_OFS_EKB_ID + 4].copy_from_slice(&HIMD_EKB_VERSION.to_be_bytes());
            mclist[MCLIST_OFS_DISC_ID..MCLIST_OFS_DISC_ID + 16].copy_from_slice(&disc_id);
            mclist[MCLIST_OFS_BODY_KEY..MCLIST_OFS_BODY_KEY + 16].copy_from_slice(&body_key_cipher);
            let mut file = storage.open(&format!("{HIMD_DIR}/MCLIST00.HMA"), OpenMode::ReadWrite)?;
            file.write_all(&mclist)?;
        }
        Self::open(storage)
    }

    /// Re-run the boot contract against the current storage contents.
    pub fn reload(&mut self) -> Result<(), HimdError> {
        let listing = self.storage.list(HIMD_DIR).map_err(|_e| HimdError::NoTrackIndex)?;

        let mut atdata: Vec<u8> = Vec::new();
        let mut hjs_max: u32 = 0;
        for name in &listing {
            let upper = name.to_ascii_uppercase();
            if let Some(num) = parse_generation_suffix(&upper, "ATDATA") {
                atdata.push(num);
            }
            if let Some(stem) = upper.strip_suffix(".HJS") {
                if let Ok(num) = stem.parse::<u32>() {
                    hjs_max = hjs_max.max(num + 1);
                }
            }
        }
        self.hjs_counter = hjs_max;

        atdata.sort_unstable();
        let datanum = match atdata.as_slice() {
            [] => return Err(HimdError::NoTrackIndex),
            [single] => *single,
            many => {
                log::warn!(
                    "reload(): {} atdata generations present, selecting highest",
                    many.len()
                );
                *many.last().unwrap()
            }
        };
        self.datanum = datanum;

        let trkidx_path = self.file_path("TRKIDX");
        let image = {
            let mut file = self
                .storage
                .open(&trkidx_path, OpenMode::Read)
                .map_err(|_e| HimdError::NoTrackIndex)?;
            if file.length()? != HIMD_TIF_SIZE as u64 {
                return Err(HimdError::InvalidTrackIndex);
            }
            file.read_all()?
        };
        self.tif = TrackIndex::from_image(image)?;

        let mclist_path = self.file_path("MCLIST");
        let mut mclist = self
            .storage
            .open(&mclist_path, OpenMode::Read)
            .map_err(|_e| HimdError::NoTrackIndex)?;
        mclist.seek(MCLIST_OFS_GENERATION as u64)?;
        let mut word = [0u8; 4];
        mclist.read_exact(&mut word)?;
        self.generation = u32::from_be_bytes(word);
        mclist.seek(MCLIST_OFS_DISC_ID as u64)?;
        mclist.read_exact(&mut self.disc_id)?;

        log::debug!(
            "reload(): generation {} (datanum {:02X}), {} tracks",
            self.generation,
            self.datanum,
            self.tif.track_count()
        );
        Ok(())
    }

    pub(crate) fn file_path(&self, base: &str) -> String {
        format!("{}/{}{:02X}.HMA", HIMD_DIR, base, self.datanum)
    }

    pub fn tif(&self) -> &TrackIndex {
        &self.tif
    }

    pub fn tif_mut(&mut self) -> &mut TrackIndex {
        &mut self.tif
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn disc_id(&self) -> [u8; 16] {
        self.disc_id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub(crate) fn open_himd_file(&mut self, base: &str, mode: OpenMode) -> Result<Box<dyn StorageFile>, HimdError> {
        let path = self.file_path(base);
        Ok(self.storage.open(&path, mode)?)
    }

    // --- Listing ----------------------------------------------------------

    pub fn track_count(&self) -> u16 {
        self.tif.track_count()
    }

    pub fn track_info(&self, index: u16) -> Result<TrackInfo, HimdError> {
        let slot = self.tif.track_at(index);
        let entry = self.tif.track(slot);

        let read_string = |root: u16| -> Option<(String, HimdStringEncoding)> {
            if root == 0 {
                return None;
            }
            self.tif.string_with_encoding(root).ok()
        };
        let title = read_string(entry.title_index);
        Ok(TrackInfo {
            index,
            slot,
            title_encoding: title.as_ref().map(|(_, e)| *e),
            title: title.map(|(s, _)| s),
            artist: read_string(entry.artist_index).map(|(s, _)| s),
            album: read_string(entry.album_index).map(|(s, _)| s),
            codec: CodecId::resolve(entry.codec_id, &entry.codec_info),
            seconds: entry.seconds,
        })
    }

    pub fn tracks(&self) -> Result<Vec<TrackInfo>, HimdError> {
        (0..self.track_count()).map(|i| self.track_info(i)).collect()
    }

    // --- Titles -----------------------------------------------------------

    /// Set or clear the disc title, held by group record 0.
    pub fn rename_disc(&mut self, title: Option<&str>) -> Result<(), HimdError> {
        let group0 = self.tif.group(0);
        if group0.title_index != 0 {
            self.tif.remove_string(group0.title_index);
        }
        let group = match title {
            Some(text) => {
                let title_index = self.tif.add_string(text, StringType::Group)?;
                Group {
                    title_index,
                    flags: GROUP_FLAG_LIVE,
                    ..Group::default()
                }
            }
            None => Group::default(),
        };
        self.tif.write_group(0, &group);
        Ok(())
    }

    pub fn disc_title(&self) -> Option<String> {
        let group0 = self.tif.group(0);
        if group0.title_index == 0 {
            return None;
        }
        self.tif.string(group0.title_index).ok()
    }

    /// Replace a track's title string.
    pub fn rename_track(&mut self, index: u16, title: Option<&str>) -> Result<(), HimdError> {
        let slot = self.tif.track_at(index);
        let mut entry = self.tif.track(slot);
        if entry.title_index != 0 {
            self.tif.remove_string(entry.title_index);
            entry.title_index = 0;
        }
        if let Some(text) = title {
            entry.title_index = self.tif.add_string(text, StringType::Title)?;
        }
        self.tif.write_track(slot, &entry);
        Ok(())
    }

    /// Add the three metadata strings of a new track, releasing any that
    /// were added if a later one fails.
    pub(crate) fn add_track_strings(&mut self, meta: &TrackMetadata) -> Result<(u16, u16, u16), HimdError> {
        let mut added: Vec<u16> = Vec::new();
        let fields = [
            (&meta.title, StringType::Title),
            (&meta.artist, StringType::Artist),
            (&meta.album, StringType::Album),
        ];
        for (text, string_type) in fields {
            let Some(text) = text else {
                added.push(0);
                continue;
            };
            match self.tif.add_string(text, string_type) {
                Ok(root) => added.push(root),
                Err(e) => {
                    for root in added {
                        if root != 0 {
                            self.tif.remove_string(root);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok((added[0], added[1], added[2]))
    }

    // --- MP3 upload -------------------------------------------------------

    /// Upload an MP3 stream as a new track at the end of the ordering.
    /// MP3 tracks carry no DES protection; the next signed session picks
    /// the track up when it re-signs the maclist.
    pub fn upload_mp3(&mut self, data: &[u8], meta: &TrackMetadata) -> Result<u16, HimdError> {
        let slot_hint = self.tif.next_free_track_slot();
        if slot_hint == 0 {
            return Err(HimdError::OutOfTrackSlots);
        }

        // The obfuscation key is bound to the track number the slot will get.
        let key = crypto::mp3_encryption_key(&self.disc_id, slot_hint);
        let content_id = generate_content_id();
        let ingest = mp3::ingest_mp3(data, &key, be32(&content_id[16..20]))?;

        let last_frames = ingest.blocks.last().map(|b| b.n_frames).unwrap_or(0);
        if last_frames > u8::MAX as u16 {
            return Err(HimdError::FrameOutOfRange);
        }

        let range = {
            let mut file = self.open_himd_file("ATDATA", OpenMode::ReadWrite)?;
            let mut writer = BlockWriteStream::new(file.as_mut())?;
            for block in &ingest.blocks {
                writer.append(block)?;
            }
            writer.finish()
        };
        let Some((first_block, last_block)) = range else {
            return Err(HimdError::InvalidEncoding);
        };

        let fragment = Fragment {
            key: [0u8; 8],
            first_block,
            last_block,
            first_frame: 0,
            // MPEG fragments store the last frame one past the end.
            last_frame: last_frames as u8,
            fragment_type: FRAGMENT_TYPE_AUDIO,
            next_fragment: 0,
        };
        let first_fragment = self.tif.add_fragment(&fragment)?;

        let (title_index, artist_index, album_index) = match self.add_track_strings(meta) {
            Ok(indices) => indices,
            Err(e) => {
                self.tif.remove_fragment(first_fragment);
                return Err(e);
            }
        };

        let entry = TrackEntry {
            recording_time: meta.recording_time,
            ekb_number: 0,
            title_index,
            artist_index,
            album_index,
            track_in_album: meta.track_in_album,
            key: [0u8; 8],
            mac: [0u8; 8],
            codec_id: codec::CODEC_ID_ATRAC3PLUS,
            codec_info: ingest.codec_info,
            first_fragment,
            track_number: 0,
            seconds: ingest.duration_seconds,
            lt: 1,
            dest: 0,
            xcc: 1,
            ct: 0,
            cc: 0,
            cn: 0,
            content_id,
            license_start: DosDateTime::unpack(0, 0),
            license_end: DosDateTime::unpack(0, 0),
        };
        let slot = self.tif.add_track(&entry)?;
        debug_assert_eq!(slot, slot_hint);
        let index = self.tif.append_to_ordering(slot);

        log::debug!(
            "upload_mp3(): {} frames in {} blocks as track {} (slot {})",
            ingest.frame_count,
            ingest.blocks.len(),
            index,
            slot
        );
        self.flush()?;
        Ok(index)
    }

    // --- Dumping ----------------------------------------------------------

    /// Read a track back out of the container into an emittable file body.
    /// For MP3, `id3` is an optional pre-rendered tag block to prepend.
    pub fn dump_track<P: CryptoProvider + ?Sized>(
        &mut self,
        index: u16,
        provider: &P,
        id3: Option<&[u8]>,
    ) -> Result<TrackDump, HimdError> {
        let slot = self.tif.track_at(index);
        let entry = self.tif.track(slot);
        let codec = CodecId::resolve(entry.codec_id, &entry.codec_info).ok_or(HimdError::InvalidTrackIndex)?;
        let chain = fragment_chain(&self.tif, entry.first_fragment)?;

        match codec {
            CodecId::Mpeg => {
                let key = crypto::mp3_encryption_key(&self.disc_id, entry.track_number);
                let atdata_path = self.file_path("ATDATA");
                let mut file = self.storage.open(&atdata_path, OpenMode::Read)?;
                let reader = BlockReader::new(file.as_mut(), chain, true, 0);
                let mut data = id3.map(<[u8]>::to_vec).unwrap_or_default();
                for payload in Mp3BlockReader::new(reader, key) {
                    data.extend_from_slice(&payload?);
                }
                Ok(TrackDump {
                    codec,
                    extension: "mp3",
                    data,
                })
            }
            CodecId::Lpcm => {
                let mut pcm = Vec::new();
                self.read_decrypted(&entry, codec, chain, provider, &mut pcm)?;
                crate::container::swap_pcm_bytes(&mut pcm);
                Ok(TrackDump {
                    codec,
                    extension: "wav",
                    data: crate::container::make_wav(&pcm),
                })
            }
            CodecId::Atrac3 | CodecId::Atrac3Plus => {
                let mut data = crate::container::ea3_header(entry.codec_id, &entry.codec_info).to_vec();
                self.read_decrypted(&entry, codec, chain, provider, &mut data)?;
                Ok(TrackDump {
                    codec,
                    extension: "oma",
                    data,
                })
            }
        }
    }

    fn read_decrypted<P: CryptoProvider + ?Sized>(
        &mut self,
        entry: &TrackEntry,
        codec: CodecId,
        chain: Vec<(u16, Fragment)>,
        provider: &P,
        out: &mut Vec<u8>,
    ) -> Result<(), HimdError> {
        let track_key = crypto::create_track_key(entry.ekb_number, &entry.key)?;
        let frame_size = codec::bytes_per_frame(codec, &entry.codec_info);
        let frames_per_block = codec::frames_per_block(codec, &entry.codec_info);

        let atdata_path = self.file_path("ATDATA");
        let mut file = self.storage.open(&atdata_path, OpenMode::Read)?;
        let reader = BlockReader::new(file.as_mut(), chain, false, frames_per_block);
        for run in AudioFrameReader::new(reader, provider, track_key, frame_size) {
            out.extend_from_slice(&run?);
        }
        Ok(())
    }

    // --- Deletion ---------------------------------------------------------

    /// Delete tracks by index, freeing their ATDATA regions and renumbering
    /// the surviving fragments. The maclist MUST be re-signed through a
    /// secure session afterwards or the disc will fail device verification.
    pub fn delete_tracks(&mut self, indices: &[u16]) -> Result<(), HimdError> {
        let mut indices: Vec<u16> = indices.to_vec();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();

        let mut freed: Vec<(u16, u16)> = Vec::new();
        for &index in &indices {
            let slot = self.tif.track_at(index);
            let entry = self.tif.track(slot);
            let chain = fragment_chain(&self.tif, entry.first_fragment)?;

            for (frag_idx, fragment) in &chain {
                // Round each run out to cluster alignment: even start, even
                // length.
                let start = fragment.first_block & !1;
                let len = (fragment.block_count() + (fragment.first_block & 1) + 1) & !1;
                freed.push((start, len));
                self.tif.remove_fragment(*frag_idx);
            }
            for root in [entry.title_index, entry.artist_index, entry.album_index] {
                if root != 0 {
                    self.tif.remove_string(root);
                }
            }
            self.tif.remove_track(slot);
            self.tif.remove_from_ordering(index);
        }

        freed.sort_unstable();

        // Shift every surviving fragment past a freed region down.
        for index in 0..self.tif.track_count() {
            let slot = self.tif.track_at(index);
            let first_fragment = self.tif.track(slot).first_fragment;
            for (frag_idx, mut fragment) in fragment_chain(&self.tif, first_fragment)? {
                let shift: u16 = freed
                    .iter()
                    .filter(|(start, _)| *start < fragment.first_block)
                    .map(|(_, len)| len)
                    .sum();
                if shift > 0 {
                    fragment.first_block -= shift;
                    fragment.last_block -= shift;
                    self.tif.write_fragment(frag_idx, &fragment);
                }
            }
        }

        let regions: Vec<FileRegion> = freed
            .iter()
            .map(|(start, len)| FileRegion {
                offset: *start as u64 * HIMD_BLOCK_SIZE as u64,
                len:    *len as u64 * HIMD_BLOCK_SIZE as u64,
            })
            .collect();
        let atdata_path = self.file_path("ATDATA");
        self.storage.free_file_regions(&atdata_path, &regions)?;

        log::debug!(
            "delete_tracks(): removed {} tracks, freed {} regions",
            indices.len(),
            regions.len()
        );
        self.flush()
    }

    // --- Generation rotation ---------------------------------------------

    /// Rotate all three files to a new generation. Conflicting files at the
    /// target suffix are evicted to numbered `.HJS` names first.
    pub fn advance_generation(&mut self, new_generation: u32) -> Result<(), HimdError> {
        let new_datanum = (new_generation % 16) as u8;
        if new_datanum != self.datanum {
            for base in ["ATDATA", "MCLIST", "TRKIDX"] {
                let target = format!("{}/{}{:02X}.HMA", HIMD_DIR, base, new_datanum);
                if self.storage.exists(&target) {
                    let eviction = format!("{}/{:08}.HJS", HIMD_DIR, self.hjs_counter);
                    self.hjs_counter += 1;
                    log::debug!("advance_generation(): evicting {} -> {}", target, eviction);
                    self.storage.rename(&target, &eviction)?;
                }
                let current = format!("{}/{}{:02X}.HMA", HIMD_DIR, base, self.datanum);
                self.storage.rename(&current, &target)?;
            }
            self.datanum = new_datanum;
        }
        self.generation = new_generation;
        Ok(())
    }

    // --- Flush ------------------------------------------------------------

    /// Rewrite the TRKIDX image if it is dirty.
    pub fn flush(&mut self) -> Result<(), HimdError> {
        if !self.tif.is_dirty() {
            return Ok(());
        }
        let path = self.file_path("TRKIDX");
        let mut file = self.storage.open(&path, OpenMode::ReadWrite)?;
        file.seek(0)?;
        file.write_all(self.tif.image())?;
        self.tif.mark_clean();
        log::debug!("flush(): rewrote {}", path);
        Ok(())
    }
}

/// Parse `<BASE><NN>.HMA` into its generation suffix.
fn parse_generation_suffix(upper_name: &str, base: &str) -> Option<u8> {
    let stem = upper_name.strip_prefix(base)?.strip_suffix(".HMA")?;
    if stem.len() != 2 {
        return None;
    }
    u8::from_str_radix(stem, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generation_suffix() {
        assert_eq!(parse_generation_suffix("ATDATA01.HMA", "ATDATA"), Some(1));
        assert_eq!(parse_generation_suffix("ATDATA0E.HMA", "ATDATA"), Some(14));
        assert_eq!(parse_generation_suffix("ATDATA.HMA", "ATDATA"), None);
        assert_eq!(parse_generation_suffix("MCLIST01.HMA", "ATDATA"), None);
    }
}
