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

    src/secure/mod.rs

    The secure session. All DES-protected uploads and any deletion that must
    survive device verification go through here: the host/device
    authentication handshake, the MCLIST (maclist) load, per-track MAC
    signing, and the ICV finalization that commits a new generation. A
    session without a device still loads and re-signs the maclist; the
    handshake steps are simply skipped.
*/

use crate::{
    codec::{self, CodecId},
    crypto::{self, provider::EncryptStream, CryptoProvider},
    disc::{
        Himd,
        TrackMetadata,
        MCLIST_HEAD_SIZE,
        MCLIST_MACS_SIZE,
        MCLIST_OFS_DISC_ID,
        MCLIST_OFS_EKB_ID,
        MCLIST_OFS_GENERATION,
        MCLIST_OFS_HEAD_KEY,
        MCLIST_OFS_BODY_KEY,
        MCLIST_OFS_MACS,
    },
    block::MCODE_LPCM,
    date_time::DosDateTime,
    storage::{OpenMode, Storage},
    stream::BlockWriteStream,
    tif::{Fragment, TrackEntry, FRAGMENT_TYPE_AUDIO, TRACK_MAC_RANGE},
    util::{be32, put_be32},
    HimdError,
    HIMD_EKB_VERSION,
};

pub mod device;

pub use device::{find_device, DeviceId, IcvInfo, SecureDevice, Stage2Info, KNOWN_DEVICES};

/// The fixed host identity in the Sony DRM tree.
pub const HOST_LEAF_ID: [u8; 8] = [0x02, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// The key every conforming device reports in stage 2.
pub const EXPECTED_DEVICE_KEY: [u8; 16] = [
    0x6A, 0x7A, 0x4C, 0x7D, 0x5F, 0x3F, 0x86, 0x84, 0x28, 0x6D, 0x1A, 0x12, 0x32, 0x98, 0x22, 0x13,
];

/// Fixed leading bytes of every content id this host issues.
const CONTENT_ID_HEADER: [u8; 8] = [0x01, 0x0F, 0x50, 0x00, 0x00, 0x04, 0x00, 0x00];

/// Mint a fresh 20-byte content id: fixed header, four zero bytes, then
/// eight random bytes.
pub fn generate_content_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(&CONTENT_ID_HEADER);
    id[12..20].copy_from_slice(&rand::random::<[u8; 8]>());
    id
}

pub struct SecureSession<'h, S: Storage> {
    himd: &'h mut Himd<S>,
    device: Option<&'h mut dyn SecureDevice>,
    host_nonce:  [u8; 8],
    session_key: Option<[u8; 8]>,
    icv_header: [u8; 8],
    icv: [u8; 16],
    new_generation: u32,
    head_key: [u8; 16],
    body_key: [u8; 16],
    mclist_head: Vec<u8>,
    all_macs: Vec<u8>,
    opened: bool,
}

impl<'h, S: Storage> SecureSession<'h, S> {
    pub fn new(himd: &'h mut Himd<S>, device: Option<&'h mut dyn SecureDevice>) -> Self {
        Self {
            himd,
            device,
            host_nonce: [0u8; 8],
            session_key: None,
            icv_header: [0u8; 8],
            icv: [0u8; 16],
            new_generation: 0,
            head_key: [0u8; 16],
            body_key: [0u8; 16],
            mclist_head: Vec::new(),
            all_macs: Vec::new(),
            opened: false,
        }
    }

    /// Authenticate against the device (when present) and load the maclist.
    /// Idempotent.
    pub fn open(&mut self) -> Result<(), HimdError> {
        if self.opened {
            return Ok(());
        }
        if self.device.is_some() {
            self.authenticate()?;
        }
        self.load_maclist()?;
        self.opened = true;
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<(), HimdError> {
        self.open()
    }

    fn authenticate(&mut self) -> Result<(), HimdError> {
        let Some(device) = self.device.as_deref_mut() else {
            return Ok(());
        };

        self.host_nonce = rand::random::<[u8; 8]>();
        device.write_host_leaf_id(&HOST_LEAF_ID, &self.host_nonce)?;

        let stage2 = device.get_authentication_stage2_info()?;
        if stage2.ekb_id != HIMD_EKB_VERSION {
            return Err(HimdError::EkbMismatch);
        }
        if stage2.key_type != 1 || stage2.key_level != 9 {
            return Err(HimdError::DeviceError(format!(
                "unexpected stage-2 key type/level {}/{}",
                stage2.key_type, stage2.key_level
            )));
        }
        if stage2.key != EXPECTED_DEVICE_KEY {
            return Err(HimdError::DeviceError("unexpected stage-2 key".to_string()));
        }
        if stage2.disc_id != self.himd.disc_id() {
            log::warn!("authenticate(): device and MCLIST disagree on the disc id");
        }

        // The device proves knowledge of the main key over both nonces.
        let mut challenge = Vec::with_capacity(32);
        challenge.extend_from_slice(&stage2.disc_id);
        challenge.extend_from_slice(&self.host_nonce);
        challenge.extend_from_slice(&stage2.device_nonce);
        if crypto::retail_mac(&challenge, &crypto::MAIN_KEY) != stage2.mac {
            return Err(HimdError::DeviceMacMismatch);
        }

        // And we prove ours over the reversed nonce order.
        let mut response = Vec::with_capacity(32);
        response.extend_from_slice(&stage2.disc_id);
        response.extend_from_slice(&stage2.device_nonce);
        response.extend_from_slice(&self.host_nonce);
        let host_mac = crypto::retail_mac(&response, &crypto::MAIN_KEY);
        device.write_authentication_stage3_info(&host_mac, HIMD_EKB_VERSION)?;

        let icv_info = device.read_icv()?;
        self.icv_header = icv_info.header;
        self.icv = icv_info.icv;
        self.new_generation = be32(&icv_info.header[4..8]) + 1;

        let mut key_material = Vec::with_capacity(32);
        key_material.extend_from_slice(&stage2.disc_id);
        key_material.extend_from_slice(&stage2.mac);
        key_material.extend_from_slice(&host_mac);
        let session_key = crypto::retail_mac(&key_material, &crypto::MAIN_KEY);

        let mut header_icv = [0u8; 24];
        header_icv[..8].copy_from_slice(&icv_info.header);
        header_icv[8..].copy_from_slice(&icv_info.icv);
        if crypto::create_icv_mac(&header_icv, &session_key) != icv_info.mac {
            return Err(HimdError::IcvMacMismatch);
        }

        self.icv_header[1] = 0x20;
        self.session_key = Some(session_key);
        log::debug!("authenticate(): session established, next generation {}", self.new_generation);
        Ok(())
    }

    fn load_maclist(&mut self) -> Result<(), HimdError> {
        let mut file = self.himd.open_himd_file("MCLIST", OpenMode::Read)?;

        let mut head = vec![0u8; MCLIST_HEAD_SIZE];
        file.seek(0)?;
        file.read_exact(&mut head)?;

        if be32(&head[MCLIST_OFS_EKB_ID..]) != HIMD_EKB_VERSION {
            return Err(HimdError::EkbMismatch);
        }

        let head_cipher: [u8; 16] = head[MCLIST_OFS_HEAD_KEY..MCLIST_OFS_HEAD_KEY + 16].try_into().unwrap();
        let body_cipher: [u8; 16] = head[MCLIST_OFS_BODY_KEY..MCLIST_OFS_BODY_KEY + 16].try_into().unwrap();
        self.head_key = crypto::decrypt_maclist_key(&head_cipher);
        self.body_key = crypto::decrypt_maclist_key(&body_cipher);

        let mut macs = vec![0u8; MCLIST_MACS_SIZE];
        file.seek(MCLIST_OFS_MACS as u64)?;
        file.read_exact(&mut macs)?;

        if self.new_generation == 0 {
            self.new_generation = be32(&head[MCLIST_OFS_GENERATION..]) + 1;
        }
        self.mclist_head = head;
        self.all_macs = macs;
        Ok(())
    }

    /// Mint a track key and its EKB-wrapped form.
    pub fn new_track_key(&self) -> ([u8; 8], [u8; 8]) {
        let key = rand::random::<[u8; 8]>();
        let kek = crypto::encrypt_track_key(&key);
        (key, kek)
    }

    /// Stamp the DRM fields of a new track, store it and sign it into the
    /// MAC table. Returns the slot the track landed in.
    pub fn create_and_sign_new_track(&mut self, mut entry: TrackEntry, track_key: &[u8; 8]) -> Result<u16, HimdError> {
        self.ensure_open()?;
        entry.ekb_number = HIMD_EKB_VERSION;
        entry.key = crypto::encrypt_track_key(track_key);
        if entry.content_id == [0u8; 20] {
            entry.content_id = generate_content_id();
        }
        let slot = self.himd.tif_mut().add_track(&entry)?;

        let mut stored = self.himd.tif().track(slot);
        let serialized = stored.to_bytes();
        let mac = crypto::create_track_mac(track_key, &serialized[TRACK_MAC_RANGE]);
        stored.mac = mac;
        self.himd.tif_mut().write_track(slot, &stored);
        self.store_mac(slot, &mac);
        Ok(slot)
    }

    fn store_mac(&mut self, track_number: u16, mac: &[u8; 8]) {
        let offset = (track_number as usize - 1) * 8;
        self.all_macs[offset..offset + 8].copy_from_slice(mac);
    }

    /// The stored MAC for a one-based track number.
    pub fn track_mac(&self, track_number: u16) -> &[u8] {
        let offset = (track_number as usize - 1) * 8;
        &self.all_macs[offset..offset + 8]
    }

    /// Recompute one slot's MAC from its stored key. MP3 tracks carry no
    /// EKB and keep a zero MAC.
    pub fn sign_track(&mut self, slot: u16) -> Result<(), HimdError> {
        self.ensure_open()?;
        let mut entry = self.himd.tif().track(slot);
        if entry.ekb_number == 0 {
            self.store_mac(slot, &[0u8; 8]);
            return Ok(());
        }
        let track_key = crypto::create_track_key(entry.ekb_number, &entry.key)?;
        let serialized = entry.to_bytes();
        let mac = crypto::create_track_mac(&track_key, &serialized[TRACK_MAC_RANGE]);
        if entry.mac != mac {
            entry.mac = mac;
            self.himd.tif_mut().write_track(slot, &entry);
        }
        self.store_mac(slot, &mac);
        Ok(())
    }

    /// Rebuild the whole MAC table from the current track set; required
    /// after deletions shifted block numbers under the signed entries.
    pub fn resign_all(&mut self) -> Result<(), HimdError> {
        self.ensure_open()?;
        self.all_macs.fill(0);
        for index in 0..self.himd.tif().track_count() {
            let slot = self.himd.tif().track_at(index);
            self.sign_track(slot)?;
        }
        Ok(())
    }

    /// Verify every signed track against the loaded MAC table.
    pub fn verify_track_macs(&mut self) -> Result<(), HimdError> {
        self.ensure_open()?;
        for index in 0..self.himd.tif().track_count() {
            let slot = self.himd.tif().track_at(index);
            let entry = self.himd.tif().track(slot);
            if entry.ekb_number == 0 {
                continue;
            }
            let track_key = crypto::create_track_key(entry.ekb_number, &entry.key)?;
            let serialized = entry.to_bytes();
            let mac = crypto::create_track_mac(&track_key, &serialized[TRACK_MAC_RANGE]);
            if self.track_mac(slot) != mac.as_slice() {
                return Err(HimdError::IcvMacMismatch);
            }
        }
        Ok(())
    }

    /// Upload a raw ATRAC3/ATRAC3+/LPCM payload (whole frames) as a new
    /// signed track. Returns the new track index.
    #[allow(clippy::too_many_arguments)]
    pub fn upload_track<P: CryptoProvider + ?Sized>(
        &mut self,
        provider: &P,
        raw: &[u8],
        codec: CodecId,
        frame_bytes: u16,
        sample_rate: u32,
        meta: &TrackMetadata,
    ) -> Result<u16, HimdError> {
        self.ensure_open()?;

        let (codec_id, codec_info) = codec::generate_codec_info(codec, frame_bytes, 2, sample_rate);
        let frame_size = codec::bytes_per_frame(codec, &codec_info);
        let frames_per_block = codec::frames_per_block(codec, &codec_info) as usize;
        if frame_size == 0 || frames_per_block == 0 || raw.is_empty() || raw.len() % frame_size != 0 {
            return Err(HimdError::FrameOutOfRange);
        }

        let track_key = rand::random::<[u8; 8]>();
        let fragment_key = rand::random::<[u8; 8]>();
        let content_id = generate_content_id();
        let m_code = if codec == CodecId::Lpcm {
            MCODE_LPCM
        }
        else {
            crate::block::MCODE_DEFAULT
        };

        let (range, last_frames) = {
            let mut file = self.himd.open_himd_file("ATDATA", OpenMode::ReadWrite)?;
            let mut writer = BlockWriteStream::new(file.as_mut())?;
            let mut last_frames = 0u16;
            let stream = EncryptStream::new(
                provider,
                track_key,
                fragment_key,
                raw,
                frame_size,
                frames_per_block,
                codec.block_type(),
                m_code,
                be32(&content_id[16..20]),
            );
            for block in stream {
                let block = block?;
                last_frames = block.n_frames;
                writer.append(&block)?;
            }
            (writer.finish(), last_frames)
        };
        let Some((first_block, last_block)) = range else {
            return Err(HimdError::FrameOutOfRange);
        };

        let fragment = Fragment {
            key: fragment_key,
            first_block,
            last_block,
            first_frame: 0,
            last_frame: (last_frames - 1) as u8,
            fragment_type: FRAGMENT_TYPE_AUDIO,
            next_fragment: 0,
        };
        let first_fragment = self.himd.tif_mut().add_fragment(&fragment)?;

        let (title_index, artist_index, album_index) = match self.himd.add_track_strings(meta) {
            Ok(indices) => indices,
            Err(e) => {
                self.himd.tif_mut().remove_fragment(first_fragment);
                return Err(e);
            }
        };

        let frames = (raw.len() / frame_size) as u64;
        let seconds = frames * codec::samples_per_frame(codec, &codec_info) as u64 / sample_rate.max(1) as u64;

        let entry = TrackEntry {
            recording_time: meta.recording_time,
            title_index,
            artist_index,
            album_index,
            track_in_album: meta.track_in_album,
            codec_id,
            codec_info,
            first_fragment,
            seconds: seconds as u16,
            lt: 1,
            dest: 0,
            xcc: 1,
            content_id,
            license_start: DosDateTime::unpack(0, 0),
            license_end: DosDateTime::unpack(0, 0),
            ..TrackEntry::default()
        };
        let slot = self.create_and_sign_new_track(entry, &track_key)?;
        let index = self.himd.tif_mut().append_to_ordering(slot);

        log::debug!(
            "upload_track(): {} {} frames as track {} (slot {}, blocks {}..{})",
            codec,
            frames,
            index,
            slot,
            first_block,
            last_block
        );
        self.himd.flush()?;
        Ok(index)
    }

    /// Delete tracks, then re-sign and finalize so the disc still verifies.
    pub fn delete_tracks(&mut self, indices: &[u16]) -> Result<(), HimdError> {
        self.ensure_open()?;
        self.himd.delete_tracks(indices)?;
        self.resign_all()?;
        self.finalize()
    }

    /// Recompute the ICV, rotate the generation, rewrite the MCLIST, and
    /// (when a device is attached) push the signed ICV. Must follow all
    /// track signing in the session.
    pub fn finalize(&mut self) -> Result<(), HimdError> {
        self.ensure_open()?;
        self.himd.flush()?;

        put_be32(&mut self.mclist_head[MCLIST_OFS_GENERATION..], self.new_generation);
        let disc_id = self.himd.disc_id();
        self.mclist_head[MCLIST_OFS_DISC_ID..MCLIST_OFS_DISC_ID + 16].copy_from_slice(&disc_id);

        let head_mac = crypto::retail_mac(&self.mclist_head, &self.head_key);
        let body_mac = crypto::retail_mac(&self.all_macs, &self.body_key);
        self.icv[..8].copy_from_slice(&head_mac);
        self.icv[8..].copy_from_slice(&body_mac);

        self.himd.advance_generation(self.new_generation)?;

        {
            let mut file = self.himd.open_himd_file("MCLIST", OpenMode::ReadWrite)?;
            file.seek(0)?;
            file.write_all(&self.mclist_head)?;
            file.seek(MCLIST_OFS_MACS as u64)?;
            file.write_all(&self.all_macs)?;
        }

        if let Some(device) = self.device.as_deref_mut() {
            let session_key = self
                .session_key
                .ok_or_else(|| HimdError::DeviceError("no session key established".to_string()))?;
            let mut header = self.icv_header;
            put_be32(&mut header[4..], self.new_generation);

            let mut header_icv = [0u8; 24];
            header_icv[..8].copy_from_slice(&header);
            header_icv[8..].copy_from_slice(&self.icv);
            let mac = crypto::create_icv_mac(&header_icv, &session_key);
            device.write_icv(&header, &self.icv, &mac)?;
        }

        log::debug!("finalize(): generation {} committed", self.new_generation);
        self.new_generation += 1;
        Ok(())
    }

    /// The 16-byte ICV as of the last finalize.
    pub fn icv(&self) -> [u8; 16] {
        self.icv
    }
}
