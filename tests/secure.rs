mod common;

use common::*;
use himdfox::{
    codec::CodecId,
    crypto::{decrypt_maclist_key, retail_mac, DefaultCryptoProvider},
    disc::TrackMetadata,
    secure::SecureSession,
    HimdError,
    HIMD_BLOCK_SIZE,
};

/// An ATRAC3 upload under an authenticated session: two 192-byte frames
/// land in one block, the track is signed into the MAC table, and
/// finalizing pushes a recomputed ICV that the MCLIST on disc agrees with.
#[test]
fn test_atrac_upload_under_session() {
    init();
    let (storage, mut himd) = blank_disc();
    let disc_id = himd.disc_id();
    let mut device = MockDevice::new(disc_id, 0);
    let provider = DefaultCryptoProvider::new();

    let raw: Vec<u8> = (0..2 * 192).map(|i| (i % 251) as u8).collect();
    {
        let mut session = SecureSession::new(&mut himd, Some(&mut device));
        session.open().unwrap();

        let index = session
            .upload_track(
                &provider,
                &raw,
                CodecId::Atrac3,
                192,
                44100,
                &TrackMetadata {
                    title: Some("Signed".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(index, 0);

        // Slot 1 is the first the freelist hands out; its MAC is stored at
        // (trackNumber - 1) * 8 and must be live.
        assert_ne!(session.track_mac(1), [0u8; 8].as_slice());
        session.verify_track_macs().unwrap();
        session.finalize().unwrap();
    }

    // The session rotated generation 0 -> 1.
    assert_eq!(himd.generation(), 1);
    let atdata = storage.contents("/HMDHIFI/ATDATA01.HMA").unwrap();
    assert_eq!(atdata.len(), HIMD_BLOCK_SIZE);
    assert_eq!(&atdata[0..4], b"A3D ");
    assert_eq!(u16::from_be_bytes(atdata[4..6].try_into().unwrap()), 2);

    // The on-disc MCLIST must reproduce the ICV the device accepted.
    let mclist = storage.contents("/HMDHIFI/MCLIST01.HMA").unwrap();
    assert_eq!(u32::from_be_bytes(mclist[0x20..0x24].try_into().unwrap()), 1);
    assert_ne!(&mclist[0x70..0x78], [0u8; 8].as_slice());

    let head_key = decrypt_maclist_key(&mclist[0x10..0x20].try_into().unwrap());
    let body_key = decrypt_maclist_key(&mclist[0x60..0x70].try_into().unwrap());
    let mut expected_icv = [0u8; 16];
    expected_icv[..8].copy_from_slice(&retail_mac(&mclist[..0x70], &head_key));
    expected_icv[8..].copy_from_slice(&retail_mac(&mclist[0x70..0x70 + 32000], &body_key));
    assert_eq!(device.icv, expected_icv);
    assert_eq!(device.generation, 1);
    assert!(device.written.is_some());

    // And the audio reads back bit-exact through the decrypt path.
    let dump = himd.dump_track(0, &provider, None).unwrap();
    assert_eq!(dump.extension, "oma");
    assert_eq!(&dump.data[0..4], &[0x45, 0x41, 0x33, 0x01]);
    assert_eq!(dump.data.len(), 96 + raw.len());
    assert_eq!(&dump.data[96..], &raw[..]);
}

/// A session without a device still loads the maclist and can re-sign it.
#[test]
fn test_session_without_device() {
    init();
    let (storage, mut himd) = blank_disc();
    let provider = DefaultCryptoProvider::new();

    {
        let mut session = SecureSession::new(&mut himd, None);
        session.open().unwrap();
        session
            .upload_track(
                &provider,
                &vec![0x5Au8; 192],
                CodecId::Atrac3,
                192,
                44100,
                &TrackMetadata::default(),
            )
            .unwrap();
        session.finalize().unwrap();
    }

    assert_eq!(himd.generation(), 1);
    assert!(storage.contents("/HMDHIFI/MCLIST01.HMA").is_some());
}

/// A device presenting a bad challenge MAC is rejected before any state
/// changes hands.
#[test]
fn test_handshake_rejects_tampered_mac() {
    init();
    let (storage, mut himd) = blank_disc();
    let disc_id = himd.disc_id();
    let mut device = MockDevice::new(disc_id, 0);
    device.tamper_stage2_mac = true;

    {
        let mut session = SecureSession::new(&mut himd, Some(&mut device));
        assert!(matches!(session.open(), Err(HimdError::DeviceMacMismatch)));
    }

    // Nothing rotated; the original generation is still live.
    assert_eq!(himd.generation(), 0);
    assert!(storage.contents("/HMDHIFI/ATDATA00.HMA").is_some());
}

/// LPCM uploads round-trip through the byte-swap and WAV framing.
#[test]
fn test_lpcm_upload_and_wav_dump() {
    init();
    let (_storage, mut himd) = blank_disc();
    let provider = DefaultCryptoProvider::new();

    // Three 64-byte frames of big-endian samples.
    let raw: Vec<u8> = (0..3 * 64).map(|i| (i % 256) as u8).collect();
    {
        let mut session = SecureSession::new(&mut himd, None);
        session.open().unwrap();
        session
            .upload_track(&provider, &raw, CodecId::Lpcm, 64, 44100, &TrackMetadata::default())
            .unwrap();
        session.finalize().unwrap();
    }

    let dump = himd.dump_track(0, &provider, None).unwrap();
    assert_eq!(dump.extension, "wav");
    assert_eq!(&dump.data[0..4], b"RIFF");
    let pcm = &dump.data[44..];
    assert_eq!(pcm.len(), raw.len());
    // Samples come back little-endian.
    assert_eq!(pcm[0], raw[1]);
    assert_eq!(pcm[1], raw[0]);
}
