mod common;

use common::*;
use himdfox::{
    crypto::DefaultCryptoProvider,
    disc::TrackMetadata,
    storage::FileRegion,
    HIMD_BLOCK_SIZE,
};

/// Deleting track 0 of a two-track disc: the count drops, the removed
/// track's fragments and strings return to their freelists, the survivor's
/// blocks are renumbered, and the freed ATDATA clusters are released.
#[test]
fn test_delete_frees_regions_and_renumbers() {
    init();
    let (storage, mut himd) = blank_disc();

    let frame = single_mp3_frame();
    himd.upload_mp3(
        &frame,
        &TrackMetadata {
            title: Some("One".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    himd.upload_mp3(
        &frame,
        &TrackMetadata {
            title: Some("Two".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(himd.track_count(), 2);

    // Track one sits in cluster 0 (block 0 plus its pad), track two starts
    // at block 2.
    let survivor_slot = himd.tif().track_at(1);
    let survivor_frag = himd.tif().track(survivor_slot).first_fragment;
    assert_eq!(himd.tif().fragment(survivor_frag).first_block, 2);

    let frags_before = himd.tif().free_fragment_slots();
    let strings_before = himd.tif().free_string_chunks();

    himd.delete_tracks(&[0]).unwrap();

    assert_eq!(himd.track_count(), 1);
    assert_eq!(himd.track_info(0).unwrap().title.as_deref(), Some("Two"));

    // One fragment and one single-chunk title returned.
    assert_eq!(himd.tif().free_fragment_slots(), frags_before + 1);
    assert_eq!(himd.tif().free_string_chunks(), strings_before + 1);

    // The freed region is cluster-aligned: blocks 0..2.
    let freed = storage.freed_regions();
    assert_eq!(freed.len(), 1);
    assert_eq!(freed[0].0, "/HMDHIFI/ATDATA00.HMA");
    assert_eq!(
        freed[0].1,
        vec![FileRegion {
            offset: 0,
            len:    2 * HIMD_BLOCK_SIZE as u64,
        }]
    );

    // The survivor shifted down into the freed space.
    let fragment = himd.tif().fragment(survivor_frag);
    assert_eq!(fragment.first_block, 0);
    assert_eq!(fragment.last_block, 0);
    let atdata = storage.contents("/HMDHIFI/ATDATA00.HMA").unwrap();
    assert_eq!(atdata.len(), HIMD_BLOCK_SIZE);

    // And it still reads back bit-exact after the shift.
    let dump = himd.dump_track(0, &DefaultCryptoProvider::new(), None).unwrap();
    assert_eq!(dump.data, frame);
}

/// Deleting every track empties the ordering and the container.
#[test]
fn test_delete_all_tracks() {
    init();
    let (storage, mut himd) = blank_disc();
    let frame = single_mp3_frame();
    himd.upload_mp3(&frame, &TrackMetadata::default()).unwrap();
    himd.upload_mp3(&frame, &TrackMetadata::default()).unwrap();

    himd.delete_tracks(&[0, 1]).unwrap();
    assert_eq!(himd.track_count(), 0);
    assert_eq!(storage.contents("/HMDHIFI/ATDATA00.HMA").unwrap().len(), 0);
}
