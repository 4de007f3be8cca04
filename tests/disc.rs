mod common;

use common::*;
use himdfox::Himd;

/// Setting the disc title threads a group-0 string; clearing it returns
/// every chunk to the freelist.
#[test]
fn test_disc_title_rename_and_clear() {
    init();
    let (storage, mut himd) = blank_disc();
    assert_eq!(himd.disc_title(), None);

    let free_before = himd.tif().free_string_chunks();

    // One discriminator byte plus 13 Latin-1 bytes: exactly one chunk.
    himd.rename_disc(Some("Example disc!")).unwrap();
    assert_eq!(himd.disc_title().as_deref(), Some("Example disc!"));
    assert_eq!(himd.tif().free_string_chunks(), free_before - 1);

    let group0 = himd.tif().group(0);
    assert_ne!(group0.title_index, 0);
    assert_eq!(himd.tif().string(group0.title_index).unwrap(), "Example disc!");

    himd.flush().unwrap();
    let reopened = Himd::open(storage.clone()).unwrap();
    assert_eq!(reopened.disc_title().as_deref(), Some("Example disc!"));

    himd.rename_disc(None).unwrap();
    assert_eq!(himd.disc_title(), None);
    assert!(himd.tif().group(0).is_terminator());
    assert_eq!(himd.tif().free_string_chunks(), free_before);
}

/// A longer title spans multiple chunks and still round-trips; clearing
/// frees them all.
#[test]
fn test_disc_title_multi_chunk() {
    init();
    let (_storage, mut himd) = blank_disc();
    let free_before = himd.tif().free_string_chunks();

    let title = "A somewhat longer disc title that spans several chunks";
    himd.rename_disc(Some(title)).unwrap();
    assert_eq!(himd.disc_title().as_deref(), Some(title));
    // 1 + 54 bytes over 14-byte chunks.
    assert_eq!(himd.tif().free_string_chunks(), free_before - 4);

    himd.rename_disc(None).unwrap();
    assert_eq!(himd.tif().free_string_chunks(), free_before);
}

/// Track titles can be replaced in place.
#[test]
fn test_rename_track() {
    init();
    let (_storage, mut himd) = blank_disc();
    himd.upload_mp3(
        &single_mp3_frame(),
        &himdfox::disc::TrackMetadata {
            title: Some("Before".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    himd.rename_track(0, Some("After")).unwrap();
    assert_eq!(himd.track_info(0).unwrap().title.as_deref(), Some("After"));

    himd.rename_track(0, None).unwrap();
    assert_eq!(himd.track_info(0).unwrap().title, None);
}
