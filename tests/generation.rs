mod common;

use common::*;
use himdfox::Himd;

/// Plain rotation renames all three files in lockstep.
#[test]
fn test_advance_generation_renames_files() {
    init();
    let (storage, mut himd) = blank_disc();

    himd.advance_generation(1).unwrap();
    assert_eq!(himd.generation(), 1);
    for base in ["ATDATA", "MCLIST", "TRKIDX"] {
        assert!(storage.contents(&format!("/HMDHIFI/{base}01.HMA")).is_some());
        assert!(storage.contents(&format!("/HMDHIFI/{base}00.HMA")).is_none());
    }

    // The rotated disc still mounts.
    let reopened = Himd::open(storage.clone()).unwrap();
    assert_eq!(reopened.track_count(), 0);
}

/// A conflicting file at the target suffix is evicted to a numbered .HJS
/// name before the rename.
#[test]
fn test_advance_generation_evicts_collision() {
    init();
    let (storage, mut himd) = blank_disc();
    himd.advance_generation(1).unwrap();

    let atdata01 = storage.contents("/HMDHIFI/ATDATA01.HMA").unwrap();
    storage.insert("/HMDHIFI/ATDATA02.HMA", vec![0xEE; 4]);

    himd.advance_generation(2).unwrap();

    // The stray file went to the first fresh .HJS basename.
    assert_eq!(storage.contents("/HMDHIFI/00000000.HJS").unwrap(), vec![0xEE; 4]);
    assert_eq!(storage.contents("/HMDHIFI/ATDATA02.HMA").unwrap(), atdata01);
    assert!(storage.contents("/HMDHIFI/ATDATA01.HMA").is_none());
    assert_eq!(himd.generation(), 2);
}

/// The generation suffix is the rotation count modulo 16, so generation 16
/// lands back on datanum 00.
#[test]
fn test_generation_wraps_at_sixteen() {
    init();
    let (storage, mut himd) = blank_disc();
    himd.advance_generation(3).unwrap();
    assert!(storage.contents("/HMDHIFI/ATDATA03.HMA").is_some());

    himd.advance_generation(16).unwrap();
    assert!(storage.contents("/HMDHIFI/ATDATA00.HMA").is_some());
    assert!(storage.contents("/HMDHIFI/ATDATA03.HMA").is_none());
    assert_eq!(himd.generation(), 16);
}
