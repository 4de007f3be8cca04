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
*/

//! HiMDFox is a library for reading and writing Sony Hi-MD discs.
//!
//! A Hi-MD disc is a FAT volume carrying a small object database under
//! `/HMDHIFI/`: a track index (`TRKIDX<NN>.HMA`), an audio block container
//! (`ATDATA<NN>.HMA`) and a per-track MAC table (`MCLIST<NN>.HMA`), all tied
//! together by a two-hex-digit generation suffix. HiMDFox models the track
//! index as an in-memory arena of tracks, fragments, strings and groups,
//! streams audio blocks in and out of the container, and implements the Sony
//! DRM pipeline (EKB root unwrap, per-track and per-block keys, retail-MAC,
//! ICV) including the authentication session spoken with a physically
//! attached recorder.
//!
//! The entry point is [`Himd`], which mounts a disc through any [`Storage`]
//! backend. Secure uploads and deletions go through [`secure::SecureSession`].

pub mod block;
pub mod codec;
pub mod container;
pub mod crypto;
mod date_time;
pub mod disc;
pub mod mp3;
pub mod secure;
pub mod storage;
pub mod stream;
pub mod tif;
mod util;

use thiserror::Error;

use crate::storage::StorageError;

/// Size of one audio block in the `ATDATA` container.
pub const HIMD_BLOCK_SIZE: usize = 0x4000;
/// Usable audio payload bytes within one block.
pub const HIMD_AUDIO_SIZE: usize = 0x3FC0;
/// Size of the `TRKIDX` image.
pub const HIMD_TIF_SIZE: usize = 0x50000;
/// The only EKB version this library (or any known disc) carries.
pub const HIMD_EKB_VERSION: u32 = 0x0001_0012;
/// Directory all Hi-MD metadata lives under.
pub const HIMD_DIR: &str = "/HMDHIFI";

/// [HimdError] is the top-level error type for disc operations.
///
/// Integrity failures abort the current read or write with no on-disc
/// mutation beyond what had already been durably committed; secure-session
/// failures abort before any file rename, leaving the previous generation
/// live.
#[derive(Debug, Error)]
pub enum HimdError {
    #[error("No track index present on the disc")]
    NoTrackIndex,
    #[error("The track index image is malformed")]
    InvalidTrackIndex,
    #[error("EKB number {0:#010x} is not in the root table")]
    UnknownEkb(u32),
    #[error("A string chain did not decode with any known encoding")]
    InvalidEncoding,
    #[error("The string cannot be represented in any supported encoding")]
    Unencodable,
    #[error("The string freelist is exhausted")]
    NotEnoughStringSlots,
    #[error("The track slot freelist is exhausted")]
    OutOfTrackSlots,
    #[error("The fragment freelist is exhausted")]
    OutOfFragmentSlots,
    #[error("A fragment chain is broken or cyclic")]
    FragmentChainBroken,
    #[error("A block's last frame precedes its first frame")]
    LastFrameBeforeFirstFrame,
    #[error("A block declares more payload than fits")]
    BlockDataTooLarge,
    #[error("A frame index lies outside its block")]
    FrameOutOfRange,
    #[error("The device MAC did not verify against the host nonce")]
    DeviceMacMismatch,
    #[error("The ICV MAC did not verify against the session key")]
    IcvMacMismatch,
    #[error("The MAC list carries an unexpected EKB id")]
    EkbMismatch,
    #[error("The crypto provider is already in use")]
    ProviderBusy,
    #[error("The operation is not supported by this device or backend")]
    UnsupportedOperation,
    #[error("Device transport error: {0}")]
    DeviceError(String),
    #[error("A storage error occurred: {0}")]
    Storage(#[from] StorageError),
}

pub use crate::{
    codec::{CodecId, CodecInfo},
    date_time::DosDateTime,
    disc::{Himd, TrackInfo},
    storage::{OpenMode, Storage, StorageFile},
    tif::{Fragment, TrackEntry, TrackIndex},
};
