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

//! Shared fixtures for the integration tests: a formatted in-memory disc
//! and a mock recorder that plays the device half of the authentication
//! handshake with real MACs.

#![allow(dead_code)]

pub mod device;

pub use device::MockDevice;

use himdfox::{storage::MemoryStorage, Himd};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A freshly formatted disc over shared in-memory storage. The returned
/// storage clone sees every mutation the disc makes.
pub fn blank_disc() -> (MemoryStorage, Himd<MemoryStorage>) {
    let storage = MemoryStorage::new();
    let himd = Himd::format(storage.clone()).expect("formatting a blank disc");
    (storage, himd)
}

/// A syntactically valid MPEG-1 Layer III 128 kbps 44.1 kHz stereo frame:
/// 417 bytes, no padding, deterministic body.
pub fn single_mp3_frame() -> Vec<u8> {
    let mut frame = vec![0u8; 417];
    frame[0] = 0xFF;
    frame[1] = 0xFB;
    frame[2] = 0x90;
    frame[3] = 0x00;
    for (i, b) in frame.iter_mut().enumerate().skip(4) {
        *b = (i % 255) as u8;
    }
    frame
}
