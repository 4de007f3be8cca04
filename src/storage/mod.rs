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

    src/storage/mod.rs

    The byte-level disc interface. A Hi-MD disc is a FAT volume; the core
    only needs random-access files, listing, renaming and (optionally)
    cluster freeing, so those are the seams. Paths are case-insensitive and
    are canonicalised by each backend's case-folding resolver.
*/

use thiserror::Error;

pub mod memory;
pub mod native;

pub use memory::MemoryStorage;
pub use native::NativeStorage;

/// [StorageError] is the error type for Storage backends.
#[derive(Clone, Debug, Error)]
pub enum StorageError {
    #[error("An IO error occurred: {0}")]
    IoError(String),
    #[error("The requested path was not found: {0}")]
    PathNotFound(String),
    #[error("The file was opened read-only")]
    ReadOnlyFile,
    #[error("The path names a directory, not a file")]
    DirectoryAsFile,
    #[error("The backend does not support this operation")]
    Unsupported,
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::IoError(e.to_string())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

/// A byte range within a file, in bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileRegion {
    pub offset: u64,
    pub len:    u64,
}

/// A seekable handle into one on-disc file.
pub trait StorageFile {
    fn seek(&mut self, pos: u64) -> Result<(), StorageError>;
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError>;
    fn length(&mut self) -> Result<u64, StorageError>;

    /// Read the whole file from the start.
    fn read_all(&mut self) -> Result<Vec<u8>, StorageError> {
        let len = self.length()? as usize;
        let mut buf = vec![0u8; len];
        self.seek(0)?;
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

pub trait Storage {
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn StorageFile>, StorageError>;

    /// List the file names (not full paths) in a directory, in on-disc case.
    fn list(&mut self, path: &str) -> Result<Vec<String>, StorageError>;

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError>;

    fn size(&mut self, path: &str) -> Result<u64, StorageError>;

    fn total_space(&mut self) -> Result<u64, StorageError>;

    fn delete(&mut self, path: &str) -> Result<(), StorageError>;

    fn exists(&mut self, path: &str) -> bool {
        self.size(path).is_ok()
    }

    /// Release byte regions from a file, shrinking it in place. Backends
    /// without cluster-level control may ignore this.
    fn free_file_regions(&mut self, path: &str, regions: &[FileRegion]) -> Result<(), StorageError> {
        let _ = (path, regions);
        Ok(())
    }
}

/// Fold a path for case-insensitive comparison: uppercase ASCII, single
/// leading slash, no trailing slash.
pub(crate) fn fold_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    let mut folded = String::with_capacity(trimmed.len() + 1);
    folded.push('/');
    folded.push_str(&trimmed.to_ascii_uppercase());
    folded
}

/// Splice `regions` (sorted or not) out of a buffer, highest offset first so
/// earlier offsets stay valid while removing.
pub(crate) fn splice_regions(data: &mut Vec<u8>, regions: &[FileRegion]) {
    let mut sorted: Vec<FileRegion> = regions.to_vec();
    sorted.sort_by_key(|r| std::cmp::Reverse(r.offset));
    for region in sorted {
        let start = (region.offset as usize).min(data.len());
        let end = ((region.offset + region.len) as usize).min(data.len());
        data.drain(start..end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_path() {
        assert_eq!(fold_path("/HmdHifi/trkidx01.hma"), "/HMDHIFI/TRKIDX01.HMA");
        assert_eq!(fold_path("HMDHIFI/"), "/HMDHIFI");
    }

    #[test]
    fn test_splice_regions() {
        let mut data: Vec<u8> = (0..10).collect();
        splice_regions(
            &mut data,
            &[FileRegion { offset: 2, len: 2 }, FileRegion { offset: 6, len: 3 }],
        );
        assert_eq!(data, vec![0, 1, 4, 5, 9]);
    }
}
