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

    src/storage/memory.rs

    In-memory storage backend. Useful for building disc images from scratch
    and as the fixture backend for tests; clones share the same underlying
    volume, so a test can keep a handle to inspect state after the disc
    consumes the storage.
*/

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::storage::{fold_path, splice_regions, FileRegion, OpenMode, Storage, StorageError, StorageFile};

type FileMap = HashMap<String, Rc<RefCell<Vec<u8>>>>;

#[derive(Clone, Default)]
pub struct MemoryStorage {
    files: Rc<RefCell<FileMap>>,
    /// Names originally given to `insert`/`open`, keyed by folded path, so
    /// `list` can echo on-disc case.
    names: Rc<RefCell<HashMap<String, String>>>,
    freed: Rc<RefCell<Vec<(String, Vec<FileRegion>)>>>,
}

struct MemoryFile {
    data:     Rc<RefCell<Vec<u8>>>,
    pos:      u64,
    writable: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a file with the given contents.
    pub fn insert(&self, path: &str, data: Vec<u8>) {
        let folded = fold_path(path);
        let name = path.trim_matches('/').rsplit('/').next().unwrap_or("").to_string();
        self.names.borrow_mut().insert(folded.clone(), name);
        self.files.borrow_mut().insert(folded, Rc::new(RefCell::new(data)));
    }

    /// A copy of a file's current contents, resolved case-insensitively.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(&fold_path(path)).map(|f| f.borrow().clone())
    }

    /// Regions handed to `free_file_regions`, oldest first. For assertions.
    pub fn freed_regions(&self) -> Vec<(String, Vec<FileRegion>)> {
        self.freed.borrow().clone()
    }
}

impl Storage for MemoryStorage {
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn StorageFile>, StorageError> {
        let folded = fold_path(path);
        let mut files = self.files.borrow_mut();
        let data = match files.get(&folded) {
            Some(data) => data.clone(),
            None if mode == OpenMode::ReadWrite => {
                let name = path.trim_matches('/').rsplit('/').next().unwrap_or("").to_string();
                self.names.borrow_mut().insert(folded.clone(), name);
                let data = Rc::new(RefCell::new(Vec::new()));
                files.insert(folded, data.clone());
                data
            }
            None => return Err(StorageError::PathNotFound(path.to_string())),
        };
        Ok(Box::new(MemoryFile {
            data,
            pos: 0,
            writable: mode == OpenMode::ReadWrite,
        }))
    }

    fn list(&mut self, path: &str) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{}/", fold_path(path));
        let names = self.names.borrow();
        let mut entries: Vec<String> = self
            .files
            .borrow()
            .keys()
            .filter(|k| k.starts_with(&prefix) && !k[prefix.len()..].contains('/'))
            .map(|k| names.get(k).cloned().unwrap_or_else(|| k[prefix.len()..].to_string()))
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        let from_folded = fold_path(from);
        let to_folded = fold_path(to);
        let mut files = self.files.borrow_mut();
        let data = files
            .remove(&from_folded)
            .ok_or_else(|| StorageError::PathNotFound(from.to_string()))?;
        files.insert(to_folded.clone(), data);

        let mut names = self.names.borrow_mut();
        names.remove(&from_folded);
        let name = to.trim_matches('/').rsplit('/').next().unwrap_or("").to_string();
        names.insert(to_folded, name);
        Ok(())
    }

    fn size(&mut self, path: &str) -> Result<u64, StorageError> {
        self.files
            .borrow()
            .get(&fold_path(path))
            .map(|f| f.borrow().len() as u64)
            .ok_or_else(|| StorageError::PathNotFound(path.to_string()))
    }

    fn total_space(&mut self) -> Result<u64, StorageError> {
        // A 1 GB Hi-MD disc; the memory backend imposes no real limit.
        Ok(1_000_000_000)
    }

    fn delete(&mut self, path: &str) -> Result<(), StorageError> {
        let folded = fold_path(path);
        self.names.borrow_mut().remove(&folded);
        self.files
            .borrow_mut()
            .remove(&folded)
            .map(|_| ())
            .ok_or_else(|| StorageError::PathNotFound(path.to_string()))
    }

    fn free_file_regions(&mut self, path: &str, regions: &[FileRegion]) -> Result<(), StorageError> {
        let folded = fold_path(path);
        let files = self.files.borrow();
        let data = files
            .get(&folded)
            .ok_or_else(|| StorageError::PathNotFound(path.to_string()))?;
        splice_regions(&mut data.borrow_mut(), regions);
        self.freed.borrow_mut().push((folded, regions.to_vec()));
        Ok(())
    }
}

impl StorageFile for MemoryFile {
    fn seek(&mut self, pos: u64) -> Result<(), StorageError> {
        self.pos = pos;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), StorageError> {
        let data = self.data.borrow();
        let start = self.pos as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(StorageError::IoError("unexpected end of file".to_string()));
        }
        buf.copy_from_slice(&data[start..end]);
        self.pos = end as u64;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnlyFile);
        }
        let mut data = self.data.borrow_mut();
        let start = self.pos as usize;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(())
    }

    fn length(&mut self) -> Result<u64, StorageError> {
        Ok(self.data.borrow().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_open() {
        let mut storage = MemoryStorage::new();
        storage.insert("/HMDHIFI/TRKIDX01.HMA", vec![1, 2, 3]);
        let mut file = storage.open("/hmdhifi/trkidx01.hma", OpenMode::Read).unwrap();
        assert_eq!(file.read_all().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_write_then_read_back() {
        let mut storage = MemoryStorage::new();
        {
            let mut file = storage.open("/HMDHIFI/ATDATA01.HMA", OpenMode::ReadWrite).unwrap();
            file.write_all(&[9; 16]).unwrap();
            file.seek(4).unwrap();
            file.write_all(&[7; 4]).unwrap();
        }
        let contents = storage.contents("/hmdhifi/atdata01.hma").unwrap();
        assert_eq!(&contents[0..4], &[9; 4]);
        assert_eq!(&contents[4..8], &[7; 4]);
        assert_eq!(contents.len(), 16);
    }

    #[test]
    fn test_read_only_enforced() {
        let mut storage = MemoryStorage::new();
        storage.insert("/A.BIN", vec![0; 4]);
        let mut file = storage.open("/A.BIN", OpenMode::Read).unwrap();
        assert!(matches!(file.write_all(&[1]), Err(StorageError::ReadOnlyFile)));
    }

    #[test]
    fn test_list_preserves_case() {
        let mut storage = MemoryStorage::new();
        storage.insert("/HMDHIFI/AtData03.hma", vec![]);
        let listing = storage.list("/hmdhifi").unwrap();
        assert_eq!(listing, vec!["AtData03.hma".to_string()]);
    }
}
