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

    src/storage/native.rs

    Storage backend over a host directory, typically a mounted Hi-MD volume.
    The host filesystem may or may not be case-preserving, so every path
    component is resolved by scanning its parent directory for a
    case-insensitive match.
*/

use std::{
    fs,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::storage::{splice_regions, FileRegion, OpenMode, Storage, StorageError, StorageFile};

pub struct NativeStorage {
    root: PathBuf,
}

struct NativeFile {
    file:     fs::File,
    writable: bool,
}

impl NativeStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve a disc path to a host path, matching each component
    /// case-insensitively. With `create` set, a missing final component
    /// resolves to the literal name under its (resolved) parent.
    fn resolve(&self, path: &str, create: bool) -> Result<PathBuf, StorageError> {
        let mut resolved = self.root.clone();
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

        for (i, component) in components.iter().enumerate() {
            let last = i == components.len() - 1;
            let mut found = None;
            if resolved.is_dir() {
                for entry in fs::read_dir(&resolved)? {
                    let entry = entry?;
                    let name = entry.file_name().to_string_lossy().to_string();
                    if name.eq_ignore_ascii_case(component) {
                        found = Some(name);
                        break;
                    }
                }
            }
            match found {
                Some(name) => resolved.push(name),
                None if last && create => resolved.push(component),
                None => return Err(StorageError::PathNotFound(path.to_string())),
            }
        }
        Ok(resolved)
    }
}

impl Storage for NativeStorage {
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn StorageFile>, StorageError> {
        let host_path = self.resolve(path, mode == OpenMode::ReadWrite)?;
        if host_path.is_dir() {
            return Err(StorageError::DirectoryAsFile);
        }
        log::trace!("NativeStorage::open(): {} -> {}", path, host_path.display());
        let file = match mode {
            OpenMode::Read => fs::File::open(&host_path)?,
            OpenMode::ReadWrite => fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&host_path)?,
        };
        Ok(Box::new(NativeFile {
            file,
            writable: mode == OpenMode::ReadWrite,
        }))
    }

    fn list(&mut self, path: &str) -> Result<Vec<String>, StorageError> {
        let host_path = self.resolve(path, false)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&host_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        let from_path = self.resolve(from, false)?;
        let to_path = self.resolve(to, true)?;
        log::trace!(
            "NativeStorage::rename(): {} -> {}",
            from_path.display(),
            to_path.display()
        );
        fs::rename(from_path, to_path)?;
        Ok(())
    }

    fn size(&mut self, path: &str) -> Result<u64, StorageError> {
        let host_path = self.resolve(path, false)?;
        Ok(fs::metadata(host_path)?.len())
    }

    fn total_space(&mut self) -> Result<u64, StorageError> {
        // Not derivable portably from std; callers needing a real figure
        // should query the mounted volume themselves.
        Err(StorageError::Unsupported)
    }

    fn delete(&mut self, path: &str) -> Result<(), StorageError> {
        let host_path = self.resolve(path, false)?;
        fs::remove_file(host_path)?;
        Ok(())
    }

    fn free_file_regions(&mut self, path: &str, regions: &[FileRegion]) -> Result<(), StorageError> {
        let host_path = self.resolve(path, false)?;
        let mut data = fs::read(&host_path)?;
        splice_regions(&mut data, regions);
        fs::write(&host_path, data)?;
        Ok(())
    }
}

impl StorageFile for NativeFile {
    fn seek(&mut self, pos: u64) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), StorageError> {
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnlyFile);
        }
        self.file.write_all(buf)?;
        Ok(())
    }

    fn length(&mut self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len())
    }
}
