use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{GraphError, Result};

/// Read-only byte region backing an on-disk artifact.
///
/// Large artifacts are memory-mapped and shared across threads through the
/// `Arc`; cloning a region is O(1) and never copies the underlying pages.
#[derive(Clone)]
pub(crate) enum Region {
    Mapped(Arc<Mmap>),
    Owned(Arc<[u8]>),
}

impl Region {
    /// Maps `path` read-only. Zero-length files cannot be mapped, so they
    /// degrade to an empty owned region.
    pub(crate) fn map_file(path: &Path) -> Result<Region> {
        let file = File::open(path).map_err(|e| {
            GraphError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {e}", path.display()),
            ))
        })?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Region::Owned(Arc::from(Vec::new().into_boxed_slice())));
        }
        let map = unsafe { Mmap::map(&file)? };
        Ok(Region::Mapped(Arc::new(map)))
    }

    pub(crate) fn from_vec(bytes: Vec<u8>) -> Region {
        Region::Owned(Arc::from(bytes.into_boxed_slice()))
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Region::Mapped(map) => map,
            Region::Owned(bytes) => bytes,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Big-endian u64 at entry `index` of an 8-byte-record region.
    pub(crate) fn u64_be(&self, index: u64) -> Result<u64> {
        let start = index as usize * 8;
        let bytes = self.bytes();
        let slice = bytes
            .get(start..start + 8)
            .ok_or_else(|| GraphError::ArtifactCorrupt(format!("record {index} past end")))?;
        Ok(u64::from_be_bytes(slice.try_into().expect("slice is 8 bytes")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn maps_and_reads_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(&7u64.to_be_bytes()).unwrap();
        file.write_all(&u64::MAX.to_be_bytes()).unwrap();
        drop(file);

        let region = Region::map_file(&path).unwrap();
        assert_eq!(region.len(), 16);
        assert_eq!(region.u64_be(0).unwrap(), 7);
        assert_eq!(region.u64_be(1).unwrap(), u64::MAX);
        assert!(region.u64_be(2).is_err());
    }

    #[test]
    fn empty_file_degrades_to_owned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        File::create(&path).unwrap();
        let region = Region::map_file(&path).unwrap();
        assert_eq!(region.len(), 0);
    }
}
