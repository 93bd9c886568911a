//! Optional per-node property columns.
//!
//! Columns are plain typed arrays of length N, memory-mapped read-only and
//! length-checked at load. A column queried before it is loaded reports
//! `NotLoaded`; a loaded column encodes "missing" with a width-dependent
//! sentinel (`i64::MIN`, `i16::MIN`, or `-1`). Message and tag-name payloads
//! live in blob files as base64 lines addressed by an offset column and are
//! decoded on every access.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{GraphError, Result};
use crate::graph::NodeId;
use crate::pid::NodeType;
use crate::region::Region;
use crate::util::{read_varint, suffix_path, write_varint};

pub const CONTENT_LENGTH_EXT: &str = ".property.content.length.bin";
pub const CONTENT_SKIPPED_EXT: &str = ".property.content.is_skipped.bin";
pub const AUTHOR_ID_EXT: &str = ".property.author_id.bin";
pub const COMMITTER_ID_EXT: &str = ".property.committer_id.bin";
pub const AUTHOR_TIMESTAMP_EXT: &str = ".property.author_timestamp.bin";
pub const AUTHOR_TIMESTAMP_OFFSET_EXT: &str = ".property.author_timestamp_offset.bin";
pub const COMMITTER_TIMESTAMP_EXT: &str = ".property.committer_timestamp.bin";
pub const COMMITTER_TIMESTAMP_OFFSET_EXT: &str = ".property.committer_timestamp_offset.bin";
pub const MESSAGE_EXT: &str = ".property.message.bin";
pub const MESSAGE_OFFSET_EXT: &str = ".property.message.offset.bin";
pub const TAG_NAME_EXT: &str = ".property.tag_name.bin";
pub const TAG_NAME_OFFSET_EXT: &str = ".property.tag_name.offset.bin";
pub const LABEL_NAMES_EXT: &str = ".labels.fcl";

/// Side-car property columns of a graph, loaded on demand.
pub struct Properties {
    base: PathBuf,
    num_nodes: u64,
    content_length: Option<Region>,
    content_skipped: Option<Region>,
    author_id: Option<Region>,
    committer_id: Option<Region>,
    author_timestamp: Option<Region>,
    author_timestamp_offset: Option<Region>,
    committer_timestamp: Option<Region>,
    committer_timestamp_offset: Option<Region>,
    message: Option<(Region, Region)>,
    tag_name: Option<(Region, Region)>,
    label_names: Option<FrontCodedList>,
}

impl Properties {
    pub fn new(base: &Path, num_nodes: u64) -> Properties {
        Properties {
            base: base.to_path_buf(),
            num_nodes,
            content_length: None,
            content_skipped: None,
            author_id: None,
            committer_id: None,
            author_timestamp: None,
            author_timestamp_offset: None,
            committer_timestamp: None,
            committer_timestamp_offset: None,
            message: None,
            tag_name: None,
            label_names: None,
        }
    }

    fn column(&self, ext: &str, record_len: u64) -> Result<Region> {
        let path = suffix_path(&self.base, ext);
        let region = Region::map_file(&path)?;
        if region.len() as u64 != self.num_nodes * record_len {
            return Err(GraphError::ArtifactCorrupt(format!(
                "{}: {} bytes for {} nodes of {record_len}-byte records",
                path.display(),
                region.len(),
                self.num_nodes
            )));
        }
        Ok(region)
    }

    fn bit_column(&self, ext: &str) -> Result<Region> {
        let path = suffix_path(&self.base, ext);
        let region = Region::map_file(&path)?;
        if region.len() as u64 != self.num_nodes.div_ceil(64) * 8 {
            return Err(GraphError::ArtifactCorrupt(format!(
                "{}: bit column size mismatch",
                path.display()
            )));
        }
        Ok(region)
    }

    pub fn load_content(&mut self) -> Result<&mut Self> {
        self.content_length = Some(self.column(CONTENT_LENGTH_EXT, 8)?);
        self.content_skipped = Some(self.bit_column(CONTENT_SKIPPED_EXT)?);
        Ok(self)
    }

    pub fn load_persons(&mut self) -> Result<&mut Self> {
        self.author_id = Some(self.column(AUTHOR_ID_EXT, 4)?);
        self.committer_id = Some(self.column(COMMITTER_ID_EXT, 4)?);
        Ok(self)
    }

    pub fn load_timestamps(&mut self) -> Result<&mut Self> {
        self.author_timestamp = Some(self.column(AUTHOR_TIMESTAMP_EXT, 8)?);
        self.author_timestamp_offset = Some(self.column(AUTHOR_TIMESTAMP_OFFSET_EXT, 2)?);
        self.committer_timestamp = Some(self.column(COMMITTER_TIMESTAMP_EXT, 8)?);
        self.committer_timestamp_offset = Some(self.column(COMMITTER_TIMESTAMP_OFFSET_EXT, 2)?);
        Ok(self)
    }

    pub fn load_messages(&mut self) -> Result<&mut Self> {
        self.message = Some((
            Region::map_file(&suffix_path(&self.base, MESSAGE_EXT))?,
            self.column(MESSAGE_OFFSET_EXT, 8)?,
        ));
        Ok(self)
    }

    pub fn load_tag_names(&mut self) -> Result<&mut Self> {
        self.tag_name = Some((
            Region::map_file(&suffix_path(&self.base, TAG_NAME_EXT))?,
            self.column(TAG_NAME_OFFSET_EXT, 8)?,
        ));
        Ok(self)
    }

    pub fn load_label_names(&mut self) -> Result<&mut Self> {
        self.label_names = Some(FrontCodedList::load(&suffix_path(
            &self.base,
            LABEL_NAMES_EXT,
        ))?);
        Ok(self)
    }

    /// Loads every column whose artifact is present on disk; absent files
    /// leave their column unloaded.
    pub fn load_all(&mut self) -> Result<&mut Self> {
        let base = self.base.clone();
        let exists = move |ext: &str| suffix_path(&base, ext).exists();
        if exists(CONTENT_LENGTH_EXT) {
            self.load_content()?;
        }
        if exists(AUTHOR_ID_EXT) {
            self.load_persons()?;
        }
        if exists(AUTHOR_TIMESTAMP_EXT) {
            self.load_timestamps()?;
        }
        if exists(MESSAGE_EXT) {
            self.load_messages()?;
        }
        if exists(TAG_NAME_EXT) {
            self.load_tag_names()?;
        }
        if exists(LABEL_NAMES_EXT) {
            self.load_label_names()?;
        }
        Ok(self)
    }

    fn check_node(&self, id: NodeId) -> Result<()> {
        if id >= self.num_nodes {
            return Err(GraphError::OutOfRange {
                id,
                nodes: self.num_nodes,
            });
        }
        Ok(())
    }

    fn i64_at(region: &Region, id: NodeId) -> i64 {
        let start = id as usize * 8;
        i64::from_le_bytes(
            region.bytes()[start..start + 8]
                .try_into()
                .expect("slice is 8 bytes"),
        )
    }

    /// Content length in bytes; `None` for unknown lengths or non-content
    /// nodes.
    pub fn content_length(&self, id: NodeId) -> Result<Option<i64>> {
        self.check_node(id)?;
        let region = self
            .content_length
            .as_ref()
            .ok_or(GraphError::NotLoaded("content.length"))?;
        Ok(Some(Self::i64_at(region, id)).filter(|&v| v != i64::MIN))
    }

    /// Whether a content node was archived without its payload.
    pub fn is_skipped_content(&self, id: NodeId) -> Result<bool> {
        self.check_node(id)?;
        let region = self
            .content_skipped
            .as_ref()
            .ok_or(GraphError::NotLoaded("content.is_skipped"))?;
        let word_start = (id / 64) as usize * 8;
        let word = u64::from_le_bytes(
            region.bytes()[word_start..word_start + 8]
                .try_into()
                .expect("slice is 8 bytes"),
        );
        Ok(word >> (id % 64) & 1 == 1)
    }

    fn i32_column(&self, column: &Option<Region>, name: &'static str, id: NodeId) -> Result<Option<i32>> {
        self.check_node(id)?;
        let region = column.as_ref().ok_or(GraphError::NotLoaded(name))?;
        let start = id as usize * 4;
        let value = i32::from_le_bytes(
            region.bytes()[start..start + 4]
                .try_into()
                .expect("slice is 4 bytes"),
        );
        Ok(Some(value).filter(|&v| v != -1))
    }

    pub fn author_id(&self, id: NodeId) -> Result<Option<i32>> {
        self.i32_column(&self.author_id, "author_id", id)
    }

    pub fn committer_id(&self, id: NodeId) -> Result<Option<i32>> {
        self.i32_column(&self.committer_id, "committer_id", id)
    }

    fn timestamp(&self, column: &Option<Region>, name: &'static str, id: NodeId) -> Result<Option<i64>> {
        self.check_node(id)?;
        let region = column.as_ref().ok_or(GraphError::NotLoaded(name))?;
        Ok(Some(Self::i64_at(region, id)).filter(|&v| v != i64::MIN))
    }

    fn timestamp_offset(
        &self,
        column: &Option<Region>,
        name: &'static str,
        id: NodeId,
    ) -> Result<Option<i16>> {
        self.check_node(id)?;
        let region = column.as_ref().ok_or(GraphError::NotLoaded(name))?;
        let start = id as usize * 2;
        let value = i16::from_le_bytes(
            region.bytes()[start..start + 2]
                .try_into()
                .expect("slice is 2 bytes"),
        );
        Ok(Some(value).filter(|&v| v != i16::MIN))
    }

    pub fn author_timestamp(&self, id: NodeId) -> Result<Option<i64>> {
        self.timestamp(&self.author_timestamp, "author_timestamp", id)
    }

    pub fn author_timestamp_offset(&self, id: NodeId) -> Result<Option<i16>> {
        self.timestamp_offset(&self.author_timestamp_offset, "author_timestamp_offset", id)
    }

    pub fn committer_timestamp(&self, id: NodeId) -> Result<Option<i64>> {
        self.timestamp(&self.committer_timestamp, "committer_timestamp", id)
    }

    pub fn committer_timestamp_offset(&self, id: NodeId) -> Result<Option<i16>> {
        self.timestamp_offset(
            &self.committer_timestamp_offset,
            "committer_timestamp_offset",
            id,
        )
    }

    fn blob(&self, pair: &Option<(Region, Region)>, name: &'static str, id: NodeId) -> Result<Option<Vec<u8>>> {
        self.check_node(id)?;
        let (blob, offsets) = pair.as_ref().ok_or(GraphError::NotLoaded(name))?;
        let offset = Self::i64_at(offsets, id);
        if offset == -1 {
            return Ok(None);
        }
        let bytes = blob.bytes();
        let start = usize::try_from(offset)
            .ok()
            .filter(|&s| s <= bytes.len())
            .ok_or_else(|| {
                GraphError::ArtifactCorrupt(format!("{name} offset {offset} out of bounds"))
            })?;
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| start + p)
            .unwrap_or(bytes.len());
        let decoded = BASE64.decode(&bytes[start..end]).map_err(|e| {
            GraphError::ArtifactCorrupt(format!("{name} payload of node {id}: {e}"))
        })?;
        Ok(Some(decoded))
    }

    /// Revision or release message, decoded from its stored base64 form.
    pub fn message(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        self.blob(&self.message, "message", id)
    }

    /// Release tag name, decoded from its stored base64 form.
    pub fn tag_name(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        self.blob(&self.tag_name, "tag_name", id)
    }

    /// Resolves an edge label id to its name (a directory entry name or a
    /// snapshot branch name).
    pub fn label_name(&self, label_id: u64) -> Result<Vec<u8>> {
        let list = self
            .label_names
            .as_ref()
            .ok_or(GraphError::NotLoaded("label_names"))?;
        list.get(label_id)
    }
}

// Column writers. The builder and the test fixtures produce columns through
// these so that readers and writers share one format definition.

pub fn write_i64_column(path: &Path, values: &[i64]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for value in values {
        out.write_all(&value.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_i32_column(path: &Path, values: &[i32]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for value in values {
        out.write_all(&value.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_i16_column(path: &Path, values: &[i16]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for value in values {
        out.write_all(&value.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_bit_column(path: &Path, bits: &[bool]) -> Result<()> {
    let mut words = vec![0u64; bits.len().div_ceil(64)];
    for (index, &bit) in bits.iter().enumerate() {
        if bit {
            words[index / 64] |= 1 << (index % 64);
        }
    }
    let mut out = BufWriter::new(File::create(path)?);
    for word in &words {
        out.write_all(&word.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Writes a blob column pair: base64 lines plus per-node start offsets.
pub fn write_blob_column(
    blob_path: &Path,
    offset_path: &Path,
    values: &[Option<&[u8]>],
) -> Result<()> {
    let mut blob = BufWriter::new(File::create(blob_path)?);
    let mut offsets = Vec::with_capacity(values.len());
    let mut position = 0i64;
    for value in values {
        match value {
            Some(payload) => {
                let encoded = BASE64.encode(payload);
                offsets.push(position);
                blob.write_all(encoded.as_bytes())?;
                blob.write_all(b"\n")?;
                position += encoded.len() as i64 + 1;
            }
            None => offsets.push(-1),
        }
    }
    blob.flush()?;
    write_i64_column(offset_path, &offsets)
}

const FCL_MAGIC: &[u8; 8] = b"STRATFCL";
const FCL_BUCKET: u64 = 8;

/// Mapped front-coded string list.
///
/// Strings are stored in buckets: the first string of a bucket is written in
/// full, later ones as (shared-prefix length, suffix). A block index keyed
/// by bucket gives random access.
pub struct FrontCodedList {
    data: Region,
    count: u64,
    bucket: u64,
    index_start: usize,
    data_start: usize,
}

impl FrontCodedList {
    pub fn write(path: &Path, strings: &[&[u8]]) -> Result<()> {
        let mut data = Vec::new();
        let mut blocks = Vec::new();
        let mut prev: &[u8] = b"";
        for (index, &string) in strings.iter().enumerate() {
            if index as u64 % FCL_BUCKET == 0 {
                blocks.push(data.len() as u64);
                write_varint(&mut data, string.len() as u64);
                data.extend_from_slice(string);
            } else {
                let lcp = prev
                    .iter()
                    .zip(string.iter())
                    .take_while(|(a, b)| a == b)
                    .count();
                write_varint(&mut data, lcp as u64);
                write_varint(&mut data, (string.len() - lcp) as u64);
                data.extend_from_slice(&string[lcp..]);
            }
            prev = string;
        }

        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(FCL_MAGIC)?;
        out.write_all(&(strings.len() as u64).to_le_bytes())?;
        out.write_all(&FCL_BUCKET.to_le_bytes())?;
        out.write_all(&(blocks.len() as u64).to_le_bytes())?;
        for block in &blocks {
            out.write_all(&block.to_le_bytes())?;
        }
        out.write_all(&data)?;
        out.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<FrontCodedList> {
        let data = Region::map_file(path)?;
        let bytes = data.bytes();
        if bytes.len() < 32 || &bytes[..8] != FCL_MAGIC {
            return Err(GraphError::ArtifactCorrupt(format!(
                "{}: bad front-coded list header",
                path.display()
            )));
        }
        let count = u64::from_le_bytes(bytes[8..16].try_into().expect("slice is 8 bytes"));
        let bucket = u64::from_le_bytes(bytes[16..24].try_into().expect("slice is 8 bytes"));
        let num_blocks = u64::from_le_bytes(bytes[24..32].try_into().expect("slice is 8 bytes"));
        if bucket == 0 || num_blocks != count.div_ceil(bucket) {
            return Err(GraphError::ArtifactCorrupt(format!(
                "{}: inconsistent front-coded list block index",
                path.display()
            )));
        }
        let index_start = 32;
        let data_start = index_start + num_blocks as usize * 8;
        if data_start > bytes.len() {
            return Err(GraphError::ArtifactCorrupt(format!(
                "{}: truncated block index",
                path.display()
            )));
        }
        Ok(FrontCodedList {
            data,
            count,
            bucket,
            index_start,
            data_start,
        })
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, index: u64) -> Result<Vec<u8>> {
        if index >= self.count {
            return Err(GraphError::OutOfRange {
                id: index,
                nodes: self.count,
            });
        }
        let bytes = self.data.bytes();
        let block = (index / self.bucket) as usize;
        let block_offset = u64::from_le_bytes(
            bytes[self.index_start + block * 8..self.index_start + block * 8 + 8]
                .try_into()
                .expect("slice is 8 bytes"),
        );
        let mut pos = self.data_start + block_offset as usize;

        let head_len = read_varint(bytes, &mut pos)? as usize;
        let mut current = bytes
            .get(pos..pos + head_len)
            .ok_or_else(|| GraphError::ArtifactCorrupt("truncated front-coded block".into()))?
            .to_vec();
        pos += head_len;

        for _ in 0..index % self.bucket {
            let lcp = read_varint(bytes, &mut pos)? as usize;
            let suffix_len = read_varint(bytes, &mut pos)? as usize;
            if lcp > current.len() {
                return Err(GraphError::ArtifactCorrupt(
                    "front-coded prefix longer than previous entry".into(),
                ));
            }
            let suffix = bytes
                .get(pos..pos + suffix_len)
                .ok_or_else(|| GraphError::ArtifactCorrupt("truncated front-coded block".into()))?;
            pos += suffix_len;
            current.truncate(lcp);
            current.extend_from_slice(suffix);
        }
        Ok(current)
    }
}

/// Per-type node counts, the payload of the `.stats` artifact.
pub fn format_stats(num_nodes: u64, num_arcs: u64, per_type: &[u64; NodeType::COUNT]) -> String {
    let mut text = format!("nodes={num_nodes}\narcs={num_arcs}\n");
    for node_type in NodeType::all() {
        text.push_str(&format!(
            "nodes.{}={}\n",
            node_type,
            per_type[node_type.ordinal() as usize]
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_coded_list_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.fcl");
        let strings: Vec<Vec<u8>> = (0..50u32)
            .map(|i| format!("refs/tags/v{:03}", i).into_bytes())
            .collect();
        let refs: Vec<&[u8]> = strings.iter().map(|s| s.as_slice()).collect();
        FrontCodedList::write(&path, &refs).unwrap();

        let list = FrontCodedList::load(&path).unwrap();
        assert_eq!(list.len(), 50);
        for (i, expected) in strings.iter().enumerate() {
            assert_eq!(&list.get(i as u64).unwrap(), expected);
        }
        assert!(list.get(50).is_err());
    }

    #[test]
    fn blob_column_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("message.bin");
        let offsets = dir.path().join("message.offset.bin");
        write_blob_column(
            &blob,
            &offsets,
            &[Some(b"initial import".as_slice()), None, Some(b"".as_slice())],
        )
        .unwrap();

        let base = dir.path().join("g");
        std::fs::rename(&blob, suffix_path(&base, MESSAGE_EXT)).unwrap();
        std::fs::rename(&offsets, suffix_path(&base, MESSAGE_OFFSET_EXT)).unwrap();

        let mut props = Properties::new(&base, 3);
        assert!(matches!(
            props.message(0),
            Err(GraphError::NotLoaded("message"))
        ));
        props.load_messages().unwrap();
        assert_eq!(props.message(0).unwrap().unwrap(), b"initial import");
        assert_eq!(props.message(1).unwrap(), None);
        assert_eq!(props.message(2).unwrap().unwrap(), b"");
        assert!(matches!(
            props.message(3),
            Err(GraphError::OutOfRange { .. })
        ));
    }

    #[test]
    fn sentinel_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g");
        write_i64_column(
            &suffix_path(&base, CONTENT_LENGTH_EXT),
            &[42, i64::MIN, 0],
        )
        .unwrap();
        write_bit_column(&suffix_path(&base, CONTENT_SKIPPED_EXT), &[false, true, false]).unwrap();

        let mut props = Properties::new(&base, 3);
        props.load_content().unwrap();
        assert_eq!(props.content_length(0).unwrap(), Some(42));
        assert_eq!(props.content_length(1).unwrap(), None);
        assert_eq!(props.content_length(2).unwrap(), Some(0));
        assert!(!props.is_skipped_content(0).unwrap());
        assert!(props.is_skipped_content(1).unwrap());
    }

    #[test]
    fn column_size_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g");
        write_i64_column(&suffix_path(&base, CONTENT_LENGTH_EXT), &[1, 2]).unwrap();
        write_bit_column(&suffix_path(&base, CONTENT_SKIPPED_EXT), &[false; 3]).unwrap();
        let mut props = Properties::new(&base, 3);
        assert!(matches!(
            props.load_content(),
            Err(GraphError::ArtifactCorrupt(_))
        ));
    }
}
