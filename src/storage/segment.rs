//! Segment storage module
//!
//! Splits files into fixed-size segments on disk and reassembles them.
//! Each file keeps its segments in `<root>/<file>.segments/segment_<i>.part`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, trace, warn};

use crate::error::{SwarmError, SwarmResult};
use crate::protocol::{validate_file_name, StoredFile};

/// Default segment size in bytes
pub const DEFAULT_SEGMENT_SIZE: usize = 10 * 1024;

const SEGMENT_DIR_SUFFIX: &str = ".segments";
const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_EXT: &str = ".part";

/// Split a byte buffer into segments of `segment_size` bytes; the last one may be shorter
pub fn split_bytes(data: &[u8], segment_size: usize) -> Vec<Bytes> {
    if segment_size == 0 {
        return Vec::new();
    }
    data.chunks(segment_size).map(Bytes::copy_from_slice).collect()
}

/// Number of segments a file of `len` bytes splits into
pub fn segment_count(len: u64, segment_size: usize) -> u32 {
    if segment_size == 0 {
        return 0;
    }
    len.div_ceil(segment_size as u64) as u32
}

/// On-disk segment store for one peer
#[derive(Debug, Clone)]
pub struct SegmentStore {
    root: PathBuf,
    segment_size: usize,
}

impl SegmentStore {
    /// Create a new segment store rooted at `root`
    pub fn new(root: PathBuf, segment_size: usize) -> Self {
        Self { root, segment_size }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn segment_dir(&self, file_name: &str) -> PathBuf {
        self.root.join(format!("{}{}", file_name, SEGMENT_DIR_SUFFIX))
    }

    fn segment_path(&self, file_name: &str, index: u32) -> PathBuf {
        self.segment_dir(file_name).join(format!("{}{}{}", SEGMENT_PREFIX, index, SEGMENT_EXT))
    }

    fn parse_segment_index(name: &str) -> Option<u32> {
        name.strip_prefix(SEGMENT_PREFIX)?
            .strip_suffix(SEGMENT_EXT)?
            .parse()
            .ok()
    }

    /// Split a local file into segments under `file_name`; returns the segment count
    pub async fn import_file(&self, source: &Path, file_name: &str) -> SwarmResult<u32> {
        validate_file_name(file_name)?;
        let data = fs::read(source).await.map_err(|e| {
            SwarmError::storage_error_full("Failed to read source file", source.display().to_string(), e.to_string())
        })?;

        if data.is_empty() {
            return Err(SwarmError::validation_error_with_field(
                format!("Cannot share empty file {}", source.display()),
                "file",
            ));
        }

        let segments = split_bytes(&data, self.segment_size);
        for (index, segment) in segments.iter().enumerate() {
            self.store(file_name, index as u32, segment).await?;
        }

        info!(
            "Split {} into {} segments of up to {} bytes",
            file_name,
            segments.len(),
            self.segment_size
        );
        Ok(segments.len() as u32)
    }

    /// Persist one segment; a half-written segment never shows up in `list`
    pub async fn store(&self, file_name: &str, index: u32, data: &[u8]) -> SwarmResult<()> {
        validate_file_name(file_name)?;
        let dir = self.segment_dir(file_name);
        fs::create_dir_all(&dir).await.map_err(|e| {
            SwarmError::storage_error_full("Failed to create segment directory", dir.display().to_string(), e.to_string())
        })?;

        let path = self.segment_path(file_name, index);
        let tmp_path = path.with_extension("part.tmp");
        fs::write(&tmp_path, data).await.map_err(|e| {
            SwarmError::storage_error_full("Failed to write segment", tmp_path.display().to_string(), e.to_string())
        })?;
        fs::rename(&tmp_path, &path).await.map_err(|e| {
            SwarmError::storage_error_full("Failed to commit segment", path.display().to_string(), e.to_string())
        })?;

        trace!("Stored segment {} of {} ({} bytes)", index, file_name, data.len());
        Ok(())
    }

    /// Check whether a segment is stored
    pub async fn has(&self, file_name: &str, index: u32) -> bool {
        if validate_file_name(file_name).is_err() {
            return false;
        }
        fs::try_exists(self.segment_path(file_name, index)).await.unwrap_or(false)
    }

    /// Read one segment, `None` when it is not stored
    pub async fn read(&self, file_name: &str, index: u32) -> SwarmResult<Option<Bytes>> {
        validate_file_name(file_name)?;
        let path = self.segment_path(file_name, index);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SwarmError::storage_error_full(
                "Failed to read segment",
                path.display().to_string(),
                e.to_string(),
            )),
        }
    }

    /// Indices of every stored segment of a file, ascending
    pub async fn list(&self, file_name: &str) -> SwarmResult<BTreeSet<u32>> {
        validate_file_name(file_name)?;
        let dir = self.segment_dir(file_name);
        let mut indices = BTreeSet::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(indices),
            Err(e) => {
                return Err(SwarmError::storage_error_full(
                    "Failed to list segments",
                    dir.display().to_string(),
                    e.to_string(),
                ))
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            if let Some(index) = entry.file_name().to_str().and_then(Self::parse_segment_index) {
                indices.insert(index);
            }
        }

        Ok(indices)
    }

    /// Every file with at least one stored segment
    pub async fn files(&self) -> SwarmResult<Vec<StoredFile>> {
        let mut files = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(file_name) = name.to_str().and_then(|n| n.strip_suffix(SEGMENT_DIR_SUFFIX)) else {
                continue;
            };
            let segments = self.list(file_name).await?.len() as u32;
            if segments > 0 {
                files.push(StoredFile {
                    file_name: file_name.to_string(),
                    segments,
                });
            }
        }

        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }

    /// Indices in `[0, total)` that are not stored
    pub async fn missing(&self, file_name: &str, total: u32) -> SwarmResult<Vec<u32>> {
        let stored = self.list(file_name).await?;
        Ok((0..total).filter(|i| !stored.contains(i)).collect())
    }

    /// Concatenate segments `0..total` into `dest`
    ///
    /// Refused unless the stored index set is exactly `[0, total)`.
    pub async fn assemble(&self, file_name: &str, total: u32, dest: &Path) -> SwarmResult<u64> {
        let stored = self.list(file_name).await?;
        let expected: BTreeSet<u32> = (0..total).collect();
        if total == 0 || stored != expected {
            let missing: Vec<u32> = expected.difference(&stored).copied().collect();
            let extra: Vec<u32> = stored.difference(&expected).copied().collect();
            warn!(
                "Refusing to reconstruct {}: missing {:?}, unexpected {:?}",
                file_name, missing, extra
            );
            return Err(SwarmError::validation_error_with_field(
                format!(
                    "Segment set for {} is not [0, {}): {} missing, {} unexpected",
                    file_name,
                    total,
                    missing.len(),
                    extra.len()
                ),
                "segments",
            ));
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp_name = dest
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| SwarmError::validation_error_with_field("Output path has no file name", "dest"))?;
        tmp_name.push(".assembling");
        let tmp_dest = dest.with_file_name(tmp_name);
        let mut out = fs::File::create(&tmp_dest).await.map_err(|e| {
            SwarmError::storage_error_full("Failed to create output file", tmp_dest.display().to_string(), e.to_string())
        })?;

        let mut written = 0u64;
        for index in 0..total {
            let data = self.read(file_name, index).await?.ok_or_else(|| {
                SwarmError::not_found_with_resource(
                    format!("Segment {} vanished during reconstruction", index),
                    file_name.to_string(),
                )
            })?;
            out.write_all(&data).await?;
            written += data.len() as u64;
        }
        out.flush().await?;
        drop(out);

        fs::rename(&tmp_dest, dest).await.map_err(|e| {
            SwarmError::storage_error_full("Failed to move output file", dest.display().to_string(), e.to_string())
        })?;

        info!("Reconstructed {} ({} bytes, {} segments) at {}", file_name, written, total, dest.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("swarm_segment_{}_{}", name, rand::random::<u32>()))
    }

    #[test]
    fn test_split_bytes_scenario_a() {
        let data = vec![7u8; 25_600];
        let segments = split_bytes(&data, 10 * 1024);
        let sizes: Vec<usize> = segments.iter().map(|s| s.len()).collect();
        assert_eq!(sizes, vec![10_240, 10_240, 5_120]);
        assert_eq!(segment_count(25_600, 10 * 1024), 3);
    }

    #[test]
    fn test_segment_count_exact_multiple() {
        assert_eq!(segment_count(20_480, 10_240), 2);
        assert_eq!(segment_count(1, 10_240), 1);
        assert_eq!(segment_count(0, 10_240), 0);
    }

    #[tokio::test]
    async fn test_import_and_reassemble_byte_identical() {
        let dir = test_dir("import");
        let store = SegmentStore::new(dir.join("store"), DEFAULT_SEGMENT_SIZE);

        let source = dir.join("source.bin");
        let data: Vec<u8> = (0..25_600u32).map(|_| rand::random::<u8>()).collect();
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(&source, &data).await.unwrap();

        let count = store.import_file(&source, "source.bin").await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(store.read("source.bin", 2).await.unwrap().unwrap().len(), 5_120);

        let dest = dir.join("out").join("source.bin");
        let written = store.assemble("source.bin", count, &dest).await.unwrap();
        assert_eq!(written, 25_600);
        assert_eq!(fs::read(&dest).await.unwrap(), data);

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_store_has_list() {
        let dir = test_dir("list");
        let store = SegmentStore::new(dir.clone(), 4);

        assert!(!store.has("a.bin", 0).await);
        assert!(store.list("a.bin").await.unwrap().is_empty());

        store.store("a.bin", 2, b"cccc").await.unwrap();
        store.store("a.bin", 0, b"aaaa").await.unwrap();
        store.store("a.bin", 0, b"aaaa").await.unwrap();

        assert!(store.has("a.bin", 0).await);
        assert!(!store.has("a.bin", 1).await);
        assert_eq!(store.list("a.bin").await.unwrap().into_iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(store.missing("a.bin", 4).await.unwrap(), vec![1, 3]);

        let files = store.files().await.unwrap();
        assert_eq!(files, vec![StoredFile { file_name: "a.bin".into(), segments: 2 }]);

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_assemble_refuses_partial_set() {
        let dir = test_dir("partial");
        let store = SegmentStore::new(dir.clone(), 4);
        store.store("a.bin", 0, b"aaaa").await.unwrap();
        store.store("a.bin", 2, b"cc").await.unwrap();

        let dest = dir.join("a.bin");
        let err = store.assemble("a.bin", 3, &dest).await.unwrap_err();
        assert!(matches!(err, SwarmError::ValidationError { .. }));
        assert!(!fs::try_exists(&dest).await.unwrap());

        store.store("a.bin", 1, b"bbbb").await.unwrap();
        store.assemble("a.bin", 3, &dest).await.unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), b"aaaabbbbcc");

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_assemble_refuses_extra_segments() {
        let dir = test_dir("extra");
        let store = SegmentStore::new(dir.clone(), 4);
        for i in 0..3 {
            store.store("a.bin", i, b"xx").await.unwrap();
        }

        assert!(store.assemble("a.bin", 2, &dir.join("a.bin")).await.is_err());

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = test_dir("traversal");
        let store = SegmentStore::new(dir.clone(), 4);

        assert!(store.store("../escape", 0, b"x").await.is_err());
        assert!(store.read("a/b", 0).await.is_err());
        assert!(!store.has("..", 0).await);

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_leftover_temp_file_is_not_a_segment() {
        let dir = test_dir("tmp");
        let store = SegmentStore::new(dir.clone(), 4);
        store.store("a.bin", 0, b"aaaa").await.unwrap();

        let seg_dir = dir.join("a.bin.segments");
        fs::write(seg_dir.join("segment_1.part.tmp"), b"half").await.unwrap();

        assert_eq!(store.list("a.bin").await.unwrap().len(), 1);
        assert!(!store.has("a.bin", 1).await);

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_import_empty_file_rejected() {
        let dir = test_dir("empty");
        fs::create_dir_all(&dir).await.unwrap();
        let source = dir.join("empty.bin");
        fs::write(&source, b"").await.unwrap();

        let store = SegmentStore::new(dir.join("store"), 4);
        assert!(store.import_file(&source, "empty.bin").await.is_err());

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_same_stem_files_assemble_side_by_side() {
        let dir = test_dir("stem");
        let store = SegmentStore::new(dir.join("store"), 4);
        store.store("a.bin", 0, b"bin0").await.unwrap();
        store.store("a.bin", 1, b"bin1").await.unwrap();
        store.store("a.txt", 0, b"txt0").await.unwrap();
        store.store("a.txt", 1, b"txt1").await.unwrap();

        let out = dir.join("out");
        let out_bin = out.join("a.bin");
        let out_txt = out.join("a.txt");
        let (bin, txt) = tokio::join!(
            store.assemble("a.bin", 2, &out_bin),
            store.assemble("a.txt", 2, &out_txt),
        );
        assert_eq!(bin.unwrap(), 8);
        assert_eq!(txt.unwrap(), 8);
        assert_eq!(fs::read(out.join("a.bin")).await.unwrap(), b"bin0bin1");
        assert_eq!(fs::read(out.join("a.txt")).await.unwrap(), b"txt0txt1");
        assert!(!fs::try_exists(out.join("a.bin.assembling")).await.unwrap());
        assert!(!fs::try_exists(out.join("a.assembling")).await.unwrap());

        let _ = fs::remove_dir_all(dir).await;
    }
}
