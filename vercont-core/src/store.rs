//! Content store
//!
//! Content-addressed, deduplicated blob storage. Each blob lives in
//! `objects/{hash[0..2]}/{hash[2..]}` as a codec-tagged, bincode-encoded
//! [`BlobRecord`]: either the full bytes or a patch against another blob.
//! Which of the two was chosen is never visible through [`ContentStore::get`].

use bytes::Bytes;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::codec::{self, Codec};
use crate::config::StoreConfig;
use crate::diff::{self, Patch};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::hash::BlobHash;
use crate::lock::WriteLock;

/// On-disk representation of a blob
#[derive(Debug, Clone, Serialize, Deserialize)]
enum BlobRecord {
    Full(Vec<u8>),
    Delta {
        base: BlobHash,
        /// Number of delta records between this one and a full record
        depth: u32,
        patch: Patch,
    },
}

impl BlobRecord {
    fn depth(&self) -> u32 {
        match self {
            BlobRecord::Full(_) => 0,
            BlobRecord::Delta { depth, .. } => *depth,
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub blobs: usize,
    pub delta_blobs: usize,
    /// Bytes occupied on disk by object files
    pub stored_bytes: u64,
}

/// Content-addressed blob store
pub struct ContentStore {
    root: PathBuf,
    codec: Box<dyn Codec>,
    config: StoreConfig,
    cache: Option<Mutex<LruCache<BlobHash, Bytes>>>,
}

impl ContentStore {
    /// Open or create a store rooted at `root` (the `objects` directory)
    pub fn open(root: &Path, config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(root)?;
        let codec = codec::codec_for(config.codec, config.compression_level);
        let cache = NonZeroUsize::new(config.cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Ok(Self {
            root: root.to_path_buf(),
            codec,
            config,
            cache,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn object_path(&self, hash: &BlobHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// Check whether a blob is stored
    pub fn contains(&self, hash: BlobHash) -> bool {
        self.object_path(&hash).is_file()
    }

    /// Store bytes and return their hash. Storing known content is a no-op.
    pub fn put(&self, lock: &WriteLock, data: &[u8]) -> Result<BlobHash> {
        self.put_with_base(lock, data, None)
    }

    /// Store bytes, optionally as a delta against `base` when that is
    /// cheaper. The base is only a hint; a missing or unsuitable base falls
    /// back to full storage.
    pub fn put_with_base(
        &self,
        _lock: &WriteLock,
        data: &[u8],
        base: Option<BlobHash>,
    ) -> Result<BlobHash> {
        let hash = BlobHash::from_data(data);
        if self.contains(hash) {
            tracing::debug!("Blob {} already stored", hash.short());
            return Ok(hash);
        }

        let delta = match base {
            Some(base) if base != hash => self.delta_against(base, data)?,
            _ => None,
        };
        let record = match delta {
            Some(record) => {
                tracing::debug!("Storing blob {} as delta", hash.short());
                record
            }
            None => {
                tracing::debug!("Storing blob {} in full ({} bytes)", hash.short(), data.len());
                BlobRecord::Full(data.to_vec())
            }
        };

        self.write_record(&hash, &record)?;
        Ok(hash)
    }

    /// Retrieve the exact original bytes of a blob
    pub fn get(&self, hash: BlobHash) -> Result<Bytes> {
        if let Some(bytes) = self.cache_get(&hash) {
            return Ok(bytes);
        }

        // Walk down to the nearest full (or cached) record, then replay the
        // patches back up.
        let mut patches = Vec::new();
        let mut seen = HashSet::new();
        let mut current = hash;
        let mut data = loop {
            if !seen.insert(current) {
                return Err(Error::Corrupted(format!("delta cycle at blob {}", current)));
            }
            if current != hash {
                if let Some(bytes) = self.cache_get(&current) {
                    break bytes.to_vec();
                }
            }
            match self.read_record(&current)? {
                BlobRecord::Full(data) => break data,
                BlobRecord::Delta { base, patch, .. } => {
                    patches.push(patch);
                    current = base;
                }
            }
        };
        while let Some(patch) = patches.pop() {
            data = diff::apply(&data, &patch)?;
        }

        if BlobHash::from_data(&data) != hash {
            return Err(Error::Corrupted(format!("blob {} does not match its hash", hash)));
        }

        let bytes = Bytes::from(data);
        self.cache_put(hash, bytes.clone());
        Ok(bytes)
    }

    /// Number of stored blobs
    pub fn blob_count(&self) -> Result<usize> {
        Ok(self.object_files()?.len())
    }

    /// Walk all objects and report counts and sizes
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for (hash, path) in self.object_files()? {
            stats.blobs += 1;
            stats.stored_bytes += fs::metadata(&path)?.len();
            if matches!(self.read_record(&hash)?, BlobRecord::Delta { .. }) {
                stats.delta_blobs += 1;
            }
        }
        Ok(stats)
    }

    fn delta_against(&self, base: BlobHash, data: &[u8]) -> Result<Option<BlobRecord>> {
        if self.config.max_delta_chain == 0
            || data.len() < self.config.min_delta_size
            || !diff::is_text(data)
        {
            return Ok(None);
        }

        let depth = match self.read_record(&base) {
            Ok(record) => record.depth(),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if depth >= self.config.max_delta_chain {
            return Ok(None);
        }

        let base_bytes = self.get(base)?;
        let patch = diff::diff(&base_bytes, data);
        if patch.is_full_replacement() {
            return Ok(None);
        }
        let patch_size = bincode::serialized_size(&patch)?;
        if patch_size.saturating_mul(2) > data.len() as u64 {
            return Ok(None);
        }

        Ok(Some(BlobRecord::Delta {
            base,
            depth: depth + 1,
            patch,
        }))
    }

    fn read_record(&self, hash: &BlobHash) -> Result<BlobRecord> {
        let path = self.object_path(hash);
        let sealed = match fs::read(&path) {
            Ok(sealed) => sealed,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::BlobNotFound(*hash));
            }
            Err(e) => return Err(e.into()),
        };
        let raw = codec::open(&sealed)
            .map_err(|e| Error::Corrupted(format!("blob {}: {}", hash, e)))?;
        Ok(bincode::deserialize(&raw)?)
    }

    fn write_record(&self, hash: &BlobHash, record: &BlobRecord) -> Result<()> {
        let raw = bincode::serialize(record)?;
        let sealed = codec::seal(self.codec.as_ref(), &raw)?;
        fsutil::write_atomic(&self.object_path(hash), &sealed)?;
        Ok(())
    }

    fn object_files(&self) -> Result<Vec<(BlobHash, PathBuf)>> {
        let mut files = Vec::new();
        for fanout in fs::read_dir(&self.root)? {
            let fanout = fanout?;
            if !fanout.file_type()?.is_dir() {
                continue;
            }
            let prefix = fanout.file_name().to_string_lossy().into_owned();
            for entry in fs::read_dir(fanout.path())? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                // Skips in-flight temporaries, which carry an extension.
                if let Ok(hash) = BlobHash::from_hex(&format!("{}{}", prefix, name)) {
                    files.push((hash, entry.path()));
                }
            }
        }
        Ok(files)
    }

    fn cache_get(&self, hash: &BlobHash) -> Option<Bytes> {
        let mut cache = self.cache.as_ref()?.lock().ok()?;
        let hit = cache.get(hash).cloned();
        if hit.is_some() {
            tracing::debug!("Blob cache hit {}", hash.short());
        }
        hit
    }

    fn cache_put(&self, hash: BlobHash, bytes: Bytes) {
        if let Some(Ok(mut cache)) = self.cache.as_ref().map(|c| c.lock()) {
            cache.put(hash, bytes);
        }
    }
}
