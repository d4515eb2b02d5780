//! Portable snapshots of a whole store.
//!
//! Layout: `b"NMSNAP"`, `u16` LE snapshot version, `u8` codec id, then the
//! bincode encoded [`StorageDump`], compressed by the codec.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;

use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use bytes::{Buf, BufMut};
use index::{BucketId, StorageBackend, StorageDump};
use tokenize::Tokenizer;
use tracing::info;
use zstd::stream::{decode_all, encode_all};

use crate::error::StoreError;
use crate::settings::KEY_FORMAT_VERSION;
use crate::store::SimilarityStore;

pub const SNAPSHOT_MAGIC: &[u8; 6] = b"NMSNAP";
pub const SNAPSHOT_VERSION: u16 = 1;

const HEADER_LEN: usize = SNAPSHOT_MAGIC.len() + 2 + 1;

/// Compression codec for snapshot payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressionCodec {
    None,
    /// Zstd compression (default, good balance of speed and ratio).
    #[default]
    Zstd,
}

impl CompressionCodec {
    fn id(self) -> u8 {
        match self {
            CompressionCodec::None => 0,
            CompressionCodec::Zstd => 1,
        }
    }

    fn from_id(id: u8) -> Result<Self, StoreError> {
        match id {
            0 => Ok(CompressionCodec::None),
            1 => Ok(CompressionCodec::Zstd),
            other => Err(StoreError::Snapshot(format!("unknown codec id {other}"))),
        }
    }
}

/// Compression behavior configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionConfig {
    pub codec: CompressionCodec,
    /// Compression level (1-22 for Zstd, where higher = better compression but slower).
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: CompressionCodec::default(),
            level: 3,
        }
    }
}

impl CompressionConfig {
    pub fn new(codec: CompressionCodec, level: i32) -> Self {
        Self { codec, level }
    }

    pub fn with_codec(mut self, codec: CompressionCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => encode_all(data, self.level).map_err(snapshot_err),
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => decode_all(data).map_err(snapshot_err),
        }
    }
}

fn snapshot_err<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Snapshot(err.to_string())
}

impl SimilarityStore {
    /// Serialize everything the backend holds.
    ///
    /// Requires a backend that implements [`StorageBackend::export`].
    pub async fn to_bytes(&self, compression: &CompressionConfig) -> Result<Vec<u8>, StoreError> {
        let start = Instant::now();
        let dump = self.backend().export().await?;
        let encoded = encode_to_vec(&dump, standard()).map_err(snapshot_err)?;
        let payload = compression.compress(&encoded)?;

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.put_slice(SNAPSHOT_MAGIC);
        out.put_u16_le(SNAPSHOT_VERSION);
        out.put_u8(compression.codec.id());
        out.put_slice(&payload);

        info!(
            documents = dump.documents.len(),
            buckets = dump.buckets.len(),
            bytes = out.len(),
            elapsed_micros = start.elapsed().as_micros(),
            "snapshot_written"
        );
        Ok(out)
    }

    pub async fn to_stream<W: Write>(
        &self,
        writer: &mut W,
        compression: &CompressionConfig,
    ) -> Result<(), StoreError> {
        let bytes = self.to_bytes(compression).await?;
        writer.write_all(&bytes).map_err(snapshot_err)?;
        writer.flush().map_err(snapshot_err)
    }

    /// Restore a snapshot into an empty `backend` and open it.
    pub async fn from_bytes(
        bytes: &[u8],
        tokenizer: Arc<dyn Tokenizer>,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, StoreError> {
        let start = Instant::now();
        let dump = decode_snapshot(bytes)?;

        backend.initialize().await?;
        match backend.query_setting(KEY_FORMAT_VERSION).await {
            Ok(_) => {
                return Err(StoreError::Snapshot(
                    "target backend already holds a store".to_string(),
                ));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        replay(&dump, backend.as_ref()).await?;

        info!(
            documents = dump.documents.len(),
            buckets = dump.buckets.len(),
            elapsed_micros = start.elapsed().as_micros(),
            "snapshot_restored"
        );
        Self::load_from_storage(tokenizer, backend).await
    }

    pub async fn from_stream<R: Read>(
        reader: &mut R,
        tokenizer: Arc<dyn Tokenizer>,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, StoreError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(snapshot_err)?;
        Self::from_bytes(&bytes, tokenizer, backend).await
    }
}

fn decode_snapshot(bytes: &[u8]) -> Result<StorageDump, StoreError> {
    if bytes.len() < HEADER_LEN {
        return Err(StoreError::Snapshot("truncated header".to_string()));
    }
    let (magic, mut rest) = bytes.split_at(SNAPSHOT_MAGIC.len());
    if magic != SNAPSHOT_MAGIC {
        return Err(StoreError::Snapshot("bad magic".to_string()));
    }
    let version = rest.get_u16_le();
    if version != SNAPSHOT_VERSION {
        return Err(StoreError::Snapshot(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let codec = CompressionCodec::from_id(rest.get_u8())?;

    let decoded = CompressionConfig::default().with_codec(codec).decompress(rest)?;
    let (dump, read): (StorageDump, usize) =
        decode_from_slice(&decoded, standard()).map_err(snapshot_err)?;
    if read != decoded.len() {
        return Err(StoreError::Snapshot("trailing bytes after dump".to_string()));
    }
    if !dump.settings.contains_key(KEY_FORMAT_VERSION) {
        return Err(StoreError::Snapshot("dump holds no store".to_string()));
    }
    Ok(dump)
}

/// Write the dump so that `format_version` lands last.
async fn replay(dump: &StorageDump, backend: &dyn StorageBackend) -> Result<(), StoreError> {
    for (key, value) in &dump.settings {
        if key != KEY_FORMAT_VERSION {
            backend.insert_setting(key, value).await?;
        }
    }
    for (&id, record) in &dump.documents {
        backend.insert_document(id, record.clone()).await?;
    }
    for (&bucket, ids) in &dump.buckets {
        for &id in ids {
            backend.add_document_to_bucket(BucketId(bucket), id).await?;
        }
    }
    if let Some(version) = dump.settings.get(KEY_FORMAT_VERSION) {
        backend.insert_setting(KEY_FORMAT_VERSION, version).await?;
    }
    Ok(())
}
