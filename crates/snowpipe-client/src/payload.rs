//! Payload builder
//!
//! Turns one buffer snapshot into an NDJSON chunk: one compact JSON object
//! per row, null fields omitted, `\n` after every row. The chunk id and
//! MD5 checksum are computed for diagnostics and the transport's header
//! hook; the append call does not transmit them by default.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use md5::{Digest, Md5};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SchemaError;
use crate::normalize::normalize_row;
use crate::schema::TableSchema;
use crate::value::Row;

/// Metadata describing a built chunk
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    /// Rows serialized into the chunk
    pub row_count: usize,
    /// Chunk size in bytes
    pub size_bytes: usize,
    /// Base64 MD5 over the chunk bytes
    pub checksum: String,
    /// Offset token to attach to the append, if any
    pub offset_token: Option<String>,
}

/// One atomically-built append payload
#[derive(Debug, Clone)]
pub struct Chunk {
    /// `{channel}-{utc timestamp}-{uuid}`; unique per build
    pub chunk_id: String,
    /// NDJSON bytes
    pub data: Vec<u8>,
    /// Diagnostics and header-hook metadata
    pub metadata: ChunkMetadata,
}

/// Build a chunk from a buffer snapshot
///
/// # Errors
///
/// Fails deterministically on the first row that violates the schema; no
/// partial chunk is produced.
pub fn build_chunk(
    channel_name: &str,
    schema: &TableSchema,
    rows: &[Row],
    offset_token: Option<String>,
) -> Result<Chunk, SchemaError> {
    let mut data = Vec::new();
    for row in rows {
        let map = normalize_row(schema, row)?;
        let line = serde_json::to_vec(&Value::Object(map))
            .map_err(|e| SchemaError::Serialize(e.to_string()))?;
        data.extend_from_slice(&line);
        data.push(b'\n');
    }

    let checksum = BASE64.encode(Md5::digest(&data));
    let chunk_id = format!(
        "{}-{}-{}",
        channel_name,
        Utc::now().format("%Y%m%dT%H%M%S%3f"),
        Uuid::new_v4().simple()
    );

    Ok(Chunk {
        chunk_id,
        metadata: ChunkMetadata {
            row_count: rows.len(),
            size_bytes: data.len(),
            checksum,
            offset_token,
        },
        data,
    })
}
