//! On-disk tensor record format
//!
//! ```text
//! magic "TNSR" | version u32 | dtype len u32 | dtype utf-8
//! | ndim u32 | ndim x i64 dims | data len u64 | data
//! ```
//! All integers are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use runtime_core::{Error, Result};
use tracing::warn;

use crate::TensorBlob;

/// Magic bytes for tensor records
pub const RECORD_MAGIC: [u8; 4] = *b"TNSR";

/// Record format version
pub const RECORD_VERSION: u32 = 1;

/// Serialize a blob into a record
pub fn encode(blob: &TensorBlob) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        4 + 4 + 4 + blob.dtype.len() + 4 + blob.shape.len() * 8 + 8 + blob.data.len(),
    );

    buf.put_slice(&RECORD_MAGIC);
    buf.put_u32_le(RECORD_VERSION);

    buf.put_u32_le(blob.dtype.len() as u32);
    buf.put_slice(blob.dtype.as_bytes());

    buf.put_u32_le(blob.shape.len() as u32);
    for dim in &blob.shape {
        buf.put_i64_le(*dim);
    }

    buf.put_u64_le(blob.data.len() as u64);
    buf.put_slice(&blob.data);

    buf.freeze()
}

/// Parse a record read back from the store
pub fn decode(key: &str, record: Bytes) -> Result<TensorBlob> {
    let malformed = |reason: &str| Error::MalformedTensor {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let mut buf = record;

    if buf.remaining() < 8 {
        return Err(malformed("record shorter than its header"));
    }
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != RECORD_MAGIC {
        return Err(malformed("invalid record magic"));
    }

    let version = buf.get_u32_le();
    if version != RECORD_VERSION {
        warn!(key, version, "Unknown tensor record version");
        return Err(Error::MalformedTensor {
            key: key.to_string(),
            reason: format!("unsupported record version {}", version),
        });
    }

    if buf.remaining() < 4 {
        return Err(malformed("truncated dtype length"));
    }
    let dtype_len = buf.get_u32_le() as usize;
    if buf.remaining() < dtype_len {
        return Err(malformed("truncated dtype"));
    }
    let dtype = String::from_utf8(buf.split_to(dtype_len).to_vec())
        .map_err(|_| malformed("dtype is not valid utf-8"))?;

    if buf.remaining() < 4 {
        return Err(malformed("truncated shape length"));
    }
    let ndim = buf.get_u32_le() as usize;
    if buf.remaining() < ndim.saturating_mul(8) {
        return Err(malformed("truncated shape"));
    }
    let shape = (0..ndim).map(|_| buf.get_i64_le()).collect();

    if buf.remaining() < 8 {
        return Err(malformed("truncated data length"));
    }
    let data_len = buf.get_u64_le() as usize;
    if buf.remaining() != data_len {
        return Err(malformed("data length does not match the record"));
    }

    Ok(TensorBlob {
        dtype,
        shape,
        data: buf,
    })
}
