//! CRC32 (IEEE) block checksums and their on-disk text form

use crate::error::{DfsError, Result};
use crc32fast::Hasher;

/// Checksum of a complete payload
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Incremental checksum over a stream of chunks
#[derive(Default, Clone)]
pub struct StreamingChecksum {
    hasher: Hasher,
    bytes: u64,
}

impl StreamingChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

/// Sidecar contents for a checksum: plain decimal text
pub fn encode_sidecar(value: u32) -> String {
    value.to_string()
}

/// Parse sidecar contents written by [`encode_sidecar`]
pub fn decode_sidecar(block_id: &str, contents: &str) -> Result<u32> {
    contents.trim().parse::<u32>().map_err(|e| {
        DfsError::ChecksumUnavailable(format!(
            "unparsable checksum for block {}: {}",
            block_id, e
        ))
    })
}

/// Compare a computed checksum against the stored one
pub fn verify(block_id: &str, calculated: u32, stored: u32) -> Result<()> {
    if calculated != stored {
        return Err(DfsError::ChecksumMismatch {
            block_id: block_id.to_string(),
            calculated,
            stored,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_matches_oneshot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let mut streaming = StreamingChecksum::new();
        for chunk in data.chunks(777) {
            streaming.update(chunk);
        }
        assert_eq!(streaming.bytes(), data.len() as u64);
        assert_eq!(streaming.finalize(), checksum(&data));
    }

    #[test]
    fn test_known_value() {
        // CRC32/IEEE check value
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_sidecar_text() {
        let value = checksum(b"hello");
        let text = encode_sidecar(value);
        assert_eq!(decode_sidecar("b", &format!("{}\n", text)).unwrap(), value);
        assert!(matches!(
            decode_sidecar("b", "garbage"),
            Err(DfsError::ChecksumUnavailable(_))
        ));
    }

    #[test]
    fn test_verify() {
        assert!(verify("b", 7, 7).is_ok());
        let err = verify("b", 7, 8).unwrap_err();
        assert!(err.is_corruption());
    }
}
