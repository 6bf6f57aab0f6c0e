//! Gzip compression for cold-tier payloads
//!
//! The gzip header itself is the stored marker: serialized JSON never starts
//! with `0x1f`, so a reader can tell compressed from plain objects without
//! any side-channel metadata.

use bytes::Bytes;
use cachegate_core::{CoreError, CoreResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression configuration
#[derive(Debug, Clone, Copy)]
pub struct CompressionConfig {
    /// Compression level (0-9)
    pub level: u32,
    pub enabled: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: 9,
            enabled: true,
        }
    }
}

impl CompressionConfig {
    pub fn disabled() -> Self {
        Self {
            level: 0,
            enabled: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.level > 9 {
            return Err(format!(
                "Invalid compression level: {} (max: 9)",
                self.level
            ));
        }
        Ok(())
    }

    fn compression_level(&self) -> Compression {
        match self.level {
            0 => Compression::none(),
            1 => Compression::fast(),
            9 => Compression::best(),
            n => Compression::new(n),
        }
    }
}

/// Whether `data` carries the gzip marker.
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Compress bytes with gzip when enabled, otherwise pass them through.
pub fn compress(data: &[u8], config: CompressionConfig) -> CoreResult<Bytes> {
    if !config.enabled {
        return Ok(Bytes::copy_from_slice(data));
    }

    let mut encoder = GzEncoder::new(Vec::new(), config.compression_level());
    encoder
        .write_all(data)
        .map_err(|e| CoreError::Serialization(format!("Gzip compression failed: {}", e)))?;

    let compressed = encoder
        .finish()
        .map_err(|e| CoreError::Serialization(format!("Gzip finish failed: {}", e)))?;

    Ok(Bytes::from(compressed))
}

/// Reverse [`compress`]: gunzip marked payloads, return others unchanged.
pub fn decompress(data: Bytes) -> CoreResult<Bytes> {
    if !is_gzip(&data) {
        return Ok(data);
    }

    let mut decoder = GzDecoder::new(data.as_ref());
    let mut decompressed = Vec::new();

    decoder.read_to_end(&mut decompressed).map_err(|e| {
        CoreError::Serialization(format!("Gzip decompression failed: {}", e))
    })?;

    Ok(Bytes::from(decompressed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_payload_carries_marker() {
        let json = br#"{"x":1,"padding":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}"#;
        let compressed = compress(json, CompressionConfig::default()).unwrap();
        assert!(is_gzip(&compressed));
        assert_eq!(decompress(compressed).unwrap().as_ref(), json);
    }

    #[test]
    fn test_plain_payload_passes_through() {
        let json = br#"[1,2,3]"#;
        let stored = compress(json, CompressionConfig::disabled()).unwrap();
        assert!(!is_gzip(&stored));
        assert_eq!(decompress(stored).unwrap().as_ref(), json);
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        let corrupt = Bytes::from_static(&[0x1f, 0x8b, 0x00, 0x01]);
        assert!(matches!(
            decompress(corrupt),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_level_validation() {
        assert!(CompressionConfig { level: 10, enabled: true }.validate().is_err());
        assert!(CompressionConfig::default().validate().is_ok());
    }
}
