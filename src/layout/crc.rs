//! CRC compute/verify helpers shared by every on-disk structure (volume
//! header, layer1/layer2 entries, B-Tree nodes, FIFO records). Grounded on
//! the teacher's `disk_v2::record` checksum pattern, which also computes a
//! CRC over a header-plus-payload span using `crc32fast`.

use crc32fast::Hasher;

/// Computes the CRC32 of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Computes the CRC32 over the concatenation of several byte spans, without
/// needing to copy them into one contiguous buffer first. Used for the
/// "header-minus-crc-field + payload" CRC domain that FIFO records and
/// on-disk structs share.
pub fn crc32_multi(spans: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for span in spans {
        hasher.update(span);
    }
    hasher.finalize()
}

/// Returns `Ok(())` if `computed` matches `expected`, otherwise a
/// [`crate::error::HammerError::CrcMismatch`].
pub fn verify(expected: u32, computed: u32) -> crate::error::Result<()> {
    if expected == computed {
        Ok(())
    } else {
        Err(crate::error::HammerError::CrcMismatch { expected, computed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_span_matches_concatenated() {
        let a = b"hello ";
        let b = b"world";
        let mut combined = Vec::new();
        combined.extend_from_slice(a);
        combined.extend_from_slice(b);
        assert_eq!(crc32_multi(&[a, b]), crc32(&combined));
    }

    #[test]
    fn verify_rejects_mismatch() {
        assert!(verify(1, 2).is_err());
        assert!(verify(42, 42).is_ok());
    }
}
