//! UNDO/REDO FIFO record framing (spec §3/§4.2): a 16-byte header, a
//! variable-length payload, and a mirroring tail. Grounded on the teacher's
//! `disk_v2::record::Record` — a checksummed, self-describing record type
//! written into a log — generalized from rkyv's zero-copy archive framing
//! to a plain length-prefixed frame, since the FIFO here is read
//! sequentially by recovery rather than mapped and indexed randomly.

use crate::layout::crc::{crc32_multi, verify};

pub const FIFO_SIGNATURE: u32 = 0xC4FF_0001;
/// Every record begins at a fixed alignment boundary (spec §4.2: "512B in
/// the reference layout").
pub const FIFO_ALIGN: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FifoRecordType {
    Pad = 0,
    Undo = 1,
    RedoWrite = 2,
    RedoTermWrite = 3,
    RedoTermTrunc = 4,
    RedoSync = 5,
}

impl FifoRecordType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => FifoRecordType::Pad,
            1 => FifoRecordType::Undo,
            2 => FifoRecordType::RedoWrite,
            3 => FifoRecordType::RedoTermWrite,
            4 => FifoRecordType::RedoTermTrunc,
            5 => FifoRecordType::RedoSync,
            _ => return None,
        })
    }
}

/// 16-byte record header (spec §3): `{signature, type, size, seq, crc}`.
/// `size` is the total on-disk footprint of the record including header and
/// tail, already rounded so the next record starts on a `FIFO_ALIGN`
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoHeader {
    pub signature: u32,
    pub rec_type: FifoRecordType,
    pub size: u32,
    pub seq: u64,
    pub crc: u32,
}

pub const FIFO_HEADER_LEN: usize = 4 + 1 + 3 + 4 + 8 + 4; // signature, type+pad, size, seq, crc
pub const FIFO_TAIL_LEN: usize = 4 + 1 + 3 + 4; // mirrored signature, type+pad, size

impl FifoHeader {
    pub fn encode(&self) -> [u8; FIFO_HEADER_LEN] {
        let mut buf = [0u8; FIFO_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.signature.to_le_bytes());
        buf[4] = self.rec_type as u8;
        buf[8..12].copy_from_slice(&self.size.to_le_bytes());
        buf[12..20].copy_from_slice(&self.seq.to_le_bytes());
        buf[20..24].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < FIFO_HEADER_LEN {
            return None;
        }
        let signature = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let rec_type = FifoRecordType::from_u8(buf[4])?;
        let size = u32::from_le_bytes(buf[8..12].try_into().ok()?);
        let seq = u64::from_le_bytes(buf[12..20].try_into().ok()?);
        let crc = u32::from_le_bytes(buf[20..24].try_into().ok()?);
        Some(FifoHeader {
            signature,
            rec_type,
            size,
            seq,
            crc,
        })
    }
}

/// A fully-framed FIFO record: header, payload, and mirroring tail.
#[derive(Debug, Clone)]
pub struct FifoRecord {
    pub rec_type: FifoRecordType,
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl FifoRecord {
    /// The total framed size of this record, rounded up to the next
    /// [`FIFO_ALIGN`] boundary.
    pub fn framed_len(&self) -> u64 {
        let raw = (FIFO_HEADER_LEN + self.payload.len() + FIFO_TAIL_LEN) as u64;
        align_up(raw, FIFO_ALIGN)
    }

    /// Serializes this record to its on-disk frame, CRC over
    /// header-minus-crc plus payload, per spec §4.2.
    pub fn encode(&self) -> Vec<u8> {
        let framed_len = self.framed_len() as usize;
        let size = framed_len as u32;

        let mut header = FifoHeader {
            signature: FIFO_SIGNATURE,
            rec_type: self.rec_type,
            size,
            seq: self.seq,
            crc: 0,
        };
        let header_bytes_for_crc = {
            let mut h = header.encode();
            h[20..24].copy_from_slice(&0u32.to_le_bytes());
            h
        };
        header.crc = crc32_multi(&[&header_bytes_for_crc, &self.payload]);

        let mut out = Vec::with_capacity(framed_len);
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&self.payload);

        // Tail mirrors signature/type/size so backward scans (stage1 undo
        // replay, spec §4.2) can validate record boundaries without
        // re-reading the head.
        out.extend_from_slice(&FIFO_SIGNATURE.to_le_bytes());
        out.push(self.rec_type as u8);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&size.to_le_bytes());

        out.resize(framed_len, 0);
        out
    }

    /// Parses a frame starting at `buf[0]`. Returns the record and the
    /// number of bytes consumed (`header.size`).
    pub fn decode(buf: &[u8]) -> crate::error::Result<(Self, usize)> {
        let header = FifoHeader::decode(buf).ok_or_else(|| crate::error::HammerError::InvariantViolation {
            detail: "truncated fifo record header".to_string(),
        })?;
        if header.signature != FIFO_SIGNATURE {
            return Err(crate::error::HammerError::InvariantViolation {
                detail: format!("bad fifo signature {:#x}", header.signature),
            });
        }
        let total = header.size as usize;
        if buf.len() < total || total < FIFO_HEADER_LEN + FIFO_TAIL_LEN {
            return Err(crate::error::HammerError::InvariantViolation {
                detail: "fifo record size out of range".to_string(),
            });
        }
        let payload_len = total - FIFO_HEADER_LEN - FIFO_TAIL_LEN;
        let payload = buf[FIFO_HEADER_LEN..FIFO_HEADER_LEN + payload_len].to_vec();

        let mut header_bytes_for_crc = buf[0..FIFO_HEADER_LEN].to_vec();
        header_bytes_for_crc[20..24].copy_from_slice(&0u32.to_le_bytes());
        let computed = crc32_multi(&[&header_bytes_for_crc, &payload]);
        verify(header.crc, computed)?;

        Ok((
            FifoRecord {
                rec_type: header.rec_type,
                seq: header.seq,
                payload,
            },
            total,
        ))
    }
}

/// Encodes a PAD record of exactly `len` bytes (spec §4.2: "filler; no
/// sequence; skipped"). PAD records carry no sequence number and no CRC
/// check is meaningful on their (zeroed) payload, but the header is still
/// written so a backward scan recognizes the frame boundary.
pub fn encode_pad(len: u64) -> Vec<u8> {
    assert!(len >= (FIFO_HEADER_LEN + FIFO_TAIL_LEN) as u64);
    let header = FifoHeader {
        signature: FIFO_SIGNATURE,
        rec_type: FifoRecordType::Pad,
        size: len as u32,
        seq: 0,
        crc: 0,
    };
    let mut out = Vec::with_capacity(len as usize);
    out.extend_from_slice(&header.encode());
    out.resize(len as usize, 0);
    out
}

pub fn align_up(v: u64, align: u64) -> u64 {
    (v + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let rec = FifoRecord {
            rec_type: FifoRecordType::Undo,
            seq: 7,
            payload: b"before-image".to_vec(),
        };
        let encoded = rec.encode();
        assert_eq!(encoded.len() as u64 % FIFO_ALIGN, 0);

        let (decoded, consumed) = FifoRecord::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.payload, b"before-image");
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let rec = FifoRecord {
            rec_type: FifoRecordType::RedoWrite,
            seq: 1,
            payload: b"data".to_vec(),
        };
        let mut encoded = rec.encode();
        let idx = FIFO_HEADER_LEN;
        encoded[idx] ^= 0xFF;
        assert!(FifoRecord::decode(&encoded).is_err());
    }

    #[test]
    fn pad_fills_remainder() {
        let pad = encode_pad(512);
        assert_eq!(pad.len(), 512);
        let header = FifoHeader::decode(&pad).unwrap();
        assert_eq!(header.rec_type, FifoRecordType::Pad);
        assert_eq!(header.size, 512);
    }
}
