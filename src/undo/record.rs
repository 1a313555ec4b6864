//! Typed UNDO/REDO payloads layered over [`crate::layout::fifo_record`]
//! (spec §4.2). The FIFO frame itself (header, CRC, tail, padding) is the
//! layout layer's concern; this module only encodes/decodes the five
//! payload shapes spec.md names.

use crate::error::{HammerError, Result};

/// "Before" image of `before.len()` bytes at `zone_offset` (spec §4.2:
/// "Emitted transparently by C2.modify").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoPayload {
    pub zone_offset: u64,
    pub before: Vec<u8>,
}

impl UndoPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.before.len());
        out.extend_from_slice(&self.zone_offset.to_le_bytes());
        out.extend_from_slice(&self.before);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(truncated());
        }
        let zone_offset = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        Ok(UndoPayload {
            zone_offset,
            before: buf[8..].to_vec(),
        })
    }
}

/// "After" image for fast fsync of regular-file data (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoWritePayload {
    pub obj_id: u64,
    pub localization: u16,
    pub file_off: u64,
    pub payload: Vec<u8>,
}

impl RedoWritePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(18 + self.payload.len());
        out.extend_from_slice(&self.obj_id.to_le_bytes());
        out.extend_from_slice(&self.localization.to_le_bytes());
        out.extend_from_slice(&self.file_off.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 18 {
            return Err(truncated());
        }
        Ok(RedoWritePayload {
            obj_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            localization: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            file_off: u64::from_le_bytes(buf[10..18].try_into().unwrap()),
            payload: buf[18..].to_vec(),
        })
    }

    pub fn key(&self) -> (u64, u16, u64) {
        (self.obj_id, self.localization, self.file_off)
    }
}

/// Tombstone for an earlier [`RedoWritePayload`], written as the
/// corresponding B-Tree entry is synced (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedoTermWritePayload {
    pub obj_id: u64,
    pub localization: u16,
    pub file_off: u64,
    pub len: u32,
}

impl RedoTermWritePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(22);
        out.extend_from_slice(&self.obj_id.to_le_bytes());
        out.extend_from_slice(&self.localization.to_le_bytes());
        out.extend_from_slice(&self.file_off.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 22 {
            return Err(truncated());
        }
        Ok(RedoTermWritePayload {
            obj_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            localization: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            file_off: u64::from_le_bytes(buf[10..18].try_into().unwrap()),
            len: u32::from_le_bytes(buf[18..22].try_into().unwrap()),
        })
    }

    pub fn key(&self) -> (u64, u16, u64) {
        (self.obj_id, self.localization, self.file_off)
    }
}

/// Same as [`RedoTermWritePayload`] but for truncations (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedoTermTruncPayload {
    pub obj_id: u64,
    pub localization: u16,
    pub file_off: u64,
}

impl RedoTermTruncPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(18);
        out.extend_from_slice(&self.obj_id.to_le_bytes());
        out.extend_from_slice(&self.localization.to_le_bytes());
        out.extend_from_slice(&self.file_off.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 18 {
            return Err(truncated());
        }
        Ok(RedoTermTruncPayload {
            obj_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            localization: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            file_off: u64::from_le_bytes(buf[10..18].try_into().unwrap()),
        })
    }

    pub fn key(&self) -> (u64, u16, u64) {
        (self.obj_id, self.localization, self.file_off)
    }
}

/// Placemark: stage2 recovery spans only from the latest one onward (spec
/// §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedoSyncPayload {
    pub offset: u64,
}

impl RedoSyncPayload {
    pub fn encode(&self) -> Vec<u8> {
        self.offset.to_le_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(truncated());
        }
        Ok(RedoSyncPayload {
            offset: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
        })
    }
}

fn truncated() -> HammerError {
    HammerError::InvariantViolation {
        detail: "truncated undo/redo payload".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_payload_round_trips() {
        let p = UndoPayload {
            zone_offset: 0xdead_beef,
            before: vec![1, 2, 3, 4],
        };
        let decoded = UndoPayload::decode(&p.encode()).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn redo_write_round_trips_and_keys_match_term() {
        let write = RedoWritePayload {
            obj_id: 7,
            localization: 1,
            file_off: 4096,
            payload: vec![9; 32],
        };
        let term = RedoTermWritePayload {
            obj_id: 7,
            localization: 1,
            file_off: 4096,
            len: 32,
        };
        assert_eq!(write.key(), term.key());
        assert_eq!(RedoWritePayload::decode(&write.encode()).unwrap(), write);
    }
}
