//! Wire format: `u32 length | u8 type | payload`. Hand-encoded rather than
//! through `serde` because these bytes are a contract with other-language
//! workers, the same reasoning the teacher applies to its own TCP wire code.

use crate::error::{CoreError, Result};
use crate::ids::{OperatorId, PartitionKey, QueryId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Register = 0x01,
    Data = 0x02,
    Eos = 0x03,
    Credit = 0x04,
    Error = 0x7F,
}

impl FrameType {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            0x01 => Ok(FrameType::Register),
            0x02 => Ok(FrameType::Data),
            0x03 => Ok(FrameType::Eos),
            0x04 => Ok(FrameType::Credit),
            0x7F => Ok(FrameType::Error),
            other => Err(CoreError::CodecError(format!("unknown frame type 0x{other:02x}"))),
        }
    }
}

/// Encodes one frame: 4-byte length (type byte + payload), 1-byte type, payload.
pub fn encode_frame(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let length = (payload.len() + 1) as u32;
    let mut out = Vec::with_capacity(4 + 1 + payload.len());
    out.extend_from_slice(&length.to_le_bytes());
    out.push(frame_type as u8);
    out.extend_from_slice(payload);
    out
}

/// Parses one frame from the front of `buf`, if a full frame is present.
/// Returns the frame type, its payload, and the number of bytes consumed.
pub fn try_decode_frame(buf: &[u8]) -> Result<Option<(FrameType, Vec<u8>, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let length = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if buf.len() < 4 + length {
        return Ok(None);
    }
    let frame_type = FrameType::from_u8(buf[4])?;
    let payload = buf[5..4 + length].to_vec();
    Ok(Some((frame_type, payload, 4 + length)))
}

/// `u64 origin_id, u64 sequence_number, u32 chunk_number, u8 last_chunk,
/// u64 watermark_ts, u64 creation_ts, u32 num_tuples, u32 payload_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetadataHeader {
    pub origin_id: u64,
    pub sequence_number: u64,
    pub chunk_number: u32,
    pub last_chunk: bool,
    pub watermark_ts: u64,
    pub creation_ts: u64,
    pub num_tuples: u32,
    pub payload_size: u32,
}

pub const METADATA_HEADER_LEN: usize = 8 + 8 + 4 + 1 + 8 + 8 + 4 + 4;

impl MetadataHeader {
    pub fn encode(&self) -> [u8; METADATA_HEADER_LEN] {
        let mut out = [0u8; METADATA_HEADER_LEN];
        let mut o = 0;
        out[o..o + 8].copy_from_slice(&self.origin_id.to_le_bytes());
        o += 8;
        out[o..o + 8].copy_from_slice(&self.sequence_number.to_le_bytes());
        o += 8;
        out[o..o + 4].copy_from_slice(&self.chunk_number.to_le_bytes());
        o += 4;
        out[o] = self.last_chunk as u8;
        o += 1;
        out[o..o + 8].copy_from_slice(&self.watermark_ts.to_le_bytes());
        o += 8;
        out[o..o + 8].copy_from_slice(&self.creation_ts.to_le_bytes());
        o += 8;
        out[o..o + 4].copy_from_slice(&self.num_tuples.to_le_bytes());
        o += 4;
        out[o..o + 4].copy_from_slice(&self.payload_size.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < METADATA_HEADER_LEN {
            return Err(CoreError::CodecError("metadata header truncated".into()));
        }
        let mut o = 0;
        let origin_id = u64::from_le_bytes(bytes[o..o + 8].try_into().unwrap());
        o += 8;
        let sequence_number = u64::from_le_bytes(bytes[o..o + 8].try_into().unwrap());
        o += 8;
        let chunk_number = u32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());
        o += 4;
        let last_chunk = bytes[o] != 0;
        o += 1;
        let watermark_ts = u64::from_le_bytes(bytes[o..o + 8].try_into().unwrap());
        o += 8;
        let creation_ts = u64::from_le_bytes(bytes[o..o + 8].try_into().unwrap());
        o += 8;
        let num_tuples = u32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());
        o += 4;
        let payload_size = u32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());
        Ok(Self {
            origin_id,
            sequence_number,
            chunk_number,
            last_chunk,
            watermark_ts,
            creation_ts,
            num_tuples,
            payload_size,
        })
    }
}

pub const PARTITION_KEY_LEN: usize = 8 + 8 + 4 + 4;

pub fn encode_partition_key(key: &PartitionKey) -> [u8; PARTITION_KEY_LEN] {
    let mut out = [0u8; PARTITION_KEY_LEN];
    out[0..8].copy_from_slice(&key.query_id.get().to_le_bytes());
    out[8..16].copy_from_slice(&key.operator_id.get().to_le_bytes());
    out[16..20].copy_from_slice(&key.partition_id.to_le_bytes());
    out[20..24].copy_from_slice(&key.sub_partition_id.to_le_bytes());
    out
}

pub fn decode_partition_key(bytes: &[u8]) -> Result<PartitionKey> {
    if bytes.len() < PARTITION_KEY_LEN {
        return Err(CoreError::CodecError("partition key truncated".into()));
    }
    Ok(PartitionKey::new(
        QueryId::new(u64::from_le_bytes(bytes[0..8].try_into().unwrap())),
        OperatorId::new(u64::from_le_bytes(bytes[8..16].try_into().unwrap())),
        u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
        u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
    ))
}

/// Encodes a Data frame's payload: partition, metadata header, then the
/// buffer's bytes.
pub fn encode_data_payload(partition: &PartitionKey, header: &MetadataHeader, buffer_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PARTITION_KEY_LEN + METADATA_HEADER_LEN + buffer_bytes.len());
    out.extend_from_slice(&encode_partition_key(partition));
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(buffer_bytes);
    out
}

pub fn decode_data_payload(payload: &[u8]) -> Result<(PartitionKey, MetadataHeader, &[u8])> {
    if payload.len() < PARTITION_KEY_LEN + METADATA_HEADER_LEN {
        return Err(CoreError::CodecError("data frame truncated".into()));
    }
    let partition = decode_partition_key(&payload[..PARTITION_KEY_LEN])?;
    let header = MetadataHeader::decode(&payload[PARTITION_KEY_LEN..PARTITION_KEY_LEN + METADATA_HEADER_LEN])?;
    let bytes = &payload[PARTITION_KEY_LEN + METADATA_HEADER_LEN..];
    Ok((partition, header, bytes))
}
