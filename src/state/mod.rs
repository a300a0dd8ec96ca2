//! Persisted state format (spec section 6 / "4.M"): the envelope every
//! operator handler's serialized state carries, and the `AggregationState`
//! payload specifically. Encoding goes through explicit wire structs and
//! `bincode` rather than deriving `Serialize` on `OffsetHashMap` directly,
//! because the field order and sizes here are a contract with other workers,
//! not an accident of Rust struct layout — mirrors the source's
//! `SerializableAggregationOperatorHandler::serialize`/`deserialize` split
//! between in-memory state and its wire `State::AggregationState` payload.

use crate::error::Result;
use crate::hashmap::OffsetHashMap;
use bincode::config::standard;
use serde::{Deserialize, Serialize};

pub const STATE_TYPE_AGGREGATION: u32 = 1;
pub const STATE_FORMAT_VERSION: u32 = 1;

/// `u32 version, u32 state_type, u32 payload_length, payload_bytes`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StateEnvelope {
    pub version: u32,
    pub state_type: u32,
    pub payload: Vec<u8>,
}

impl StateEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, standard())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (envelope, _) = bincode::serde::decode_from_slice(bytes, standard())?;
        Ok(envelope)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HashMapConfig {
    pub key_size: u32,
    pub value_size: u32,
    pub bucket_count: u32,
    pub page_size: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SerializedHashMap {
    pub bucket_count: u32,
    pub chains: Vec<u32>,
    pub arena_length: u32,
    pub arena_bytes: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WindowMetadata {
    pub start: u64,
    pub end: u64,
    pub first_map_index: u32,
    pub map_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AggregationMetadata {
    pub operator_id: u64,
    pub processed_records: u64,
    pub last_watermark: u64,
    pub version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AggregationState {
    pub metadata: AggregationMetadata,
    pub config: HashMapConfig,
    pub maps: Vec<SerializedHashMap>,
    pub windows: Vec<WindowMetadata>,
}

pub fn encode_hash_map(map: &OffsetHashMap) -> SerializedHashMap {
    let (buckets, arena) = map.raw_parts();
    SerializedHashMap {
        bucket_count: map.bucket_count() as u32,
        chains: buckets.to_vec(),
        arena_length: arena.len() as u32,
        arena_bytes: arena.to_vec(),
    }
}

pub fn decode_hash_map(serialized: &SerializedHashMap, key_size: usize, value_size: usize) -> OffsetHashMap {
    let entry_count_hint = serialized
        .arena_bytes
        .len()
        .saturating_sub(4 + 8 + key_size + value_size)
        / (4 + 8 + key_size + value_size).max(1);
    OffsetHashMap::from_raw_parts(
        key_size,
        value_size,
        serialized.bucket_count as usize,
        serialized.chains.clone(),
        serialized.arena_bytes.clone(),
        entry_count_hint,
    )
}

pub fn encode_aggregation_state(state: &AggregationState) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(state, standard())?;
    let envelope = StateEnvelope {
        version: STATE_FORMAT_VERSION,
        state_type: STATE_TYPE_AGGREGATION,
        payload,
    };
    envelope.encode()
}

pub fn decode_aggregation_state(bytes: &[u8]) -> Result<AggregationState> {
    let envelope = StateEnvelope::decode(bytes)?;
    let (state, _) = bincode::serde::decode_from_slice(&envelope.payload, standard())?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_round_trips_through_serialized_form() {
        let mut map = OffsetHashMap::new(8, 8, 1024, 4096).unwrap();
        for k in 0..10_000u64 {
            let key = k.to_le_bytes();
            map.find_or_create(&key, k, |v| v.copy_from_slice(&(k * 2).to_le_bytes()))
                .unwrap();
        }
        let serialized = encode_hash_map(&map);
        let restored = decode_hash_map(&serialized, 8, 8);
        let mut original: Vec<(u64, u64)> = map
            .iter()
            .map(|(k, v)| (u64::from_le_bytes(k.try_into().unwrap()), u64::from_le_bytes(v.try_into().unwrap())))
            .collect();
        let mut round_tripped: Vec<(u64, u64)> = restored
            .iter()
            .map(|(k, v)| (u64::from_le_bytes(k.try_into().unwrap()), u64::from_le_bytes(v.try_into().unwrap())))
            .collect();
        original.sort_unstable();
        round_tripped.sort_unstable();
        assert_eq!(original, round_tripped);
    }

    #[test]
    fn aggregation_state_envelope_round_trips() {
        let map = OffsetHashMap::new(8, 8, 16, 4096).unwrap();
        let state = AggregationState {
            metadata: AggregationMetadata {
                operator_id: 7,
                processed_records: 100,
                last_watermark: 50,
                version: STATE_FORMAT_VERSION,
            },
            config: HashMapConfig {
                key_size: 8,
                value_size: 8,
                bucket_count: 16,
                page_size: 4096,
            },
            maps: vec![encode_hash_map(&map)],
            windows: vec![WindowMetadata { start: 0, end: 10, first_map_index: 0, map_count: 1 }],
        };
        let bytes = encode_aggregation_state(&state).unwrap();
        let restored = decode_aggregation_state(&bytes).unwrap();
        assert_eq!(restored.metadata.operator_id, 7);
        assert_eq!(restored.windows.len(), 1);
    }
}
