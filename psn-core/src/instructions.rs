//! Server-issued sampling instructions and their JSON parsing.

use crate::alarm::ALLOWED_INTERVALS_MIN;
use crate::ring::RING_CAPACITY;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instructions {
    pub stream_id: u16,
    pub interval_min: u16,
    pub batch_size: usize,
}

impl Instructions {
    pub fn interval_secs(&self) -> u32 {
        self.interval_min as u32 * 60
    }
}

/// Raw shape accepted from the wire before validation. Design Note §9: the
/// source used inconsistent field names across drafts (`session`,
/// `session_id`, `stream_id`, `streamId`); this spec standardizes on
/// `session_id`/`stream_id` but still accepts the alternate spellings.
#[derive(Debug, Deserialize)]
struct RawInstructions {
    session_id: Option<i64>,
    session: Option<i64>,
    stream_id: Option<i64>,
    #[serde(rename = "streamId")]
    stream_id_camel: Option<i64>,
    interval: Option<i64>,
    batch_size: Option<i64>,
    #[serde(rename = "batchSize")]
    batch_size_camel: Option<i64>,
}

/// Parses and validates a JSON instructions payload. Returns `None` on any
/// missing/ill-typed/out-of-range field, which the caller surfaces as a
/// protocol `Fail`.
pub fn parse_instructions(json: &str) -> Option<Instructions> {
    let raw: RawInstructions = serde_json::from_str(json).ok()?;

    let stream_id = raw
        .session_id
        .or(raw.session)
        .or(raw.stream_id)
        .or(raw.stream_id_camel)?;
    if stream_id < 0 || stream_id > u16::MAX as i64 {
        return None;
    }

    let interval = raw.interval?;
    if interval < 0 || interval > u16::MAX as i64 {
        return None;
    }
    let interval_min = interval as u16;
    if !ALLOWED_INTERVALS_MIN.contains(&interval_min) {
        return None;
    }

    let batch_size = raw.batch_size.or(raw.batch_size_camel)?;
    if batch_size < 1 || batch_size as usize > RING_CAPACITY {
        return None;
    }

    Some(Instructions {
        stream_id: stream_id as u16,
        interval_min,
        batch_size: batch_size as usize,
    })
}

/// True if `json` at least parses as a JSON object; used by the protocol
/// layer to tell "this looks like an attempted instructions payload that
/// failed validation" apart from "this is not JSON at all" when deciding
/// whether a send_observation response should still count as a delivery
/// success (Design Note §9, second open question).
pub fn looks_like_object(json: &str) -> bool {
    matches!(serde_json::from_str::<Value>(json), Ok(Value::Object(_)))
}
