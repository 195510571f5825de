//! Shared types for the indexing pipeline.

use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// A block identity — number plus canonical hash as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
}

impl BlockRef {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
        }
    }
}

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "removed")]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns the block number as u64.
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    /// Returns the log index as u32.
    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }

    /// Returns `true` if the node flagged this log as removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// topics[0] is the event signature fingerprint, if present.
    pub fn signature_topic(&self) -> Option<&str> {
        self.topics.first().map(|s| s.as_str())
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

// ─── EventKind ────────────────────────────────────────────────────────────────

/// The contract events the platform emits, as a closed set.
///
/// Subscription matching and storage columns key off this; the decoded
/// fields live in [`EventPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ProfileCreated,
    ClaimSubmitted,
    ClaimApproved,
    EndorsementCreated,
    EndorsementRevoked,
    VerifierRegistered,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ProfileCreated,
        EventKind::ClaimSubmitted,
        EventKind::ClaimApproved,
        EventKind::EndorsementCreated,
        EventKind::EndorsementRevoked,
        EventKind::VerifierRegistered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileCreated => "ProfileCreated",
            Self::ClaimSubmitted => "ClaimSubmitted",
            Self::ClaimApproved => "ClaimApproved",
            Self::EndorsementCreated => "EndorsementCreated",
            Self::EndorsementRevoked => "EndorsementRevoked",
            Self::VerifierRegistered => "VerifierRegistered",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {s}"))
    }
}

// ─── EventPayload ─────────────────────────────────────────────────────────────

/// Decoded event fields, one typed variant per contract event.
///
/// Internally tagged so the serialized form carries the event type with it:
/// `{"event_type":"ClaimSubmitted","claim_id":42,…}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    ProfileCreated {
        profile_id: u64,
        owner: String,
    },
    ClaimSubmitted {
        claim_id: u64,
        claimant: String,
        skill_id: String,
        level: u8,
    },
    ClaimApproved {
        claim_id: u64,
        verifier: String,
    },
    EndorsementCreated {
        endorsement_id: u64,
        claim_id: u64,
        endorser: String,
    },
    EndorsementRevoked {
        endorsement_id: u64,
        endorser: String,
    },
    VerifierRegistered {
        verifier: String,
        credential_hash: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ProfileCreated { .. } => EventKind::ProfileCreated,
            Self::ClaimSubmitted { .. } => EventKind::ClaimSubmitted,
            Self::ClaimApproved { .. } => EventKind::ClaimApproved,
            Self::EndorsementCreated { .. } => EventKind::EndorsementCreated,
            Self::EndorsementRevoked { .. } => EventKind::EndorsementRevoked,
            Self::VerifierRegistered { .. } => EventKind::VerifierRegistered,
        }
    }

    /// The payload fields as a JSON object, without the `event_type` tag.
    /// This is what goes out on the webhook wire.
    pub fn fields_json(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = v.as_object_mut() {
            obj.remove("event_type");
        }
        v
    }
}

// ─── IndexedEvent ─────────────────────────────────────────────────────────────

/// A persisted, normalized contract event.
///
/// Immutable once `finalized`; while unfinalized it may be deleted and
/// rewritten during reorg reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEvent {
    /// Deterministic identity: keccak256 of `chain_id:tx_hash:log_index`.
    pub event_id: String,
    /// Chain slug (e.g. `"base"`).
    pub chain_id: String,
    /// Contract address that emitted the event.
    pub address: String,
    /// Block number.
    pub block_number: u64,
    /// Block hash at the time the event was observed.
    pub block_hash: String,
    /// Transaction hash.
    pub tx_hash: String,
    /// Log index within the block.
    pub log_index: u32,
    /// Decoded, typed fields.
    pub payload: EventPayload,
    /// Unix timestamp of when the indexer first stored this event.
    pub observed_at: i64,
    /// Set once the event is deep enough to be immutable.
    pub finalized: bool,
}

impl IndexedEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Derive the stable event identity for a log.
///
/// Two fetches of the same log always produce the same id; a reorged
/// replacement produces a different one because the tx hash changes.
pub fn event_id(chain_id: &str, tx_hash: &str, log_index: u32) -> String {
    let mut hasher = Keccak::v256();
    hasher.update(chain_id.as_bytes());
    hasher.update(b":");
    hasher.update(tx_hash.as_bytes());
    hasher.update(b":");
    hasher.update(log_index.to_be_bytes().as_slice());
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    format!("0x{}", hex::encode(out))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_deterministic() {
        let a = event_id("base", "0xabc", 3);
        let b = event_id("base", "0xabc", 3);
        assert_eq!(a, b);
        assert!(a.starts_with("0x"));
        assert_eq!(a.len(), 66);
    }

    #[test]
    fn event_id_varies_by_component() {
        let base = event_id("base", "0xabc", 3);
        assert_ne!(base, event_id("optimism", "0xabc", 3));
        assert_ne!(base, event_id("base", "0xdef", 3));
        assert_ne!(base, event_id("base", "0xabc", 4));
    }

    #[test]
    fn payload_tagging_roundtrip() {
        let p = EventPayload::ClaimSubmitted {
            claim_id: 42,
            claimant: "0x1111111111111111111111111111111111111111".into(),
            skill_id: "0xaa".into(),
            level: 3,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["event_type"], "ClaimSubmitted");
        assert_eq!(json["claim_id"], 42);

        let back: EventPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.kind(), EventKind::ClaimSubmitted);
    }

    #[test]
    fn fields_json_strips_tag() {
        let p = EventPayload::ProfileCreated {
            profile_id: 7,
            owner: "0x2222222222222222222222222222222222222222".into(),
        };
        let fields = p.fields_json();
        assert!(fields.get("event_type").is_none());
        assert_eq!(fields["profile_id"], 7);
    }

    #[test]
    fn event_kind_from_str() {
        assert_eq!(
            "ClaimApproved".parse::<EventKind>().unwrap(),
            EventKind::ClaimApproved
        );
        assert!("TokenMinted".parse::<EventKind>().is_err());
    }

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1"), 1);
        assert_eq!(parse_hex_u64("0xff"), 255);
        assert_eq!(parse_hex_u64("1234"), 0x1234);
    }
}
