//! Log decoding for the platform's contracts.
//!
//! Decoders are pluggable: the fetcher only needs [`EventDecoder`]. The
//! default implementation knows the skill-registry event set and matches
//! logs by keccak topic0 fingerprint, computed from the canonical ABI
//! signatures at construction time.

use std::collections::HashMap;

use tiny_keccak::{Hasher, Keccak};

use crate::error::IndexerError;
use crate::types::{EventKind, EventPayload, RawLog};

/// Turns a raw log into a typed payload.
///
/// `Ok(None)` means "not one of ours" — unknown signatures are skipped by
/// the fetcher, never fatal.
pub trait EventDecoder: Send + Sync {
    fn decode(&self, log: &RawLog) -> Result<Option<EventPayload>, IndexerError>;
}

/// keccak256 of a canonical event signature, `0x`-prefixed hex.
pub fn signature_fingerprint(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    hasher.update(signature.as_bytes());
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    format!("0x{}", hex::encode(out))
}

/// Decoder for the skill-registry contract family.
pub struct SkillContractsDecoder {
    fingerprints: HashMap<String, EventKind>,
}

impl SkillContractsDecoder {
    pub fn new() -> Self {
        let mut fingerprints = HashMap::new();
        for (kind, signature) in [
            (EventKind::ProfileCreated, "ProfileCreated(uint256,address)"),
            (
                EventKind::ClaimSubmitted,
                "ClaimSubmitted(uint256,address,bytes32,uint8)",
            ),
            (EventKind::ClaimApproved, "ClaimApproved(uint256,address)"),
            (
                EventKind::EndorsementCreated,
                "EndorsementCreated(uint256,uint256,address)",
            ),
            (
                EventKind::EndorsementRevoked,
                "EndorsementRevoked(uint256,address)",
            ),
            (
                EventKind::VerifierRegistered,
                "VerifierRegistered(address,bytes32)",
            ),
        ] {
            fingerprints.insert(signature_fingerprint(signature), kind);
        }
        Self { fingerprints }
    }

    fn decode_kind(&self, kind: EventKind, log: &RawLog) -> Result<EventPayload, IndexerError> {
        match kind {
            EventKind::ProfileCreated => Ok(EventPayload::ProfileCreated {
                profile_id: topic_u64(log, 1)?,
                owner: topic_address(log, 2)?,
            }),
            EventKind::ClaimSubmitted => Ok(EventPayload::ClaimSubmitted {
                claim_id: topic_u64(log, 1)?,
                claimant: topic_address(log, 2)?,
                skill_id: topic_word(log, 3)?,
                level: data_word_u8(log, 0)?,
            }),
            EventKind::ClaimApproved => Ok(EventPayload::ClaimApproved {
                claim_id: topic_u64(log, 1)?,
                verifier: topic_address(log, 2)?,
            }),
            EventKind::EndorsementCreated => Ok(EventPayload::EndorsementCreated {
                endorsement_id: topic_u64(log, 1)?,
                claim_id: topic_u64(log, 2)?,
                endorser: topic_address(log, 3)?,
            }),
            EventKind::EndorsementRevoked => Ok(EventPayload::EndorsementRevoked {
                endorsement_id: topic_u64(log, 1)?,
                endorser: topic_address(log, 2)?,
            }),
            EventKind::VerifierRegistered => Ok(EventPayload::VerifierRegistered {
                verifier: topic_address(log, 1)?,
                credential_hash: data_word_hex(log, 0)?,
            }),
        }
    }
}

impl Default for SkillContractsDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for SkillContractsDecoder {
    fn decode(&self, log: &RawLog) -> Result<Option<EventPayload>, IndexerError> {
        let Some(topic0) = log.signature_topic() else {
            return Ok(None);
        };
        let Some(kind) = self.fingerprints.get(&topic0.to_ascii_lowercase()) else {
            return Ok(None);
        };
        self.decode_kind(*kind, log).map(Some)
    }
}

// ─── Word helpers ─────────────────────────────────────────────────────────────
//
// All platform events use only static 32-byte words: uints and addresses in
// indexed topics, small values in the data section.

fn topic(log: &RawLog, index: usize) -> Result<&str, IndexerError> {
    log.topics
        .get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| IndexerError::Decode(format!("missing topic {index} in {}", log.tx_hash)))
}

fn word_body(word: &str) -> Result<&str, IndexerError> {
    let body = word.strip_prefix("0x").unwrap_or(word);
    if body.len() != 64 {
        return Err(IndexerError::Decode(format!(
            "expected 32-byte word, got {} hex chars",
            body.len()
        )));
    }
    Ok(body)
}

fn topic_u64(log: &RawLog, index: usize) -> Result<u64, IndexerError> {
    let body = word_body(topic(log, index)?)?;
    u64::from_str_radix(&body[48..], 16)
        .map_err(|e| IndexerError::Decode(format!("bad uint topic: {e}")))
}

fn topic_address(log: &RawLog, index: usize) -> Result<String, IndexerError> {
    let body = word_body(topic(log, index)?)?;
    Ok(format!("0x{}", &body[24..].to_ascii_lowercase()))
}

fn topic_word(log: &RawLog, index: usize) -> Result<String, IndexerError> {
    let body = word_body(topic(log, index)?)?;
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

fn data_word(log: &RawLog, index: usize) -> Result<String, IndexerError> {
    let body = log.data.strip_prefix("0x").unwrap_or(&log.data);
    let start = index * 64;
    if body.len() < start + 64 {
        return Err(IndexerError::Decode(format!(
            "data too short for word {index} in {}",
            log.tx_hash
        )));
    }
    Ok(body[start..start + 64].to_ascii_lowercase())
}

fn data_word_u8(log: &RawLog, index: usize) -> Result<u8, IndexerError> {
    let word = data_word(log, index)?;
    u8::from_str_radix(&word[62..], 16)
        .map_err(|e| IndexerError::Decode(format!("bad uint8 word: {e}")))
}

fn data_word_hex(log: &RawLog, index: usize) -> Result<String, IndexerError> {
    Ok(format!("0x{}", data_word(log, index)?))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn word_u64(v: u64) -> String {
        format!("0x{v:064x}")
    }

    fn word_addr(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    fn log(topics: Vec<String>, data: &str) -> RawLog {
        RawLog {
            address: "0x00000000000000000000000000000000000000aa".into(),
            topics,
            data: data.into(),
            block_number: "0x64".into(),
            block_hash: "0xb10c".into(),
            tx_hash: "0x7777".into(),
            log_index: "0x0".into(),
            removed: None,
        }
    }

    #[test]
    fn fingerprints_are_distinct() {
        let a = signature_fingerprint("ClaimSubmitted(uint256,address,bytes32,uint8)");
        let b = signature_fingerprint("ClaimApproved(uint256,address)");
        assert_ne!(a, b);
        assert_eq!(a.len(), 66);
    }

    #[test]
    fn decodes_claim_submitted() {
        let decoder = SkillContractsDecoder::new();
        let sig = signature_fingerprint("ClaimSubmitted(uint256,address,bytes32,uint8)");
        let claimant = "1111111111111111111111111111111111111111";
        let skill = format!("0x{}", "ab".repeat(32));
        let raw = log(
            vec![sig, word_u64(42), word_addr(claimant), skill.clone()],
            &word_u64(3),
        );

        let payload = decoder.decode(&raw).unwrap().unwrap();
        assert_eq!(
            payload,
            EventPayload::ClaimSubmitted {
                claim_id: 42,
                claimant: format!("0x{claimant}"),
                skill_id: skill,
                level: 3,
            }
        );
    }

    #[test]
    fn decodes_verifier_registered_from_data() {
        let decoder = SkillContractsDecoder::new();
        let sig = signature_fingerprint("VerifierRegistered(address,bytes32)");
        let verifier = "2222222222222222222222222222222222222222";
        let credential = "cd".repeat(32);
        let raw = log(
            vec![sig, word_addr(verifier)],
            &format!("0x{credential}"),
        );

        let payload = decoder.decode(&raw).unwrap().unwrap();
        assert_eq!(
            payload,
            EventPayload::VerifierRegistered {
                verifier: format!("0x{verifier}"),
                credential_hash: format!("0x{credential}"),
            }
        );
    }

    #[test]
    fn unknown_signature_is_skipped() {
        let decoder = SkillContractsDecoder::new();
        let raw = log(
            vec![signature_fingerprint("Transfer(address,address,uint256)")],
            "0x",
        );
        assert!(decoder.decode(&raw).unwrap().is_none());
    }

    #[test]
    fn truncated_known_event_is_an_error() {
        let decoder = SkillContractsDecoder::new();
        let sig = signature_fingerprint("ClaimApproved(uint256,address)");
        // Missing the verifier topic.
        let raw = log(vec![sig, word_u64(1)], "0x");
        assert!(matches!(
            decoder.decode(&raw),
            Err(IndexerError::Decode(_))
        ));
    }
}
