//! Expiry ledger: asset name -> expiry instant.
//!
//! The ledger is persisted as one JSON document (the ExpiryDocument) in the
//! remote store, a flat mapping of asset name to RFC 3339 UTC instant:
//!
//! ```json
//! {
//!   "poster": "2025-03-15T23:59:59.999Z"
//! }
//! ```
//!
//! Decoding is per entry: a key that is not a valid asset name or a value
//! that is not a timestamp is skipped and logged, the rest of the document
//! still loads. Keys are written in sorted order so the same ledger always
//! encodes to the same bytes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use super::asset::AssetName;
use super::errors::MetadataCorrupt;

/// In-memory view of the ExpiryDocument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryLedger {
    entries: BTreeMap<AssetName, DateTime<Utc>>,
}

impl ExpiryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, asset: &AssetName) -> Option<DateTime<Utc>> {
        self.entries.get(asset).copied()
    }

    /// Returns the previous expiry of `asset`, if any.
    pub fn set(&mut self, asset: AssetName, expires_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries.insert(asset, expires_at)
    }

    pub fn remove(&mut self, asset: &AssetName) -> Option<DateTime<Utc>> {
        self.entries.remove(asset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AssetName, &DateTime<Utc>)> {
        self.entries.iter()
    }

    /// Entries whose deadline has strictly passed at `now`, in name order.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<(AssetName, DateTime<Utc>)> {
        self.entries
            .iter()
            .filter(|(_, expires_at)| now > **expires_at)
            .map(|(asset, expires_at)| (asset.clone(), *expires_at))
            .collect()
    }

    pub fn to_document(&self) -> String {
        // BTreeMap<AssetName, DateTime> always serializes
        let mut text =
            serde_json::to_string_pretty(&self.entries).unwrap_or_else(|_| "{}".to_string());
        text.push('\n');
        text
    }

    /// Fails only when the document is not a JSON object.
    pub fn from_document(bytes: &[u8]) -> Result<Self, MetadataCorrupt> {
        let raw: BTreeMap<String, Value> =
            serde_json::from_slice(bytes).map_err(|e| MetadataCorrupt(e.to_string()))?;

        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            let asset = match AssetName::parse(&key) {
                Ok(asset) => asset,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping expiry entry with invalid asset name");
                    continue;
                }
            };
            let expires_at = value
                .as_str()
                .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
                .map(|at| at.with_timezone(&Utc));
            match expires_at {
                Some(at) => {
                    entries.insert(asset, at);
                }
                None => warn!(%asset, %value, "skipping expiry entry without a timestamp"),
            }
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn name(s: &str) -> AssetName {
        AssetName::parse(s).unwrap()
    }

    #[test]
    fn due_is_strictly_after_deadline() {
        let deadline = Utc.with_ymd_and_hms(2025, 3, 15, 23, 59, 59).unwrap();
        let mut ledger = ExpiryLedger::new();
        ledger.set(name("poster"), deadline);
        ledger.set(name("banner"), deadline + chrono::Duration::days(1));

        assert!(ledger.due(deadline).is_empty());

        let due = ledger.due(deadline + chrono::Duration::milliseconds(1));
        assert_eq!(due, vec![(name("poster"), deadline)]);
    }

    #[test]
    fn document_is_deterministic_and_decodes_back() {
        let mut a = ExpiryLedger::new();
        a.set(name("zeta"), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        a.set(name("alpha"), Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());

        let mut b = ExpiryLedger::new();
        b.set(name("alpha"), Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        b.set(name("zeta"), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());

        let text = a.to_document();
        assert_eq!(text, b.to_document());
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
        assert_eq!(ExpiryLedger::from_document(text.as_bytes()).unwrap(), a);
    }

    #[test]
    fn millisecond_deadlines_are_written_as_utc_timestamps() {
        let mut ledger = ExpiryLedger::new();
        let at = Utc
            .with_ymd_and_hms(2025, 3, 15, 23, 59, 59)
            .unwrap()
            + chrono::Duration::milliseconds(999);
        ledger.set(name("poster"), at);
        assert!(ledger.to_document().contains("\"poster\": \"2025-03-15T23:59:59.999Z\""));
    }

    #[test]
    fn document_is_a_flat_mapping() {
        let doc = br#"{"poster": "2025-03-15T23:59:59Z"}"#;
        let ledger = ExpiryLedger::from_document(doc).unwrap();
        assert_eq!(
            ledger.get(&name("poster")),
            Some(Utc.with_ymd_and_hms(2025, 3, 15, 23, 59, 59).unwrap())
        );
        assert!(!ledger.to_document().contains("expiries"));
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let doc = br#"{"poster": "2025-03-16T08:59:59+09:00"}"#;
        let ledger = ExpiryLedger::from_document(doc).unwrap();
        assert_eq!(
            ledger.get(&name("poster")),
            Some(Utc.with_ymd_and_hms(2025, 3, 15, 23, 59, 59).unwrap())
        );
    }

    #[test]
    fn undecodable_entries_are_skipped_not_fatal() {
        let doc = br#"{
            "poster": "2025-03-15T23:59:59Z",
            "a b": "2025-03-15T23:59:59Z",
            "banner": 12,
            "promo": "next tuesday",
            "version": 2
        }"#;
        let ledger = ExpiryLedger::from_document(doc).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get(&name("poster")).is_some());
    }

    #[test]
    fn empty_object_is_an_empty_ledger() {
        assert!(ExpiryLedger::from_document(b"{}").unwrap().is_empty());
    }

    #[test]
    fn non_object_documents_are_corrupt() {
        assert!(ExpiryLedger::from_document(b"not json").is_err());
        assert!(ExpiryLedger::from_document(b"[1, 2]").is_err());
        assert!(ExpiryLedger::from_document(b"\"poster\"").is_err());
    }
}
