//! Asset naming and the remote path scheme.
//!
//! # Path scheme
//! ```text
//! {prefix}{name}{ext}        live (slot 0)
//! {prefix}{name}-{i}{ext}    history slot i (1..=N), most recent first
//! {prefix}{name}-{ts}{ext}   optional timestamped archive copy
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// `-{i}` or `-{ts}`: the suffixes that slot and timestamped paths append.
static DERIVED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-(?:\d+|\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}-\d{3}Z)$")
        .expect("derived suffix pattern")
});

/// Logical name of a tracked asset, e.g. `poster`.
///
/// Restricted to `[A-Za-z0-9._-]` so it can be embedded in a store path
/// and a URL without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetName(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetNameError {
    #[error("asset name is empty")]
    Empty,

    #[error("asset name contains invalid character {0:?}")]
    InvalidChar(char),
}

impl AssetName {
    pub fn parse(raw: &str) -> Result<Self, AssetNameError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(AssetNameError::Empty);
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(AssetNameError::InvalidChar(c));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Names ending in `-{i}` or `-{ts}` would live on another asset's
    /// slot or timestamped path (`poster-1` is slot 1 of `poster`).
    pub fn is_derived(&self) -> bool {
        DERIVED_SUFFIX.is_match(&self.0)
    }
}

impl fmt::Display for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AssetName {
    type Err = AssetNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AssetName {
    type Error = AssetNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AssetName> for String {
    fn from(name: AssetName) -> Self {
        name.0
    }
}

/// Index into an asset's version ring. Slot 0 is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionSlot(u32);

impl VersionSlot {
    pub const LIVE: Self = Self(0);

    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }

    pub fn is_live(self) -> bool {
        self.0 == 0
    }

    /// The slot whose content moves into this one on rotation.
    pub fn predecessor(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for VersionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps asset names and slots to store paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLayout {
    prefix: String,
    extension: String,
}

impl AssetLayout {
    /// `prefix` gets a trailing `/` and `extension` a leading `.` when
    /// they are non-empty and lack one.
    pub fn new(prefix: &str, extension: &str) -> Self {
        let mut prefix = prefix.trim_start_matches('/').to_string();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        let mut extension = extension.to_string();
        if !extension.is_empty() && !extension.starts_with('.') {
            extension.insert(0, '.');
        }
        Self { prefix, extension }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn live_path(&self, asset: &AssetName) -> String {
        self.slot_path(asset, VersionSlot::LIVE)
    }

    pub fn slot_path(&self, asset: &AssetName, slot: VersionSlot) -> String {
        if slot.is_live() {
            format!("{}{}{}", self.prefix, asset, self.extension)
        } else {
            format!("{}{}-{}{}", self.prefix, asset, slot, self.extension)
        }
    }

    /// `poster` at 2025-03-15T12:00:00.000Z becomes
    /// `uploads/poster-2025-03-15T12-00-00-000Z.png`.
    pub fn timestamped_path(&self, asset: &AssetName, at: DateTime<Utc>) -> String {
        let stamp = at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("{}{}-{}{}", self.prefix, asset, stamp, self.extension)
    }

    /// Whether `path` is the live, a slot or a timestamped path of `asset`.
    pub fn claims(&self, asset: &AssetName, path: &str) -> bool {
        let Some(stem) = path
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_suffix(self.extension.as_str()))
        else {
            return false;
        };
        match stem.strip_prefix(asset.as_str()) {
            Some("") => true,
            Some(rest) => DERIVED_SUFFIX
                .find(rest)
                .is_some_and(|m| m.start() == 0),
            None => false,
        }
    }
}

impl Default for AssetLayout {
    fn default() -> Self {
        Self::new("uploads/", ".png")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn poster() -> AssetName {
        AssetName::parse("poster").unwrap()
    }

    #[test]
    fn asset_name_rejects_path_characters() {
        assert_eq!(AssetName::parse("  "), Err(AssetNameError::Empty));
        assert_eq!(
            AssetName::parse("../etc"),
            Err(AssetNameError::InvalidChar('/'))
        );
        assert_eq!(
            AssetName::parse("my poster"),
            Err(AssetNameError::InvalidChar(' '))
        );
        assert_eq!(AssetName::parse(" poster_v2 ").unwrap().as_str(), "poster_v2");
    }

    #[test]
    fn slot_paths_follow_the_scheme() {
        let layout = AssetLayout::default();
        assert_eq!(layout.live_path(&poster()), "uploads/poster.png");
        assert_eq!(
            layout.slot_path(&poster(), VersionSlot::new(1)),
            "uploads/poster-1.png"
        );
        assert_eq!(
            layout.slot_path(&poster(), VersionSlot::new(3)),
            "uploads/poster-3.png"
        );
    }

    #[test]
    fn layout_normalizes_prefix_and_extension() {
        let layout = AssetLayout::new("media", "webp");
        assert_eq!(layout.prefix(), "media/");
        assert_eq!(layout.extension(), ".webp");
        assert_eq!(layout.live_path(&poster()), "media/poster.webp");

        let bare = AssetLayout::new("", "");
        assert_eq!(bare.slot_path(&poster(), VersionSlot::new(2)), "poster-2");
    }

    #[test]
    fn timestamped_path_has_no_colons_or_dots() {
        let layout = AssetLayout::default();
        let at = Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap();
        assert_eq!(
            layout.timestamped_path(&poster(), at),
            "uploads/poster-2025-03-15T12-00-00-000Z.png"
        );
    }

    #[test]
    fn slot_predecessor() {
        assert_eq!(VersionSlot::LIVE.predecessor(), None);
        assert_eq!(VersionSlot::new(2).predecessor(), Some(VersionSlot::new(1)));
    }

    #[test]
    fn asset_name_deserializes_through_validation() {
        let ok: AssetName = serde_json::from_str("\"poster\"").unwrap();
        assert_eq!(ok, poster());
        assert!(serde_json::from_str::<AssetName>("\"a/b\"").is_err());
    }

    #[test]
    fn derived_names_are_detected() {
        let derived = |s: &str| AssetName::parse(s).unwrap().is_derived();
        assert!(derived("poster-1"));
        assert!(derived("poster-12"));
        assert!(derived("poster-2025-03-15T12-00-00-000Z"));
        assert!(!derived("poster"));
        assert!(!derived("spring-poster"));
        assert!(!derived("poster-v2"));
    }

    #[test]
    fn layout_claims_live_slot_and_timestamped_paths() {
        let layout = AssetLayout::default();
        let fallback = AssetName::parse("fallback").unwrap();
        assert!(layout.claims(&poster(), "uploads/poster.png"));
        assert!(layout.claims(&poster(), "uploads/poster-7.png"));
        assert!(layout.claims(&poster(), "uploads/poster-2025-03-15T12-00-00-000Z.png"));
        assert!(layout.claims(&fallback, "uploads/fallback.png"));

        assert!(!layout.claims(&poster(), "uploads/poster-v2.png"));
        assert!(!layout.claims(&poster(), "uploads/posters.png"));
        assert!(!layout.claims(&poster(), "uploads/expiry.json"));
        assert!(!layout.claims(&poster(), "other/poster.png"));
    }
}
