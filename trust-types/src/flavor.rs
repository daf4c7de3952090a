// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Flavor and flavor group types
//!
//! A flavor is a signed, administrator-approved set of reference values for
//! one flavor part. Flavors are immutable: superseding a reference value
//! means creating a new flavor, never editing one in place. A flavor group
//! names a set of flavors plus one match policy per flavor part; hosts are
//! associated with one or more flavor groups and trust is evaluated per
//! group.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;
use uuid::Uuid;

use crate::manifest::DigestBank;

/// Category of measurement a flavor covers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlavorPart {
    Platform,
    Os,
    HostUnique,
    Software,
    AssetTag,
}

impl FlavorPart {
    pub const ALL: [FlavorPart; 5] = [
        FlavorPart::Platform,
        FlavorPart::Os,
        FlavorPart::HostUnique,
        FlavorPart::Software,
        FlavorPart::AssetTag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "PLATFORM",
            Self::Os => "OS",
            Self::HostUnique => "HOST_UNIQUE",
            Self::Software => "SOFTWARE",
            Self::AssetTag => "ASSET_TAG",
        }
    }
}

impl core::fmt::Display for FlavorPart {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the event log of a PCR is compared against the expected entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLogSemantics {
    /// The host's entry set must equal the expected set exactly
    Equals,
    /// The host's entry set must contain every expected entry
    Includes,
}

/// One expected event log entry. Entry identity is (label, digest),
/// compared case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedEvent {
    pub label: String,
    #[serde(with = "hex_bytes")]
    pub digest: Vec<u8>,
}

/// Expected event log for one PCR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedEventLog {
    pub semantics: EventLogSemantics,
    pub entries: Vec<ExpectedEvent>,
}

/// Expected value for one PCR, optionally with event log expectations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedPcr {
    pub index: u32,
    pub bank: DigestBank,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_log: Option<ExpectedEventLog>,
}

/// Expected software measurement for one component path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedMeasurement {
    pub path: String,
    #[serde(with = "hex_bytes")]
    pub digest: Vec<u8>,
}

/// Expected asset tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedAssetTag {
    #[serde(with = "hex_bytes")]
    pub certificate_digest: Vec<u8>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Flavor identity and descriptive metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorMeta {
    pub id: Uuid,
    pub part: FlavorPart,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// Reference value set for one flavor part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub meta: FlavorMeta,
    #[serde(default)]
    pub pcrs: Vec<ExpectedPcr>,
    #[serde(default)]
    pub measurements: Vec<ExpectedMeasurement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<ExpectedAssetTag>,
}

impl Flavor {
    /// Canonical byte encoding the flavor signature covers.
    ///
    /// JSON with the struct's fixed field order; map-valued fields are
    /// BTreeMaps so the encoding is stable.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A flavor plus the administrator signature over its canonical encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedFlavor {
    pub flavor: Flavor,
    /// ECDSA P-256 signature (r||s) over SHA-256 of the canonical encoding.
    /// Empty when the flavor was stored unsigned.
    #[serde(default, with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// How multiple flavors of the same part combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    /// At least one flavor's full rule set must be faultless
    AnyOf,
    /// Every flavor's rule set must be faultless
    AllOf,
}

/// Whether absence of flavors for a part is itself a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Requirement {
    /// The part must have at least one matching flavor
    Required,
    /// The part must match only if flavors of the part exist
    RequiredIfDefined,
    /// Absence never fails the part
    NotRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub match_type: MatchType,
    pub required: Requirement,
}

/// Match policy for one flavor part within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorMatchPolicy {
    pub part: FlavorPart,
    pub policy: MatchPolicy,
}

/// Named collection of flavors plus one match policy per flavor part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorGroup {
    pub id: Uuid,
    pub name: String,
    pub policies: Vec<FlavorMatchPolicy>,
}

impl FlavorGroup {
    pub fn policy_for(&self, part: FlavorPart) -> Option<&FlavorMatchPolicy> {
        self.policies.iter().find(|p| p.part == part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flavor_part_wire_names() {
        assert_eq!(
            serde_json::to_string(&FlavorPart::HostUnique).unwrap(),
            "\"HOST_UNIQUE\""
        );
        assert_eq!(
            serde_json::from_str::<FlavorPart>("\"ASSET_TAG\"").unwrap(),
            FlavorPart::AssetTag
        );
    }

    #[test]
    fn test_canonical_bytes_stable() {
        let flavor = Flavor {
            meta: FlavorMeta {
                id: Uuid::nil(),
                part: FlavorPart::Platform,
                label: "platform-a".into(),
                description: String::new(),
            },
            pcrs: vec![ExpectedPcr {
                index: 0,
                bank: DigestBank::Sha256,
                value: vec![0xab; 32],
                event_log: None,
            }],
            measurements: vec![],
            asset_tag: None,
        };
        assert_eq!(
            flavor.canonical_bytes().unwrap(),
            flavor.clone().canonical_bytes().unwrap()
        );
    }

    #[test]
    fn test_policy_lookup() {
        let group = FlavorGroup {
            id: Uuid::nil(),
            name: "default".into(),
            policies: vec![FlavorMatchPolicy {
                part: FlavorPart::Platform,
                policy: MatchPolicy {
                    match_type: MatchType::AnyOf,
                    required: Requirement::Required,
                },
            }],
        };
        assert!(group.policy_for(FlavorPart::Platform).is_some());
        assert!(group.policy_for(FlavorPart::Os).is_none());
    }
}
