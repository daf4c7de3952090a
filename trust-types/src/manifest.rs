// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Host manifest types
//!
//! A manifest is the snapshot of evidence a host reports: identity info,
//! PCR values per hash bank, the boot/runtime event log and, optionally,
//! software measurements and a provisioned asset tag. A manifest is
//! immutable once captured; re-verification requires a fresh snapshot.

use std::collections::BTreeMap;

use scale::{Decode, Encode};
use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;

/// PCR hash bank
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum DigestBank {
    Sha1,
    Sha256,
    Sha384,
}

impl DigestBank {
    /// Digest length in bytes for this bank
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
        }
    }
}

impl core::fmt::Display for DigestBank {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PCR (Platform Configuration Register) value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PcrValue {
    /// PCR index (0-23)
    pub index: u32,

    /// Hash bank the value was read from
    pub bank: DigestBank,

    /// PCR value (hash)
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

/// One measured boot/runtime event extended into a PCR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PcrEvent {
    /// PCR index this event was extended to
    pub pcr_index: u32,

    /// Hash bank of the digest
    pub bank: DigestBank,

    /// Digest extended into the PCR
    #[serde(with = "hex_bytes")]
    pub digest: Vec<u8>,

    /// Component/label name of the measured object (e.g. "shim", "vmlinuz")
    pub label: String,

    /// Optional classification tags from the measuring agent
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One entry from the host's software measurement log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct MeasurementEntry {
    /// Measured path or component identifier
    pub path: String,

    /// Measured digest
    #[serde(with = "hex_bytes")]
    pub digest: Vec<u8>,
}

/// Asset tag evidence reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct AssetTagEvidence {
    /// Digest of the provisioned tag certificate
    #[serde(with = "hex_bytes")]
    pub certificate_digest: Vec<u8>,

    /// Key/value attributes from the tag
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Host identity info reported by the trust agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct HostInfo {
    pub vendor: String,
    pub os_name: String,
    pub os_version: String,
    #[serde(default)]
    pub bios_version: String,
    pub tpm_version: String,
    pub tpm_enabled: bool,
    pub uefi_enabled: bool,
    /// Hardware UUID as reported by SMBIOS, if available
    #[serde(default)]
    pub hardware_uuid: Option<String>,
}

/// Snapshot of all evidence reported by one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct HostManifest {
    pub host_info: HostInfo,

    /// PCR values keyed by (index, bank)
    pub pcrs: Vec<PcrValue>,

    /// Measured boot/runtime event log
    pub event_log: Vec<PcrEvent>,

    /// Software measurement log entries
    #[serde(default)]
    pub measurements: Vec<MeasurementEntry>,

    /// Provisioned asset tag, if any
    #[serde(default)]
    pub asset_tag: Option<AssetTagEvidence>,
}

impl HostManifest {
    pub fn from_scale(mut input: &[u8]) -> Result<Self, scale::Error> {
        Self::decode(&mut input)
    }

    /// Look up the PCR value for (index, bank)
    pub fn pcr(&self, index: u32, bank: DigestBank) -> Option<&PcrValue> {
        self.pcrs
            .iter()
            .find(|p| p.index == index && p.bank == bank)
    }

    /// Event log entries extended into (index, bank), in log order
    pub fn events_for(&self, index: u32, bank: DigestBank) -> Vec<&PcrEvent> {
        self.event_log
            .iter()
            .filter(|e| e.pcr_index == index && e.bank == bank)
            .collect()
    }

    /// Look up a software measurement by path
    pub fn measurement(&self, path: &str) -> Option<&MeasurementEntry> {
        self.measurements.iter().find(|m| m.path == path)
    }
}
