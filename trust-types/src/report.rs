// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Rule results and trust reports
//!
//! A rule result records the outcome of applying one matching rule to a
//! host manifest. Evidence problems (mismatched PCR, missing event log
//! entry, untrusted flavor signature) are faults inside a result, never
//! errors: partial evidence degrades the trust decision instead of
//! aborting verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;
use uuid::Uuid;

use crate::flavor::FlavorPart;
use crate::manifest::DigestBank;

/// One reason a rule faulted. Digests are carried hex-encoded for direct
/// display in reports and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fault {
    PcrValueMissing {
        index: u32,
        bank: DigestBank,
    },
    PcrValueMismatch {
        index: u32,
        bank: DigestBank,
        expected: String,
        actual: String,
    },
    PcrEventLogMissing {
        index: u32,
        bank: DigestBank,
    },
    EventLogMissingEntries {
        index: u32,
        bank: DigestBank,
        /// Expected entries absent from the host's log, as "label:digest"
        missing: Vec<String>,
    },
    EventLogUnexpectedEntries {
        index: u32,
        bank: DigestBank,
        /// Host log entries not covered by the expectation, as "label:digest"
        unexpected: Vec<String>,
    },
    EventLogReplayMismatch {
        index: u32,
        bank: DigestBank,
        expected: String,
        replayed: String,
    },
    MeasurementMissing {
        path: String,
    },
    MeasurementMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    MeasurementUnexpected {
        path: String,
    },
    AssetTagMissing,
    AssetTagMismatch {
        field: String,
        expected: String,
        actual: String,
    },
    FlavorSignatureMissing {
        flavor_id: Uuid,
    },
    FlavorSignatureNotTrusted {
        flavor_id: Uuid,
    },
    /// A part the group's policy marks Required has no flavors at all
    FlavorPartMissing {
        part: FlavorPart,
    },
}

/// Outcome of one rule applied to one manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    /// Rule kind name, e.g. "pcr_matches"
    pub rule: String,

    /// Flavor the rule was built from; None for group-level results
    /// (e.g. a Required part with no flavors)
    pub flavor_id: Option<Uuid>,

    pub flavor_part: FlavorPart,

    pub faults: Vec<Fault>,
}

impl RuleResult {
    pub fn trusted(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Immutable output of one verification run for a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustReport {
    pub id: Uuid,
    pub host_id: Uuid,

    /// Host-level decision: every evaluated flavor group was satisfied
    pub trusted: bool,

    pub results: Vec<RuleResult>,

    pub created_at: DateTime<Utc>,

    /// Digest of the (manifest, flavor group state) the report was
    /// computed from; used by the trust cache to skip re-evaluation
    #[serde(with = "hex_bytes")]
    pub input_marker: Vec<u8>,
}

impl TrustReport {
    pub fn new(host_id: Uuid, trusted: bool, results: Vec<RuleResult>, input_marker: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            host_id,
            trusted,
            results,
            created_at: Utc::now(),
            input_marker,
        }
    }

    /// Results that carry at least one fault
    pub fn faulted(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| !r.trusted())
    }

    pub fn fault_count(&self) -> usize {
        self.results.iter().map(|r| r.faults.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_fault_accounting() {
        let report = TrustReport::new(
            Uuid::new_v4(),
            false,
            vec![
                RuleResult {
                    rule: "pcr_matches".into(),
                    flavor_id: Some(Uuid::new_v4()),
                    flavor_part: FlavorPart::Platform,
                    faults: vec![Fault::PcrValueMismatch {
                        index: 0,
                        bank: DigestBank::Sha256,
                        expected: "abc123".into(),
                        actual: "xyz789".into(),
                    }],
                },
                RuleResult {
                    rule: "pcr_matches".into(),
                    flavor_id: Some(Uuid::new_v4()),
                    flavor_part: FlavorPart::Os,
                    faults: vec![],
                },
            ],
            vec![0u8; 32],
        );
        assert_eq!(report.faulted().count(), 1);
        assert_eq!(report.fault_count(), 1);
        assert!(!report.results[0].trusted());
        assert!(report.results[1].trusted());
    }

    #[test]
    fn test_fault_serde_tagging() {
        let fault = Fault::FlavorPartMissing {
            part: FlavorPart::Platform,
        };
        let json = serde_json::to_string(&fault).unwrap();
        assert!(json.contains("\"flavor_part_missing\""));
        let back: Fault = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fault);
    }
}
