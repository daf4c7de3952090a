// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! Rule engine
//!
//! Each rule binds one expectation from a flavor and applies it to a host
//! manifest, producing faults for any disagreement. Rules are a closed set
//! of variants behind a single `apply` capability; they never mutate shared
//! state and never error on well-formed manifests — absent PCR banks or
//! event logs degrade into faults so that partial evidence degrades the
//! decision rather than aborting it.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256, Sha384};
use trust_types::{
    DigestBank, ExpectedAssetTag, ExpectedEvent, ExpectedMeasurement, ExpectedPcr,
    EventLogSemantics, Fault, Flavor, FlavorPart, HostManifest, PcrEvent, RuleResult,
};
use uuid::Uuid;

/// One matching predicate over a host manifest
#[derive(Debug, Clone)]
pub enum Rule {
    /// PCR (index, bank) must equal the expected value
    PcrMatches { expected: ExpectedPcr },
    /// The event log entry set for (index, bank) must equal the expected set
    PcrEventLogEquals {
        index: u32,
        bank: DigestBank,
        entries: Vec<ExpectedEvent>,
    },
    /// The event log for (index, bank) must contain every expected entry
    PcrEventLogIncludes {
        index: u32,
        bank: DigestBank,
        entries: Vec<ExpectedEvent>,
    },
    /// Replaying the event log digest chain must reproduce the reported
    /// PCR value
    PcrEventLogReplay { index: u32, bank: DigestBank },
    /// Every expected software measurement must be present and equal, and
    /// the host must not report measurements outside the expected set
    MeasurementLogEquals { expected: Vec<ExpectedMeasurement> },
    /// The provisioned asset tag must match digest and attributes
    AssetTagMatches { expected: ExpectedAssetTag },
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PcrMatches { .. } => "pcr_matches",
            Self::PcrEventLogEquals { .. } => "pcr_event_log_equals",
            Self::PcrEventLogIncludes { .. } => "pcr_event_log_includes",
            Self::PcrEventLogReplay { .. } => "pcr_event_log_replay",
            Self::MeasurementLogEquals { .. } => "measurement_log_equals",
            Self::AssetTagMatches { .. } => "asset_tag_matches",
        }
    }

    /// Apply the rule to a manifest. Side-effect free; disagreements and
    /// missing evidence come back as faults.
    pub fn apply(&self, manifest: &HostManifest) -> Vec<Fault> {
        match self {
            Self::PcrMatches { expected } => apply_pcr_matches(expected, manifest),
            Self::PcrEventLogEquals {
                index,
                bank,
                entries,
            } => apply_event_log(*index, *bank, entries, manifest, EventLogSemantics::Equals),
            Self::PcrEventLogIncludes {
                index,
                bank,
                entries,
            } => apply_event_log(*index, *bank, entries, manifest, EventLogSemantics::Includes),
            Self::PcrEventLogReplay { index, bank } => apply_replay(*index, *bank, manifest),
            Self::MeasurementLogEquals { expected } => apply_measurements(expected, manifest),
            Self::AssetTagMatches { expected } => apply_asset_tag(expected, manifest),
        }
    }
}

fn apply_pcr_matches(expected: &ExpectedPcr, manifest: &HostManifest) -> Vec<Fault> {
    match manifest.pcr(expected.index, expected.bank) {
        None => vec![Fault::PcrValueMissing {
            index: expected.index,
            bank: expected.bank,
        }],
        Some(actual) if actual.value != expected.value => vec![Fault::PcrValueMismatch {
            index: expected.index,
            bank: expected.bank,
            expected: hex::encode(&expected.value),
            actual: hex::encode(&actual.value),
        }],
        Some(_) => vec![],
    }
}

fn event_key(label: &str, digest: &[u8]) -> String {
    format!("{label}:{}", hex::encode(digest))
}

fn apply_event_log(
    index: u32,
    bank: DigestBank,
    entries: &[ExpectedEvent],
    manifest: &HostManifest,
    semantics: EventLogSemantics,
) -> Vec<Fault> {
    let actual = manifest.events_for(index, bank);
    if actual.is_empty() && !entries.is_empty() {
        return vec![Fault::PcrEventLogMissing { index, bank }];
    }

    // Entry identity is (label, digest); comparison is case-sensitive and
    // order-independent.
    let expected_set: BTreeSet<String> = entries
        .iter()
        .map(|e| event_key(&e.label, &e.digest))
        .collect();
    let actual_set: BTreeSet<String> = actual
        .iter()
        .map(|e| event_key(&e.label, &e.digest))
        .collect();

    let mut faults = Vec::new();
    let missing: Vec<String> = expected_set.difference(&actual_set).cloned().collect();
    if !missing.is_empty() {
        faults.push(Fault::EventLogMissingEntries {
            index,
            bank,
            missing,
        });
    }
    if semantics == EventLogSemantics::Equals {
        let unexpected: Vec<String> = actual_set.difference(&expected_set).cloned().collect();
        if !unexpected.is_empty() {
            faults.push(Fault::EventLogUnexpectedEntries {
                index,
                bank,
                unexpected,
            });
        }
    }
    faults
}

/// Replay PCR extension over the log, as a TPM would: starting from a
/// zeroed register, pcr = H(pcr || digest) per event.
fn replay_chain(bank: DigestBank, events: &[&PcrEvent]) -> Option<Vec<u8>> {
    let mut pcr = vec![0u8; bank.digest_len()];
    for event in events {
        pcr = match bank {
            DigestBank::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(&pcr);
                hasher.update(&event.digest);
                hasher.finalize().to_vec()
            }
            DigestBank::Sha384 => {
                let mut hasher = Sha384::new();
                hasher.update(&pcr);
                hasher.update(&event.digest);
                hasher.finalize().to_vec()
            }
            // No SHA-1 replay support on the verifier side
            DigestBank::Sha1 => return None,
        };
    }
    Some(pcr)
}

fn apply_replay(index: u32, bank: DigestBank, manifest: &HostManifest) -> Vec<Fault> {
    let events = manifest.events_for(index, bank);
    if events.is_empty() {
        return vec![];
    }
    let Some(replayed) = replay_chain(bank, &events) else {
        return vec![];
    };
    match manifest.pcr(index, bank) {
        None => vec![Fault::PcrValueMissing { index, bank }],
        Some(actual) if actual.value != replayed => vec![Fault::EventLogReplayMismatch {
            index,
            bank,
            expected: hex::encode(&actual.value),
            replayed: hex::encode(&replayed),
        }],
        Some(_) => vec![],
    }
}

fn apply_measurements(expected: &[ExpectedMeasurement], manifest: &HostManifest) -> Vec<Fault> {
    let mut faults = Vec::new();
    for exp in expected {
        match manifest.measurement(&exp.path) {
            None => faults.push(Fault::MeasurementMissing {
                path: exp.path.clone(),
            }),
            Some(actual) if actual.digest != exp.digest => {
                faults.push(Fault::MeasurementMismatch {
                    path: exp.path.clone(),
                    expected: hex::encode(&exp.digest),
                    actual: hex::encode(&actual.digest),
                })
            }
            Some(_) => {}
        }
    }
    for entry in &manifest.measurements {
        if !expected.iter().any(|e| e.path == entry.path) {
            faults.push(Fault::MeasurementUnexpected {
                path: entry.path.clone(),
            });
        }
    }
    faults
}

fn apply_asset_tag(expected: &ExpectedAssetTag, manifest: &HostManifest) -> Vec<Fault> {
    let Some(tag) = &manifest.asset_tag else {
        return vec![Fault::AssetTagMissing];
    };
    let mut faults = Vec::new();
    if tag.certificate_digest != expected.certificate_digest {
        faults.push(Fault::AssetTagMismatch {
            field: "certificate_digest".into(),
            expected: hex::encode(&expected.certificate_digest),
            actual: hex::encode(&tag.certificate_digest),
        });
    }
    for (key, want) in &expected.attributes {
        match tag.attributes.get(key) {
            None => faults.push(Fault::AssetTagMismatch {
                field: key.clone(),
                expected: want.clone(),
                actual: String::new(),
            }),
            Some(got) if got != want => faults.push(Fault::AssetTagMismatch {
                field: key.clone(),
                expected: want.clone(),
                actual: got.clone(),
            }),
            Some(_) => {}
        }
    }
    faults
}

/// The rules built from one flavor, tagged with its identity
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub flavor_id: Uuid,
    pub part: FlavorPart,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Bind a flavor's expectations into rules.
    pub fn for_flavor(flavor: &Flavor) -> Self {
        let mut rules = Vec::new();
        for expected in &flavor.pcrs {
            rules.push(Rule::PcrMatches {
                expected: expected.clone(),
            });
            if let Some(event_log) = &expected.event_log {
                rules.push(match event_log.semantics {
                    EventLogSemantics::Equals => Rule::PcrEventLogEquals {
                        index: expected.index,
                        bank: expected.bank,
                        entries: event_log.entries.clone(),
                    },
                    EventLogSemantics::Includes => Rule::PcrEventLogIncludes {
                        index: expected.index,
                        bank: expected.bank,
                        entries: event_log.entries.clone(),
                    },
                });
                if expected.bank != DigestBank::Sha1 {
                    rules.push(Rule::PcrEventLogReplay {
                        index: expected.index,
                        bank: expected.bank,
                    });
                }
            }
        }
        if !flavor.measurements.is_empty() {
            rules.push(Rule::MeasurementLogEquals {
                expected: flavor.measurements.clone(),
            });
        }
        if let Some(asset_tag) = &flavor.asset_tag {
            rules.push(Rule::AssetTagMatches {
                expected: asset_tag.clone(),
            });
        }
        Self {
            flavor_id: flavor.meta.id,
            part: flavor.meta.part,
            rules,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule, producing one result per rule.
    pub fn apply(&self, manifest: &HostManifest) -> Vec<RuleResult> {
        self.rules
            .iter()
            .map(|rule| RuleResult {
                rule: rule.name().into(),
                flavor_id: Some(self.flavor_id),
                flavor_part: self.part,
                faults: rule.apply(manifest),
            })
            .collect()
    }
}
