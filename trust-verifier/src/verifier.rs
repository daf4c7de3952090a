// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! Flavor-group verifier
//!
//! Composes the rule engine per flavor part, applies match-policy
//! semantics and aggregates group outcomes into a host-level trust report.
//! Per-rule mismatches are faults inside the report; only structural
//! problems (a part with flavors but no policy, duplicate policies, bad
//! signing certificates) are errors.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, info};
use trust_types::{
    Fault, FlavorGroup, FlavorPart, HostManifest, MatchType, Requirement, RuleResult, SignedFlavor,
    TrustReport,
};
use uuid::Uuid;

use crate::cache::input_marker;
use crate::rules::RuleSet;
use crate::signature::FlavorSignatureVerifier;

/// One flavor group resolved for verification: the group definition plus
/// its flavors pre-grouped by flavor part.
#[derive(Debug, Clone)]
pub struct FlavorGroupEvidence {
    pub group: FlavorGroup,
    pub flavors: BTreeMap<FlavorPart, Vec<SignedFlavor>>,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("flavor group {group} has flavors of part {part} but no match policy for it")]
    MissingPolicy { group: String, part: FlavorPart },

    #[error("flavor group {group} declares more than one match policy for part {part}")]
    DuplicatePolicy { group: String, part: FlavorPart },

    #[error("flavor {flavor} listed under part {listed} is a {actual} flavor")]
    MismatchedPart {
        flavor: Uuid,
        listed: FlavorPart,
        actual: FlavorPart,
    },

    #[error("failed to compute verification input marker")]
    Marker(#[source] serde_json::Error),

    #[error("flavor signature check failed structurally")]
    Signature(#[source] anyhow::Error),
}

/// Verifier configuration. Signing certificates are DER encoded; when
/// `skip_signature_verification` is set the certificate set may be empty.
#[derive(Debug, Clone, Default)]
pub struct VerifierConfig {
    pub flavor_signing_certs_der: Vec<Vec<u8>>,
    pub skip_signature_verification: bool,
}

pub struct TrustVerifier {
    signature: Option<FlavorSignatureVerifier>,
}

impl TrustVerifier {
    pub fn new(config: &VerifierConfig) -> Result<Self> {
        let signature = if config.skip_signature_verification {
            None
        } else {
            Some(FlavorSignatureVerifier::new(
                &config.flavor_signing_certs_der,
            )?)
        };
        Ok(Self { signature })
    }

    /// Verifier that accepts any flavor without a signature check.
    pub fn unsigned() -> Self {
        Self { signature: None }
    }

    /// Verifier with a pre-built signature verifier.
    pub fn with_signature_verifier(signature: FlavorSignatureVerifier) -> Self {
        Self {
            signature: Some(signature),
        }
    }

    /// Evaluate a host manifest against its flavor groups.
    ///
    /// The host is trusted iff every group is satisfied. Returns an error
    /// only for structural problems; evidence mismatches come back as
    /// faults in the report.
    pub fn verify(
        &self,
        host_id: Uuid,
        manifest: &HostManifest,
        groups: &[FlavorGroupEvidence],
    ) -> Result<TrustReport, VerifyError> {
        let marker = input_marker(manifest, groups).map_err(VerifyError::Marker)?;

        let mut trusted = true;
        let mut results = Vec::new();
        for evidence in groups {
            let group_trusted = self.verify_group(manifest, evidence, &mut results)?;
            debug!(
                host = %host_id,
                group = %evidence.group.name,
                trusted = group_trusted,
                "flavor group evaluated"
            );
            trusted &= group_trusted;
        }

        info!(host = %host_id, trusted, "host verification complete");
        Ok(TrustReport::new(host_id, trusted, results, marker))
    }

    /// Evaluate one flavor group; appends rule results and returns whether
    /// the group is satisfied.
    fn verify_group(
        &self,
        manifest: &HostManifest,
        evidence: &FlavorGroupEvidence,
        results: &mut Vec<RuleResult>,
    ) -> Result<bool, VerifyError> {
        let group = &evidence.group;

        for (i, policy) in group.policies.iter().enumerate() {
            if group.policies[..i].iter().any(|p| p.part == policy.part) {
                return Err(VerifyError::DuplicatePolicy {
                    group: group.name.clone(),
                    part: policy.part,
                });
            }
        }
        for (part, flavors) in &evidence.flavors {
            if !flavors.is_empty() && group.policy_for(*part).is_none() {
                return Err(VerifyError::MissingPolicy {
                    group: group.name.clone(),
                    part: *part,
                });
            }
            for signed in flavors {
                if signed.flavor.meta.part != *part {
                    return Err(VerifyError::MismatchedPart {
                        flavor: signed.flavor.meta.id,
                        listed: *part,
                        actual: signed.flavor.meta.part,
                    });
                }
            }
        }

        let mut group_trusted = true;
        for policy in &group.policies {
            let flavors = evidence
                .flavors
                .get(&policy.part)
                .map(Vec::as_slice)
                .unwrap_or_default();

            if flavors.is_empty() {
                match policy.policy.required {
                    Requirement::Required => {
                        results.push(RuleResult {
                            rule: "flavor_part_required".into(),
                            flavor_id: None,
                            flavor_part: policy.part,
                            faults: vec![Fault::FlavorPartMissing { part: policy.part }],
                        });
                        group_trusted = false;
                    }
                    Requirement::RequiredIfDefined | Requirement::NotRequired => {}
                }
                continue;
            }

            // Evaluate every flavor of the part, then combine.
            let mut evaluated: Vec<(bool, Vec<RuleResult>)> = Vec::with_capacity(flavors.len());
            for signed in flavors {
                let flavor_results = self.verify_flavor(manifest, signed)?;
                let faultless = flavor_results.iter().all(RuleResult::trusted);
                evaluated.push((faultless, flavor_results));
            }

            let part_trusted = match policy.policy.match_type {
                MatchType::AnyOf => evaluated.iter().any(|(ok, _)| *ok),
                MatchType::AllOf => evaluated.iter().all(|(ok, _)| *ok),
            };

            // For a satisfied AnyOf, report the first matching flavor's
            // results; otherwise include everything that was evaluated so
            // the report explains the failure.
            match (policy.policy.match_type, part_trusted) {
                (MatchType::AnyOf, true) => {
                    if let Some((_, flavor_results)) =
                        evaluated.into_iter().find(|(ok, _)| *ok)
                    {
                        results.extend(flavor_results);
                    }
                }
                _ => {
                    for (_, flavor_results) in evaluated {
                        results.extend(flavor_results);
                    }
                }
            }

            group_trusted &= part_trusted;
        }

        Ok(group_trusted)
    }

    /// Evaluate one flavor's rule set. An untrusted signature is an
    /// automatic fault and the flavor's rules are not evaluated.
    fn verify_flavor(
        &self,
        manifest: &HostManifest,
        signed: &SignedFlavor,
    ) -> Result<Vec<RuleResult>, VerifyError> {
        if let Some(signature) = &self.signature {
            let ok = signature.verify(signed).map_err(VerifyError::Signature)?;
            if !ok {
                let fault = if signed.signature.is_empty() {
                    Fault::FlavorSignatureMissing {
                        flavor_id: signed.flavor.meta.id,
                    }
                } else {
                    Fault::FlavorSignatureNotTrusted {
                        flavor_id: signed.flavor.meta.id,
                    }
                };
                return Ok(vec![RuleResult {
                    rule: "flavor_signature".into(),
                    flavor_id: Some(signed.flavor.meta.id),
                    flavor_part: signed.flavor.meta.part,
                    faults: vec![fault],
                }]);
            }
        }
        Ok(RuleSet::for_flavor(&signed.flavor).apply(manifest))
    }
}
