// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end verification scenarios against a single flavor group.

use p256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
use sha2::{Digest, Sha256};
use trust_types::{
    DigestBank, ExpectedPcr, Fault, Flavor, FlavorGroup, FlavorMatchPolicy, FlavorMeta,
    FlavorPart, HostInfo, HostManifest, MatchPolicy, MatchType, PcrValue, Requirement,
    SignedFlavor,
};
use trust_verifier::{FlavorGroupEvidence, FlavorSignatureVerifier, TrustVerifier};
use uuid::Uuid;

fn manifest_with_pcr0(value: &str) -> HostManifest {
    HostManifest {
        host_info: HostInfo {
            vendor: "Intel".into(),
            os_name: "Ubuntu".into(),
            os_version: "22.04".into(),
            tpm_version: "2.0".into(),
            tpm_enabled: true,
            uefi_enabled: true,
            ..Default::default()
        },
        pcrs: vec![PcrValue {
            index: 0,
            bank: DigestBank::Sha256,
            value: hex::decode(value).unwrap(),
        }],
        event_log: vec![],
        measurements: vec![],
        asset_tag: None,
    }
}

fn platform_flavor_expecting(value: &str) -> Flavor {
    Flavor {
        meta: FlavorMeta {
            id: Uuid::new_v4(),
            part: FlavorPart::Platform,
            label: "platform-reference".into(),
            description: String::new(),
        },
        pcrs: vec![ExpectedPcr {
            index: 0,
            bank: DigestBank::Sha256,
            value: hex::decode(value).unwrap(),
            event_log: None,
        }],
        measurements: vec![],
        asset_tag: None,
    }
}

fn platform_group() -> FlavorGroup {
    FlavorGroup {
        id: Uuid::new_v4(),
        name: "default".into(),
        policies: vec![FlavorMatchPolicy {
            part: FlavorPart::Platform,
            policy: MatchPolicy {
                match_type: MatchType::AllOf,
                required: Requirement::Required,
            },
        }],
    }
}

fn evidence(flavor: Flavor, signature: Vec<u8>) -> FlavorGroupEvidence {
    FlavorGroupEvidence {
        group: platform_group(),
        flavors: [(
            FlavorPart::Platform,
            vec![SignedFlavor { flavor, signature }],
        )]
        .into_iter()
        .collect(),
    }
}

fn sign(flavor: &Flavor, key: &SigningKey) -> Vec<u8> {
    let digest = Sha256::digest(flavor.canonical_bytes().unwrap());
    let signature: Signature = key.sign_prehash(digest.as_slice()).unwrap();
    signature.to_vec()
}

#[test]
fn test_mismatched_pcr_yields_untrusted_report() {
    tracing_subscriber::fmt::try_init().ok();

    let verifier = TrustVerifier::unsigned();
    let ev = evidence(platform_flavor_expecting("abc123"), vec![]);

    let report = verifier
        .verify(Uuid::new_v4(), &manifest_with_pcr0("xyz789"), &[ev])
        .unwrap();

    assert!(!report.trusted);
    let faulted: Vec<_> = report.faulted().collect();
    assert_eq!(faulted.len(), 1);
    assert_eq!(
        faulted[0].faults,
        vec![Fault::PcrValueMismatch {
            index: 0,
            bank: DigestBank::Sha256,
            expected: "abc123".into(),
            actual: "xyz789".into(),
        }]
    );
}

#[test]
fn test_matching_pcr_yields_trusted_report() {
    let verifier = TrustVerifier::unsigned();
    let ev = evidence(platform_flavor_expecting("abc123"), vec![]);

    let report = verifier
        .verify(Uuid::new_v4(), &manifest_with_pcr0("abc123"), &[ev])
        .unwrap();

    assert!(report.trusted);
    assert_eq!(report.faulted().count(), 0);
}

#[test]
fn test_unsigned_flavor_faults_when_signatures_enforced() {
    let key = SigningKey::from_slice(&[0x17; 32]).unwrap();
    let verifier = TrustVerifier::with_signature_verifier(
        FlavorSignatureVerifier::from_keys(vec![*key.verifying_key()]).unwrap(),
    );

    // matching PCR, but the flavor is unsigned: the signature fault must
    // dominate and the PCR rules must not run
    let ev = evidence(platform_flavor_expecting("abc123"), vec![]);
    let report = verifier
        .verify(Uuid::new_v4(), &manifest_with_pcr0("abc123"), &[ev])
        .unwrap();

    assert!(!report.trusted);
    let faulted: Vec<_> = report.faulted().collect();
    assert_eq!(faulted.len(), 1);
    assert_eq!(faulted[0].rule, "flavor_signature");
    assert!(matches!(
        faulted[0].faults[0],
        Fault::FlavorSignatureMissing { .. }
    ));
}

#[test]
fn test_signed_flavor_verifies_end_to_end() {
    let key = SigningKey::from_slice(&[0x17; 32]).unwrap();
    let verifier = TrustVerifier::with_signature_verifier(
        FlavorSignatureVerifier::from_keys(vec![*key.verifying_key()]).unwrap(),
    );

    let flavor = platform_flavor_expecting("abc123");
    let signature = sign(&flavor, &key);
    let ev = evidence(flavor, signature);

    let report = verifier
        .verify(Uuid::new_v4(), &manifest_with_pcr0("abc123"), &[ev])
        .unwrap();
    assert!(report.trusted);
}

#[test]
fn test_foreign_signature_faults_that_flavor() {
    let trusted_key = SigningKey::from_slice(&[0x17; 32]).unwrap();
    let rogue_key = SigningKey::from_slice(&[0x42; 32]).unwrap();
    let verifier = TrustVerifier::with_signature_verifier(
        FlavorSignatureVerifier::from_keys(vec![*trusted_key.verifying_key()]).unwrap(),
    );

    let flavor = platform_flavor_expecting("abc123");
    let signature = sign(&flavor, &rogue_key);
    let ev = evidence(flavor, signature);

    let report = verifier
        .verify(Uuid::new_v4(), &manifest_with_pcr0("abc123"), &[ev])
        .unwrap();
    assert!(!report.trusted);
    assert!(report
        .results
        .iter()
        .any(|r| matches!(r.faults.first(), Some(Fault::FlavorSignatureNotTrusted { .. }))));
}
