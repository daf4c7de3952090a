// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! Flavor signature verification
//!
//! Flavors are signed by an administrator key at authoring time. The
//! verifier holds the trusted certificate set and checks each flavor's
//! ECDSA P-256 signature over the SHA-256 of its canonical encoding. An
//! invalid signature is not an error: the caller records it as a fault for
//! that flavor.

use anyhow::{bail, Context, Result};
use p256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::debug;
use trust_types::SignedFlavor;
use x509_parser::prelude::*;

const OID_EC_PUBLIC_KEY: &[u64] = &[1, 2, 840, 10045, 2, 1];

pub struct FlavorSignatureVerifier {
    keys: Vec<VerifyingKey>,
}

impl FlavorSignatureVerifier {
    /// Build a verifier from DER-encoded flavor signing certificates.
    pub fn new(certs_der: &[Vec<u8>]) -> Result<Self> {
        if certs_der.is_empty() {
            bail!("no flavor signing certificates configured");
        }
        let mut keys = Vec::with_capacity(certs_der.len());
        for (i, der) in certs_der.iter().enumerate() {
            keys.push(
                extract_verifying_key(der)
                    .with_context(|| format!("failed to load flavor signing certificate #{i}"))?,
            );
        }
        Ok(Self { keys })
    }

    /// Build a verifier directly from verifying keys.
    pub fn from_keys(keys: Vec<VerifyingKey>) -> Result<Self> {
        if keys.is_empty() {
            bail!("no flavor signing keys configured");
        }
        Ok(Self { keys })
    }

    /// Check a flavor's signature against the configured key set.
    ///
    /// Returns `Ok(false)` for a missing, malformed or untrusted
    /// signature; `Err` only when the flavor cannot be canonically
    /// encoded.
    pub fn verify(&self, signed: &SignedFlavor) -> Result<bool> {
        if signed.signature.is_empty() {
            return Ok(false);
        }
        let Ok(signature) = Signature::from_slice(&signed.signature) else {
            debug!(
                flavor = %signed.flavor.meta.id,
                "flavor carries a malformed signature"
            );
            return Ok(false);
        };

        let canonical = signed
            .flavor
            .canonical_bytes()
            .context("failed to encode flavor for signature verification")?;
        let digest = Sha256::digest(&canonical);

        for key in &self.keys {
            if key.verify_prehash(digest.as_slice(), &signature).is_ok() {
                debug!(flavor = %signed.flavor.meta.id, "flavor signature verified");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn extract_verifying_key(cert_der: &[u8]) -> Result<VerifyingKey> {
    let (_, cert) =
        X509Certificate::from_der(cert_der).context("failed to parse certificate")?;

    let spki = cert.public_key();
    let oid: Vec<u64> = spki
        .algorithm
        .algorithm
        .iter()
        .context("invalid public key algorithm OID")?
        .collect();
    if oid != OID_EC_PUBLIC_KEY {
        bail!("unsupported public key algorithm: {oid:?}");
    }

    VerifyingKey::from_sec1_bytes(spki.subject_public_key.data.as_ref())
        .context("failed to decode P-256 public key from certificate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey};
    use trust_types::{Flavor, FlavorMeta, FlavorPart};
    use uuid::Uuid;

    fn signing_key() -> SigningKey {
        SigningKey::from_slice(&[0x17; 32]).unwrap()
    }

    fn flavor() -> Flavor {
        Flavor {
            meta: FlavorMeta {
                id: Uuid::new_v4(),
                part: FlavorPart::Platform,
                label: "platform-a".into(),
                description: String::new(),
            },
            pcrs: vec![],
            measurements: vec![],
            asset_tag: None,
        }
    }

    fn sign(flavor: &Flavor, key: &SigningKey) -> Vec<u8> {
        let digest = Sha256::digest(flavor.canonical_bytes().unwrap());
        let signature: Signature = key.sign_prehash(digest.as_slice()).unwrap();
        signature.to_vec()
    }

    #[test]
    fn test_valid_signature_verifies() {
        let key = signing_key();
        let verifier =
            FlavorSignatureVerifier::from_keys(vec![*key.verifying_key()]).unwrap();
        let flavor = flavor();
        let signed = SignedFlavor {
            signature: sign(&flavor, &key),
            flavor,
        };
        assert!(verifier.verify(&signed).unwrap());
    }

    #[test]
    fn test_untrusted_key_rejected() {
        let verifier =
            FlavorSignatureVerifier::from_keys(vec![*signing_key().verifying_key()]).unwrap();
        let other = SigningKey::from_slice(&[0x42; 32]).unwrap();
        let flavor = flavor();
        let signed = SignedFlavor {
            signature: sign(&flavor, &other),
            flavor,
        };
        assert!(!verifier.verify(&signed).unwrap());
    }

    #[test]
    fn test_tampered_flavor_rejected() {
        let key = signing_key();
        let verifier =
            FlavorSignatureVerifier::from_keys(vec![*key.verifying_key()]).unwrap();
        let flavor = flavor();
        let mut signed = SignedFlavor {
            signature: sign(&flavor, &key),
            flavor,
        };
        signed.flavor.meta.label = "platform-b".into();
        assert!(!verifier.verify(&signed).unwrap());
    }

    #[test]
    fn test_missing_and_garbage_signatures_are_untrusted_not_errors() {
        let verifier =
            FlavorSignatureVerifier::from_keys(vec![*signing_key().verifying_key()]).unwrap();
        let signed = SignedFlavor {
            flavor: flavor(),
            signature: vec![],
        };
        assert!(!verifier.verify(&signed).unwrap());

        let signed = SignedFlavor {
            flavor: flavor(),
            signature: vec![0xde, 0xad],
        };
        assert!(!verifier.verify(&signed).unwrap());
    }

    #[test]
    fn test_rejects_garbage_certificate() {
        assert!(FlavorSignatureVerifier::new(&[vec![0u8; 16]]).is_err());
        assert!(FlavorSignatureVerifier::new(&[]).is_err());
    }
}
