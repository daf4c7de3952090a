// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! Host trust verification library
//!
//! This crate turns a host manifest plus a set of flavor groups into a
//! trust report. It has three layers:
//!
//! - **Rule engine** ([`rules`]): stateless predicates comparing one
//!   flavor-part expectation against manifest evidence. Mismatches and
//!   missing evidence become faults in the result, never errors.
//! - **Flavor-group verifier** ([`TrustVerifier`]): builds one rule set per
//!   flavor, combines outcomes per the group's match policies (AnyOf/AllOf,
//!   Required semantics) and aggregates groups into the host-level decision.
//! - **Trust cache** ([`TrustCache`]): bounded LRU memoizing the last
//!   report per host, keyed by a digest of the verification inputs.
//!
//! This crate is designed to run on the verifier side; it never talks to a
//! host and never blocks.

mod cache;
mod rules;
mod signature;
mod verifier;

pub use cache::{input_marker, TrustCache};
pub use rules::{Rule, RuleSet};
pub use signature::FlavorSignatureVerifier;
pub use verifier::{FlavorGroupEvidence, TrustVerifier, VerifierConfig, VerifyError};
