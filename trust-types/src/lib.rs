// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Trust Types - Common type definitions for host trust verification
//!
//! This crate contains type definitions shared across the trust crates:
//! - trust-verifier (evaluates host evidence against flavor reference values)
//! - trust-manager (queues and orchestrates verification work)
//!
//! The manifest types double as wire types: a trust agent running on the
//! host produces a `HostManifest` and ships it SCALE-encoded to the
//! verification service.

mod flavor;
mod manifest;
mod report;
mod queue;

pub use flavor::{
    ExpectedAssetTag, ExpectedEvent, ExpectedEventLog, ExpectedMeasurement, ExpectedPcr, Flavor,
    FlavorGroup, FlavorMatchPolicy, FlavorMeta, FlavorPart, EventLogSemantics, MatchPolicy,
    MatchType, Requirement, SignedFlavor,
};
pub use manifest::{AssetTagEvidence, DigestBank, HostInfo, HostManifest, MeasurementEntry, PcrEvent, PcrValue};
pub use queue::{QueueEntry, QueueStatus};
pub use report::{Fault, RuleResult, TrustReport};
