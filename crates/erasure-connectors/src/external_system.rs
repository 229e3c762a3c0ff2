//! Re-exports of the `ExternalSystem` contract owned by `erasure-core`
//! (§4.4): the Engine depends only on the contract, so it lives in the core
//! crate and this crate depends on core rather than the other way around.
//! What this crate adds is `MockExternalSystem` in [`crate::mock`] for
//! tests — wiring up real HTTP clients against vendor APIs is out of scope.

pub use erasure_core::external_system::{DeletionContext, DeletionOutcome, ExternalSystem, SharedExternalSystem};
