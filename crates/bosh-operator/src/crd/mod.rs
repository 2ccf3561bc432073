//! Custom resources the converter emits.
//!
//! The resources are reconciled by the companion controllers, this crate only
//! produces their desired state.

pub mod extended_job;
pub mod extended_secret;
pub mod extended_statefulset;

pub use extended_job::{ExtendedJob, ExtendedJobSpec, Output, Trigger, TriggerStrategy};
pub use extended_secret::{
    CertificateRequest, ExtendedSecret, ExtendedSecretSpec, Request, SecretReference, SecretType,
};
pub use extended_statefulset::{ExtendedStatefulSet, ExtendedStatefulSetSpec};

pub const GROUP: &str = "fissile.cloudfoundry.org";
pub const VERSION: &str = "v1alpha1";
