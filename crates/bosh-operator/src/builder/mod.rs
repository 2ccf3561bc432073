//! Builders for the Kubernetes objects the converter emits.

pub mod meta;
pub mod pod;
