//! Turns BOSH deployment manifests into Kubernetes workloads.
//!
//! The [`kube_converter`] produces the Kubernetes objects of a deployment,
//! the [`data_gatherer`] resolves links and BPM information inside the
//! cluster and the [`template`] engine renders the job templates of a single
//! instance.

pub mod builder;
pub mod cli;
pub mod cluster_domain;
pub mod config;
pub mod crd;
pub mod data_gatherer;
pub mod interpolation;
pub mod kube_converter;
pub mod labels;
pub mod logging;
pub mod manifest;
pub mod names;
pub mod release_spec;
pub mod template;
