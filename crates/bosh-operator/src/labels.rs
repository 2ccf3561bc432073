//! Label keys attached to the generated objects.

use const_format::concatcp;

/// The operator specific label key prefix.
const FISSILE_KEY_PREFIX: &str = "fissile.cloudfoundry.org/";

/// The name of the deployment an object belongs to.
pub const DEPLOYMENT_NAME_KEY: &str = concatcp!(FISSILE_KEY_PREFIX, "deployment-name");

/// The name of the instance group an object belongs to.
pub const INSTANCE_GROUP_NAME_KEY: &str = concatcp!(FISSILE_KEY_PREFIX, "instance-group-name");

/// The SHA-1 of the manifest the object was generated from. A changed
/// manifest yields a new version of the labelled output secrets.
pub const MANIFEST_SHA1_KEY: &str = concatcp!(FISSILE_KEY_PREFIX, "manifest-sha1");

/// Index of the availability zone of a pod.
pub const AZ_INDEX_KEY: &str = concatcp!(FISSILE_KEY_PREFIX, "az-index");

/// Ordinal of a pod within its availability zone.
pub const POD_ORDINAL_KEY: &str = concatcp!(FISSILE_KEY_PREFIX, "pod-ordinal");

/// The extended job consuming the output secrets of another extended job.
pub const REFERENCED_JOB_NAME_KEY: &str = concatcp!(FISSILE_KEY_PREFIX, "referenced-job-name");

/// The manifest variable a generated secret holds.
pub const VARIABLE_NAME_KEY: &str = "variableName";

/// Marks pods that are deleted once their extended job succeeded.
pub const DELETE_KEY: &str = "delete";
pub const DELETE_POD_VALUE: &str = "pod";
