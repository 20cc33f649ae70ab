//! Process identity: instance id, start time, version.

use std::sync::LazyLock;

use uuid::Uuid;

use crate::types::now_epoch_seconds;

static INSTANCE_ID: LazyLock<String> = LazyLock::new(|| Uuid::new_v4().to_string());
static RUNNING_SINCE: LazyLock<i64> = LazyLock::new(now_epoch_seconds);

/// Random UUID identifying this process, stable for its lifetime.
#[must_use]
pub fn instance_id() -> &'static str {
    &INSTANCE_ID
}

/// Epoch seconds at which this process started serving.
#[must_use]
pub fn running_since_epoch_seconds() -> i64 {
    *RUNNING_SINCE
}

/// The service version: a build-time override, or the crate version.
#[must_use]
pub fn binary_version() -> &'static str {
    option_env!("LINKWARD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_is_stable() {
        assert_eq!(instance_id(), instance_id());
        assert_eq!(instance_id().len(), 36);
    }

    #[test]
    fn test_version_is_not_empty() {
        assert!(!binary_version().is_empty());
    }
}
