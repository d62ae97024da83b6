//! Condition records.
//!
//! Internal conditions are the fine-grained facts recorded by lifecycle tasks;
//! external conditions are the coarse public view derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub name: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Condition {
    pub fn new(name: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            name: name.into(),
            status,
            reason: String::new(),
            message: String::new(),
        }
    }

    pub fn ok(name: impl Into<String>) -> Self {
        Self::new(name, ConditionStatus::True)
    }

    pub fn failed(
        name: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, ConditionStatus::False)
            .with_reason(reason)
            .with_message(message)
    }

    pub fn unknown(name: impl Into<String>) -> Self {
        Self::new(name, ConditionStatus::Unknown)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    /// True when status, reason or message differ. The name is not compared.
    pub fn differs(&self, other: &Condition) -> bool {
        self.status != other.status || self.reason != other.reason || self.message != other.message
    }
}

/// Names of the fine-grained conditions recorded by lifecycle tasks.
pub mod internal {
    pub const DOWNLOADED: &str = "Downloaded";
    pub const READY_ON_FILESYSTEM: &str = "ReadyOnFilesystem";
    pub const REQUIREMENTS_MET: &str = "RequirementsMet";
    pub const READY_IN_RUNTIME: &str = "ReadyInRuntime";
    pub const HOOKS_PROCESSED: &str = "HooksProcessed";
    pub const HELM_APPLIED: &str = "HelmApplied";
    pub const READY_IN_CLUSTER: &str = "ReadyInCluster";
    pub const SETTINGS_VALID: &str = "SettingsValid";

    /// Signal raised by a successful load; not part of the seeded list.
    pub const WAIT_CONVERGE: &str = "WaitConverge";

    /// Seeded, in order, for every new status entry.
    pub const ALL: [&str; 8] = [
        DOWNLOADED,
        READY_ON_FILESYSTEM,
        REQUIREMENTS_MET,
        READY_IN_RUNTIME,
        HOOKS_PROCESSED,
        HELM_APPLIED,
        READY_IN_CLUSTER,
        SETTINGS_VALID,
    ];

    /// Reset whenever the package leaves the running state.
    pub const RUNTIME_SCOPED: [&str; 5] = [
        READY_IN_RUNTIME,
        HOOKS_PROCESSED,
        HELM_APPLIED,
        READY_IN_CLUSTER,
        WAIT_CONVERGE,
    ];

    /// Additionally reset when a new version is about to be fetched.
    pub const VERSION_SCOPED: [&str; 2] = [DOWNLOADED, READY_ON_FILESYSTEM];
}

/// Names of the public conditions derived by the condition mapper.
pub mod external {
    pub const INSTALLED: &str = "Installed";
    pub const READY: &str = "Ready";
    pub const PARTIALLY_DEGRADED: &str = "PartiallyDegraded";
    pub const UPDATE_INSTALLED: &str = "UpdateInstalled";
    pub const MANAGED: &str = "Managed";
    pub const CONFIGURATION_APPLIED: &str = "ConfigurationApplied";
}

/// Reasons attached to failed internal conditions.
pub mod reason {
    pub const DOWNLOAD_FAILED: &str = "DownloadFailed";
    pub const INSTALL_FAILED: &str = "InstallFailed";
    pub const LOAD_FAILED: &str = "LoadFailed";
    pub const REQUIREMENTS_NOT_MET: &str = "RequirementsNotMet";
    pub const SETTINGS_INVALID: &str = "SettingsInvalid";
    pub const HOOKS_INIT_FAILED: &str = "HooksInitFailed";
    pub const HOOK_FAILED: &str = "HookFailed";
    pub const HELM_FAILED: &str = "HelmUpgradeFailed";
    pub const NOT_LOADED: &str = "NotLoaded";
    pub const TASK_FAILED: &str = "TaskFailed";
}
