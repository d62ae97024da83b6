//! Plain data shared by the package runtime, the node host and the CLI.
//!
//! Nothing in here performs I/O: these are the descriptors the desired-state
//! driver hands to the runtime and the condition records the runtime hands
//! back to the declarative status.

pub mod binding;
pub mod condition;
pub mod descriptor;

pub use binding::BindingKind;
pub use condition::{Condition, ConditionStatus};
pub use descriptor::{
    ApplicationSpec, Constraints, Credentials, DEFAULT_NAMESPACE, MODULES_NAMESPACE, ModuleSpec,
    Repository, Scheme, Settings, application_id,
};
