use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle point or event source a hook is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    OnStartup,
    BeforeHelm,
    AfterHelm,
    AfterDeleteHelm,
    Schedule,
    OnKubernetesEvent,
}

impl BindingKind {
    pub const ALL: [BindingKind; 6] = [
        BindingKind::OnStartup,
        BindingKind::BeforeHelm,
        BindingKind::AfterHelm,
        BindingKind::AfterDeleteHelm,
        BindingKind::Schedule,
        BindingKind::OnKubernetesEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BindingKind::OnStartup => "OnStartup",
            BindingKind::BeforeHelm => "BeforeHelm",
            BindingKind::AfterHelm => "AfterHelm",
            BindingKind::AfterDeleteHelm => "AfterDeleteHelm",
            BindingKind::Schedule => "Schedule",
            BindingKind::OnKubernetesEvent => "OnKubernetesEvent",
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
