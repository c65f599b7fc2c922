//! Interruption classification

use serde::{Deserialize, Serialize};

/// Something outside the step loop that demands attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interruption {
    UserPause,
    UserResume,
    UserCancel,
    /// Incoming call, system dialog and the like
    SystemInterrupt,
    SurfaceLocked,
    PermissionRevoked,
}

/// What the orchestrator does about an interruption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptionResponse {
    WaitForResume,
    Continue,
    Stop,
    WaitForUnlock,
    RequestPermissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptionDecision {
    pub response: InterruptionResponse,
    /// Whether the task survives the interruption
    pub should_continue: bool,
}

impl Interruption {
    pub const ALL: [Interruption; 6] = [
        Interruption::UserPause,
        Interruption::UserResume,
        Interruption::UserCancel,
        Interruption::SystemInterrupt,
        Interruption::SurfaceLocked,
        Interruption::PermissionRevoked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPause => "user-pause",
            Self::UserResume => "user-resume",
            Self::UserCancel => "user-cancel",
            Self::SystemInterrupt => "system-interrupt",
            Self::SurfaceLocked => "surface-locked",
            Self::PermissionRevoked => "permission-revoked",
        }
    }

    pub fn classify(&self) -> InterruptionDecision {
        use InterruptionResponse::*;
        let (response, should_continue) = match self {
            Self::UserPause => (WaitForResume, true),
            Self::UserResume => (Continue, true),
            Self::UserCancel => (Stop, false),
            Self::SystemInterrupt => (WaitForResume, true),
            Self::SurfaceLocked => (WaitForUnlock, true),
            Self::PermissionRevoked => (RequestPermissions, false),
        };
        InterruptionDecision {
            response,
            should_continue,
        }
    }
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Interruption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .find(|i| i.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("Unknown interruption: {}", s))
    }
}
