use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};

use crate::tools::CapabilitySchema;

/// Access level applied to every capability request in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    Full,
    /// Inspecting capabilities only.
    Restricted,
}

impl AccessMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" | "agent" => Ok(Self::Full),
            "restricted" | "plan" => Ok(Self::Restricted),
            other => Err(format!(
                "Unknown mode '{other}'. Available modes: full, restricted"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
}

impl PolicyDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decides whether a capability may run under `mode`. Pure.
#[must_use]
pub fn evaluate(schema: &CapabilitySchema, mode: AccessMode) -> PolicyDecision {
    match mode {
        AccessMode::Full => PolicyDecision::Allow,
        AccessMode::Restricted if schema.mutating => PolicyDecision::Deny {
            reason: format!(
                "{} modifies files and is not available in restricted mode",
                schema.name
            ),
        },
        AccessMode::Restricted => PolicyDecision::Allow,
    }
}

/// Payload returned to the model in place of a denied capability's output.
#[must_use]
pub fn refusal_payload(tool_name: &str, mode: AccessMode, reason: &str) -> Value {
    json!({
        "error": reason,
        "denied": true,
        "tool": tool_name,
        "mode": mode.as_str(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(mutating: bool) -> CapabilitySchema {
        CapabilitySchema {
            name: if mutating { "writeFile" } else { "readFile" },
            description: "",
            parameters: Vec::new(),
            mutating,
        }
    }

    #[test]
    fn full_mode_allows_everything() {
        assert!(evaluate(&schema(true), AccessMode::Full).is_allowed());
        assert!(evaluate(&schema(false), AccessMode::Full).is_allowed());
    }

    #[test]
    fn restricted_mode_denies_only_mutating_capabilities() {
        assert!(evaluate(&schema(false), AccessMode::Restricted).is_allowed());
        match evaluate(&schema(true), AccessMode::Restricted) {
            PolicyDecision::Deny { reason } => assert!(reason.contains("writeFile")),
            PolicyDecision::Allow => panic!("mutating capability must be denied"),
        }
    }

    #[test]
    fn modes_parse_from_names_and_aliases() {
        assert_eq!("restricted".parse::<AccessMode>(), Ok(AccessMode::Restricted));
        assert_eq!("Plan".parse::<AccessMode>(), Ok(AccessMode::Restricted));
        assert_eq!("agent".parse::<AccessMode>(), Ok(AccessMode::Full));
        assert!("yolo".parse::<AccessMode>().is_err());
    }
}
