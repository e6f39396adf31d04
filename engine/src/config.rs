// config.rs — Runtime configuration
//
// Host-tunable knobs for the runtime. Every field has a default so a JSON
// file only needs the values it changes.

use serde::{Deserialize, Serialize};

use crate::ir::ContinuityPolicy;

/// Which policy a target without an explicit one gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    None,
    Preserve,
    Slew,
    Project,
    Crossfade,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuityConfig {
    /// Time constant for slew and project policies.
    pub tau_ms: f64,
    /// Window used when no element mapping exists.
    pub crossfade_ms: f64,
    /// Nearest-neighbour match radius, in world units.
    pub nn_radius: f64,
    pub default_policy: PolicyKind,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        ContinuityConfig {
            tau_ms: 250.0,
            crossfade_ms: 300.0,
            nn_radius: 0.25,
            default_policy: PolicyKind::Project,
        }
    }
}

impl ContinuityConfig {
    /// Concrete policy for `kind` using this configuration's timings.
    pub fn policy(&self, kind: PolicyKind) -> ContinuityPolicy {
        match kind {
            PolicyKind::None => ContinuityPolicy::None,
            PolicyKind::Preserve => ContinuityPolicy::Preserve,
            PolicyKind::Slew => ContinuityPolicy::Slew {
                tau_ms: self.tau_ms,
            },
            PolicyKind::Project => ContinuityPolicy::Project {
                tau_ms: self.tau_ms,
            },
            PolicyKind::Crossfade => ContinuityPolicy::Crossfade {
                window_ms: self.crossfade_ms,
            },
        }
    }

    pub fn default_policy(&self) -> ContinuityPolicy {
        self.policy(self.default_policy)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub continuity: ContinuityConfig,
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = RuntimeConfig::from_json(r#"{"continuity": {"tau_ms": 100}}"#).unwrap();
        assert_eq!(cfg.continuity.tau_ms, 100.0);
        assert_eq!(cfg.continuity.crossfade_ms, 300.0);
        assert_eq!(cfg.continuity.default_policy, PolicyKind::Project);
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(RuntimeConfig::from_json("{}").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn policy_uses_configured_timings() {
        let cfg = ContinuityConfig {
            tau_ms: 80.0,
            crossfade_ms: 120.0,
            ..ContinuityConfig::default()
        };
        assert_eq!(cfg.policy(PolicyKind::Slew), ContinuityPolicy::Slew { tau_ms: 80.0 });
        assert_eq!(
            cfg.policy(PolicyKind::Crossfade),
            ContinuityPolicy::Crossfade { window_ms: 120.0 }
        );
        assert_eq!(cfg.default_policy(), ContinuityPolicy::Project { tau_ms: 80.0 });
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(RuntimeConfig::from_json(r#"{"continuity": {"default_policy": "wobble"}}"#).is_err());
    }
}
