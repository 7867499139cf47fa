//! Fault scenarios for the simulated sibling group.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// One instance changes scale; every sibling adopts its time
    ScaleSync,

    /// Half the siblings are unreachable during a scale change
    PartialOutage,

    /// An instance stops, stays down, and resumes from its snapshot
    RestartContinuity,

    /// Shutdown pushes the final time to siblings exactly once
    ShutdownHandoff,

    /// Seeded random scale changes, latency and deliveries on every instance
    ScaleStorm,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ScaleSync,
            ScenarioId::PartialOutage,
            ScenarioId::RestartContinuity,
            ScenarioId::ShutdownHandoff,
            ScenarioId::ScaleStorm,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ScaleSync => "scale_sync",
            ScenarioId::PartialOutage => "partial_outage",
            ScenarioId::RestartContinuity => "restart_continuity",
            ScenarioId::ShutdownHandoff => "shutdown_handoff",
            ScenarioId::ScaleStorm => "scale_storm",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ScaleSync => "Scale change on one instance, siblings adopt the published time",
            ScenarioId::PartialOutage => "Half the siblings unreachable, command still succeeds",
            ScenarioId::RestartContinuity => "Stop, downtime, restart: simulated time resumes from the snapshot",
            ScenarioId::ShutdownHandoff => "Double stop publishes the final time once",
            ScenarioId::ScaleStorm => "Random scale changes with link latency, ledgers must agree",
        }
    }

    /// Minimum group size the scenario needs.
    pub fn min_instances(&self) -> usize {
        match self {
            ScenarioId::RestartContinuity => 1,
            ScenarioId::PartialOutage => 3,
            _ => 2,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scale_sync" | "scalesync" => Ok(ScenarioId::ScaleSync),
            "partial_outage" | "partialoutage" => Ok(ScenarioId::PartialOutage),
            "restart_continuity" | "restartcontinuity" => Ok(ScenarioId::RestartContinuity),
            "shutdown_handoff" | "shutdownhandoff" => Ok(ScenarioId::ShutdownHandoff),
            "scale_storm" | "scalestorm" => Ok(ScenarioId::ScaleStorm),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
            assert_eq!(id.to_string(), id.name());
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("ScaleStorm".parse::<ScenarioId>(), Ok(ScenarioId::ScaleStorm));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
