//! Dispatch sizing for the three compute stages.
//!
//! Every kernel runs one invocation per unit (cell, surface sample or agent)
//! in workgroups of a single configured width. The plan is computed once at
//! startup and never changes.

use crate::config::DispatchPolicy;
use crate::error::ConfigError;

/// Largest workgroup count a single dispatch dimension may carry.
pub const MAX_GROUPS_PER_DIMENSION: u32 = 65535;

/// Workgroup counts for one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageDispatch {
    /// Units the stage processes.
    pub units: u32,
    /// Workgroups dispatched along x.
    pub groups: u32,
}

impl StageDispatch {
    fn plan(
        stage: &'static str,
        units: u32,
        width: u32,
        policy: DispatchPolicy,
    ) -> Result<Self, ConfigError> {
        if policy == DispatchPolicy::Reject && units % width != 0 {
            return Err(ConfigError::IndivisibleDispatch { stage, count: units, width });
        }

        let groups = units.div_ceil(width);
        if groups > MAX_GROUPS_PER_DIMENSION {
            return Err(ConfigError::DispatchTooLarge { stage, groups });
        }

        Ok(Self { units, groups })
    }

    /// Invocations launched that fall past the last unit.
    pub fn idle_lanes(&self, width: u32) -> u32 {
        self.groups * width - self.units
    }

    /// Whether the stage has no work this run.
    pub fn is_empty(&self) -> bool {
        self.groups == 0
    }
}

/// Startup dispatch sizing for the field, surface and agent stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchPlan {
    pub workgroup_size: u32,
    pub policy: DispatchPolicy,
    /// One invocation per field cell (reset and resolve).
    pub cells: StageDispatch,
    /// One invocation per surface sample (accumulate).
    pub vertices: StageDispatch,
    /// One invocation per agent (flock step).
    pub agents: StageDispatch,
}

impl DispatchPlan {
    pub fn new(
        workgroup_size: u32,
        policy: DispatchPolicy,
        cell_count: u32,
        vertex_count: u32,
        agent_count: u32,
    ) -> Result<Self, ConfigError> {
        if !workgroup_size.is_power_of_two() || workgroup_size > 1024 {
            return Err(ConfigError::InvalidWorkgroupSize(workgroup_size));
        }

        let plan = Self {
            workgroup_size,
            policy,
            cells: StageDispatch::plan("Cell", cell_count, workgroup_size, policy)?,
            vertices: StageDispatch::plan("Vertex", vertex_count, workgroup_size, policy)?,
            agents: StageDispatch::plan("Agent", agent_count, workgroup_size, policy)?,
        };

        log::debug!(
            "Dispatch plan (width {}): cells {} groups, vertices {} groups, agents {} groups",
            workgroup_size,
            plan.cells.groups,
            plan.vertices.groups,
            plan.agents.groups
        );
        let idle = plan.idle_lanes();
        if idle > 0 {
            log::info!("Padded dispatch leaves {} idle invocations per frame", idle);
        }

        Ok(plan)
    }

    /// Total padded invocations across all stages of one frame.
    ///
    /// Cells are dispatched twice per frame (reset and resolve).
    pub fn idle_lanes(&self) -> u32 {
        let w = self.workgroup_size;
        self.cells.idle_lanes(w) * 2 + self.vertices.idle_lanes(w) + self.agents.idle_lanes(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_rounds_up() {
        let plan = DispatchPlan::new(256, DispatchPolicy::Pad, 64, 1000, 128).unwrap();
        assert_eq!(plan.cells.groups, 1);
        assert_eq!(plan.vertices.groups, 4);
        assert_eq!(plan.agents.groups, 1);
        assert_eq!(plan.vertices.idle_lanes(256), 24);
    }

    #[test]
    fn test_exact_multiple_has_no_idle_lanes() {
        let plan = DispatchPlan::new(64, DispatchPolicy::Reject, 512, 128, 4096).unwrap();
        assert_eq!(plan.cells.groups, 8);
        assert_eq!(plan.agents.groups, 64);
        assert_eq!(plan.idle_lanes(), 0);
    }

    #[test]
    fn test_reject_indivisible() {
        let err = DispatchPlan::new(64, DispatchPolicy::Reject, 512, 100, 64).unwrap_err();
        assert_eq!(
            err,
            ConfigError::IndivisibleDispatch { stage: "Vertex", count: 100, width: 64 }
        );
    }

    #[test]
    fn test_zero_units() {
        let plan = DispatchPlan::new(256, DispatchPolicy::Reject, 256, 0, 256).unwrap();
        assert!(plan.vertices.is_empty());
        assert_eq!(plan.vertices.idle_lanes(256), 0);
    }

    #[test]
    fn test_invalid_workgroup_size() {
        assert_eq!(
            DispatchPlan::new(100, DispatchPolicy::Pad, 1, 1, 1).unwrap_err(),
            ConfigError::InvalidWorkgroupSize(100)
        );
        assert!(DispatchPlan::new(0, DispatchPolicy::Pad, 1, 1, 1).is_err());
        assert!(DispatchPlan::new(2048, DispatchPolicy::Pad, 1, 1, 1).is_err());
    }

    #[test]
    fn test_too_many_groups() {
        let err = DispatchPlan::new(1, DispatchPolicy::Pad, 70_000, 0, 1).unwrap_err();
        assert_eq!(err, ConfigError::DispatchTooLarge { stage: "Cell", groups: 70_000 });
    }
}
