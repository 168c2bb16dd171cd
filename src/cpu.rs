//! CPU backend.
//!
//! The agent stage runs data-parallel with rayon over the next buffer while
//! every task reads the committed one. The field scatter stays serial, which
//! makes [`AccumulationPolicy::LastWriteWins`](crate::AccumulationPolicy)
//! deterministic here (flat-index order).

use rayon::prelude::*;

use crate::backend::ComputeBackend;
use crate::config::SimParams;
use crate::error::SimulationError;
use crate::field::{FieldCell, FieldGrid};
use crate::flock::{step_agent, Agent, FlockParams};
use crate::surface::{MeshLayout, SurfaceSamples};

pub struct CpuBackend {
    field: FieldGrid,
    flock: FlockParams,
    /// Ping-pong agent buffers; `current` is the committed one.
    agents: [Vec<Agent>; 2],
    current: usize,
    samples: SurfaceSamples,
    layout: MeshLayout,
}

impl CpuBackend {
    pub fn new(params: &SimParams, initial_agents: Vec<Agent>) -> Self {
        let next = initial_agents.clone();
        Self {
            field: FieldGrid::new(params.field),
            flock: params.flock,
            agents: [initial_agents, next],
            current: 0,
            samples: SurfaceSamples::default(),
            layout: MeshLayout::default(),
        }
    }

    /// Committed agents.
    pub fn agents(&self) -> &[Agent] {
        &self.agents[self.current]
    }

    pub fn field(&self) -> &FieldGrid {
        &self.field
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn reset_field(&mut self) {
        self.field.reset();
    }

    fn upload_surface(&mut self, samples: &SurfaceSamples, layout: &MeshLayout) {
        self.samples.clone_from(samples);
        if self.layout != *layout {
            self.layout.clone_from(layout);
        }
    }

    fn rebuild_field(&mut self) {
        self.field.accumulate(&self.samples, &self.layout);
        self.field.resolve();
    }

    fn step_agents(&mut self, dt: f32) {
        let [a, b] = &mut self.agents;
        let (prior, next) = if self.current == 0 { (&*a, b) } else { (&*b, a) };
        let field = &self.field;
        let flock = &self.flock;

        next.par_iter_mut()
            .enumerate()
            .for_each(|(index, out)| step_agent(index, prior, field, flock, dt, out));

        self.current ^= 1;
    }

    fn read_agents(&mut self) -> Result<Vec<Agent>, SimulationError> {
        Ok(self.agents().to_vec())
    }

    fn read_field(&mut self) -> Result<Vec<FieldCell>, SimulationError> {
        Ok(self.field.cells().to_vec())
    }
}
