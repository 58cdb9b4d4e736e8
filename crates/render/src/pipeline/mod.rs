//! Pipeline specialization: build vertex, setup, and pixel routines for a
//! linked program under a concrete state vector, and cache them.

mod link;
mod pixel;
mod setup;
mod shadercore;
mod vertex;

pub use link::{link, LinkedProgram, VaryingSlot};

use rustc_hash::FxHasher;
use shale_core::{PipelineState, VisualOrder};
use shale_jit::{BackendConfig, BackendError, Routine};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct PipelineRoutines {
    pub vertex: Arc<Routine>,
    pub setup: Arc<Routine>,
    pub pixel: Arc<Routine>,
}

pub struct RoutineCache {
    map: rustc_hash::FxHashMap<u64, PipelineRoutines>,
    pub config: BackendConfig,
}

impl RoutineCache {
    pub fn new(config: BackendConfig) -> RoutineCache {
        RoutineCache {
            map: rustc_hash::FxHashMap::default(),
            config,
        }
    }

    pub fn get(
        &mut self,
        program_id: u64,
        program: &LinkedProgram,
        state: &PipelineState,
        order: VisualOrder,
    ) -> Result<PipelineRoutines, BackendError> {
        let mut h = FxHasher::default();
        program_id.hash(&mut h);
        state.cache_key().hash(&mut h);
        order.hash(&mut h);
        let key = h.finish();

        if let Some(routines) = self.map.get(&key) {
            return Ok(routines.clone());
        }

        debug!(program_id, key, "specializing pipeline routines");
        let routines = PipelineRoutines {
            vertex: Arc::new(vertex::build_vertex_routine(program, state, &self.config)?),
            setup: Arc::new(setup::build_setup_routine(program, state, &self.config)?),
            pixel: Arc::new(pixel::build_pixel_routine(
                program,
                state,
                order,
                &self.config,
            )?),
        };
        self.map.insert(key, routines.clone());
        Ok(routines)
    }
}
