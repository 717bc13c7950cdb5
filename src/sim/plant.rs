//! plant.rs
//! Position side of the simulated rig.

use parking_lot::Mutex;
use rand::random_range;
use std::{sync::Arc, time::Instant};

use crate::error::Result;
use crate::position::PositionSource;
use crate::sim::RigState;

pub struct SimPlant {
    state: Arc<Mutex<RigState>>,
}

impl SimPlant {
    pub(crate) fn new(state: Arc<Mutex<RigState>>) -> Self {
        Self { state }
    }
}

impl PositionSource for SimPlant {
    fn read_position(&mut self) -> Result<f64> {
        let mut st = self.state.lock();
        if let Some(z) = st.held_position {
            return Ok(z);
        }
        st.advance(Instant::now());
        let noise = st.config.noise_mm;
        let z = st.position_mm;
        Ok(if noise > 0.0 { z + random_range(-noise..noise) } else { z })
    }
}
