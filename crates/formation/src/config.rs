use serde::Deserialize;

use crate::geometry::FormationShape;

/// Timers and defaults shared by every formation on every map.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormationConfig {
    /// Delay before the first liveness check after a master is seated.
    pub settle_delay_ms: u32,
    pub liveness_interval_ms: u32,
    /// Upper bound on the next liveness check once the master dies.
    pub master_death_recheck_ms: u32,
    pub dynamic_shape: FormationShape,
    pub dynamic_spread: f32,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 5_000,
            liveness_interval_ms: 2_000,
            master_death_recheck_ms: 1_000,
            dynamic_shape: FormationShape::SingleFile,
            dynamic_spread: 1.0,
        }
    }
}
