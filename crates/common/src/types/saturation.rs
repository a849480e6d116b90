use serde::{Deserialize, Serialize};

/// Per-cycle saturation metrics. A pure function of the session's cumulative
/// history, recomputed by the Evaluate node each cycle.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SaturationMetrics {
    /// new entities this cycle / total entities.
    pub new_entity_ratio: f64,
    /// new facts this cycle / total facts.
    pub new_fact_ratio: f64,
    /// mean fact-group agreement score.
    pub cross_agreement: f64,
    /// Overall saturation in [0, 1]; 1 means fully saturated.
    pub overall: f64,
}
