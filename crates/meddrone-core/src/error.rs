//! Error taxonomy for planning, assignment and emergency dispatch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Bad input caught before any state was touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A candidate plan would exceed the drone's move budget.
    #[error("drone {drone_id} move budget exceeded: {moves} > {max_moves}")]
    MoveBudgetExceeded {
        drone_id: String,
        moves: u32,
        max_moves: u32,
    },

    /// Some task had no drone left to take it; the whole batch fails.
    #[error("unable to assign all tasks, remaining: {remaining}")]
    UnassignableBatch { remaining: usize },

    /// An operation targeted a drone the simulator does not track.
    #[error("drone {0} does not exist")]
    DroneNotFound(String),

    /// An emergency path could not avoid an obstruction.
    #[error("emergency task {task_id} blocked by restricted area \"{area_name}\"")]
    RestrictedAreaBlocked {
        task_id: i64,
        area_name: String,
        requires_confirmation: bool,
    },

    /// No busy candidate met the reassignment-viability threshold.
    #[error("no candidate meets the reassignment cost constraint")]
    CostConstraintUnsatisfied,
}
