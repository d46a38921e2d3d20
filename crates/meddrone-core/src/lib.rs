pub mod error;
pub mod models;
pub mod optimizer;
pub mod planner;
pub mod spatial;

pub use error::DispatchError;
pub use models::{
    AvailabilitySlot, DeliveryPlan, DispatchTask, Drone, DroneAvailability, DroneCapability,
    DronePlan, EmergencyTask, FlightSegment, Position, RestrictedArea, ServicePoint,
    ServicePointDrones, TaskRequirements,
};
pub use planner::find_path;
pub use spatial::{distance, move_towards, point_in_polygon, STEP_LENGTH};
