//! Lumped-parameter (3R2C) thermal model of a building.
//!
//! A declarative model (materials, constructions, zones and boundaries) is
//! turned into an RC network, assembled into a linear state-space system and
//! integrated in time against outside temperatures and heat inputs.

pub mod construction;
pub mod error;
pub mod model;
pub mod rc_network;
pub mod simulation;
pub mod state_space;
pub mod tools;

pub use construction::{resolve_construction, resolve_stacked_construction, ResolvedConstruction};
pub use error::{ModelError, ModelResult, SimulationError, SimulationResult};
pub use model::Model;
pub use rc_network::{NetworkOptions, RcNetwork};
pub use simulation::{
    simulate, simulate_cancellable, FnInput, Hold, InputSource, InputTrajectory, Method,
    SimulationOptions, Termination, Trajectory,
};
pub use state_space::{assemble, AssemblyOptions, InputVariable, OutputSelection, StateSpaceModel};
