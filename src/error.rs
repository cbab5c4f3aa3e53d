//! Error types for model loading, network assembly and simulation.

use nalgebra::DVector;
use thiserror::Error;

use crate::simulation::Trajectory;

/// Errors raised while loading a model, resolving constructions or assembling
/// the state-space system. None of them leave a partial model behind.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Configuration error: {what}")]
    Configuration { what: String },

    #[error("Boundary {boundary} references unknown zone {zone:?}")]
    UnknownZone { boundary: usize, zone: String },

    #[error("Boundary {boundary} references unknown boundary type {name:?}")]
    UnknownConstruction { boundary: usize, name: String },

    #[error("Invalid argument: {what}")]
    InvalidArgument { what: String },

    #[error("Could not parse model: {0}")]
    Parse(#[from] json5::Error),

    #[error("Could not read model: {0}")]
    Io(#[from] std::io::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    pub(crate) fn configuration(what: impl Into<String>) -> Self {
        ModelError::Configuration { what: what.into() }
    }

    pub(crate) fn invalid_argument(what: impl Into<String>) -> Self {
        ModelError::InvalidArgument { what: what.into() }
    }
}

/// Errors raised by the integrator.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Invalid argument: {what}")]
    InvalidArgument { what: String },

    /// The run diverged. `partial` holds every sample recorded before the
    /// offending step, `last_good_state` the state at the end of the last
    /// accepted step.
    #[error("Numerical instability at step {step} (t = {time} s)")]
    NumericalInstability {
        step: usize,
        time: f64,
        last_good_state: DVector<f64>,
        partial: Box<Trajectory>,
    },
}

pub type SimulationResult<T> = Result<T, SimulationError>;

impl SimulationError {
    pub(crate) fn invalid_argument(what: impl Into<String>) -> Self {
        SimulationError::InvalidArgument { what: what.into() }
    }
}
