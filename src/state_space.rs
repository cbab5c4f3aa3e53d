//! Assembly of the continuous time state-space system
//! `x' = A x + B u`, `y = C x + D u` from the RC network.
//!
//! Each row of `A` and `B` is the energy balance of one capacitive node,
//! accumulated over the edges of the network and divided by the node's heat
//! capacity. Pseudo-zones are never states, their temperatures are inputs.

use std::fmt;

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use petgraph::visit::{EdgeRef, IntoNodeReferences};
use tracing::debug;
use uom::si::{area::square_meter, heat_capacity::joule_per_kelvin, thermal_conductance::watt_per_kelvin};

use crate::error::{ModelError, ModelResult};
use crate::model::Model;
use crate::rc_network::{NetworkOptions, RcNetwork};

/// Meaning of one column of `B` (one entry of the input vector).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InputVariable {
    /// Temperature of a pseudo-zone [°C or K].
    Temperature { zone: String },
    /// Solar irradiance on the glazing of a zone [W/m²].
    SolarIrradiance { zone: String },
    /// Internal heat gains of a zone [W].
    InternalGains { zone: String },
    /// Heat delivered into zone air by HVAC [W].
    Hvac { zone: String },
    /// Heat injected into marked layers of boundaries starting at a zone [W].
    Marker { zone: String, marker: String },
}

impl fmt::Display for InputVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputVariable::Temperature { zone } => write!(f, "{}", zone),
            InputVariable::SolarIrradiance { zone } => write!(f, "{}/solar", zone),
            InputVariable::InternalGains { zone } => write!(f, "{}/internal", zone),
            InputVariable::Hvac { zone } => write!(f, "{}/hvac", zone),
            InputVariable::Marker { zone, marker } => write!(f, "{}/{}", zone, marker),
        }
    }
}

/// Which values are rows of the output `y`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum OutputSelection {
    /// Air temperatures of all simulated zones.
    #[default]
    Zones,
    AllStates,
    /// States or inputs by name, inputs are passed through `D`.
    Named(Vec<String>),
}

#[derive(Clone, Debug, Default)]
pub struct AssemblyOptions {
    pub network: NetworkOptions,
    pub outputs: OutputSelection,
}

/// Immutable linear system of a building.
#[derive(Clone, Debug, PartialEq)]
pub struct StateSpaceModel {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    c: DMatrix<f64>,
    d: DMatrix<f64>,
    state_names: Vec<String>,
    inputs: Vec<InputVariable>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    heat_capacities: DVector<f64>,
}

/// Build the RC network of the model and assemble its state-space system.
pub fn assemble(model: &Model, options: &AssemblyOptions) -> ModelResult<StateSpaceModel> {
    let network = RcNetwork::new(model, &options.network)?;
    StateSpaceModel::from_network(&network, &options.outputs)
}

impl StateSpaceModel {
    pub fn from_network(network: &RcNetwork, outputs: &OutputSelection) -> ModelResult<Self> {
        let graph = &network.graph;

        // Position of each graph node in the state vector or the input vector
        let mut state_of = vec![None; graph.node_count()];
        let mut temperature_input_of = vec![None; graph.node_count()];

        let mut state_names = Vec::new();
        let mut heat_capacities = Vec::new();
        let mut inputs = Vec::new();

        for (index, node) in graph.node_references() {
            if node.is_state() {
                state_of[index.index()] = Some(state_names.len());
                state_names.push(node.name.clone());
                heat_capacities.push(node.heat_capacity.get::<joule_per_kelvin>());
            } else if node.is_pseudo() {
                temperature_input_of[index.index()] = Some(inputs.len());
                inputs.push(InputVariable::Temperature {
                    zone: node.name.clone(),
                });
            }
        }

        // (state, first heat input column, solar aperture)
        let mut zone_inputs = Vec::new();
        for (zone, index) in &network.zone_indices {
            if let Some(state) = state_of[index.index()] {
                zone_inputs.push((
                    state,
                    inputs.len(),
                    graph[*index].solar_aperture.get::<square_meter>(),
                ));
                inputs.push(InputVariable::SolarIrradiance { zone: zone.clone() });
                inputs.push(InputVariable::InternalGains { zone: zone.clone() });
                inputs.push(InputVariable::Hvac { zone: zone.clone() });
            }
        }

        // Marker columns in order of first appearance on an active node
        let mut marker_columns: IndexMap<&(String, String), usize> = IndexMap::new();
        for (index, node) in graph.node_references() {
            if state_of[index.index()].is_none() {
                continue;
            }
            for marker in &node.markers {
                marker_columns.entry(marker).or_insert_with(|| {
                    inputs.push(InputVariable::Marker {
                        zone: marker.0.clone(),
                        marker: marker.1.clone(),
                    });
                    inputs.len() - 1
                });
            }
        }

        let n = state_names.len();
        let m = inputs.len();
        let mut a = DMatrix::zeros(n, n);
        let mut b = DMatrix::zeros(n, m);

        for edge in graph.edge_references() {
            let conductance = edge.weight().conductance.get::<watt_per_kelvin>();
            if conductance == 0.0 {
                continue;
            }
            for (from, to) in [
                (edge.source(), edge.target()),
                (edge.target(), edge.source()),
            ] {
                let Some(row) = state_of[from.index()] else {
                    continue;
                };
                a[(row, row)] -= conductance;
                if let Some(column) = state_of[to.index()] {
                    a[(row, column)] += conductance;
                } else if let Some(column) = temperature_input_of[to.index()] {
                    b[(row, column)] += conductance;
                }
            }
        }

        for (state, column, solar_aperture) in zone_inputs {
            b[(state, column)] = solar_aperture;
            b[(state, column + 1)] = 1.0;
            b[(state, column + 2)] = 1.0;
        }

        // Marker watts are shared by the active marked nodes in proportion to their area
        for (marker, column) in &marker_columns {
            let marked: Vec<(usize, f64)> = network
                .marker_indices
                .get_vec(*marker)
                .into_iter()
                .flatten()
                .filter_map(|index| {
                    state_of[index.index()].map(|row| (row, graph[*index].area.get::<square_meter>()))
                })
                .collect();
            let total_area: f64 = marked.iter().map(|(_, area)| area).sum();
            for (row, area) in marked {
                b[(row, *column)] += area / total_area;
            }
        }

        for (row, heat_capacity) in heat_capacities.iter().enumerate() {
            let mut a_row = a.row_mut(row);
            a_row /= *heat_capacity;
            let mut b_row = b.row_mut(row);
            b_row /= *heat_capacity;
        }

        let input_names: Vec<String> = inputs.iter().map(ToString::to_string).collect();

        let output_rows: Vec<(String, OutputRow)> = match outputs {
            OutputSelection::Zones => network
                .zone_indices
                .iter()
                .filter_map(|(zone, index)| {
                    state_of[index.index()].map(|state| (zone.clone(), OutputRow::State(state)))
                })
                .collect(),
            OutputSelection::AllStates => state_names
                .iter()
                .enumerate()
                .map(|(state, name)| (name.clone(), OutputRow::State(state)))
                .collect(),
            OutputSelection::Named(names) => names
                .iter()
                .map(|name| {
                    if let Some(state) = state_names.iter().position(|s| s == name) {
                        Ok((name.clone(), OutputRow::State(state)))
                    } else if let Some(input) = input_names.iter().position(|i| i == name) {
                        Ok((name.clone(), OutputRow::Input(input)))
                    } else {
                        Err(ModelError::invalid_argument(format!(
                            "Requested output {:?} is neither a state nor an input",
                            name
                        )))
                    }
                })
                .collect::<ModelResult<_>>()?,
        };

        let p = output_rows.len();
        let mut c = DMatrix::zeros(p, n);
        let mut d = DMatrix::zeros(p, m);
        for (row, (_, output)) in output_rows.iter().enumerate() {
            match output {
                OutputRow::State(state) => c[(row, *state)] = 1.0,
                OutputRow::Input(input) => d[(row, *input)] = 1.0,
            }
        }

        debug!(
            states = n,
            inputs = m,
            outputs = p,
            edges = graph.edge_count(),
            "assembled state-space model"
        );

        Ok(StateSpaceModel {
            a,
            b,
            c,
            d,
            state_names,
            inputs,
            input_names,
            output_names: output_rows.into_iter().map(|(name, _)| name).collect(),
            heat_capacities: DVector::from_vec(heat_capacities),
        })
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DMatrix<f64> {
        &self.b
    }

    pub fn c(&self) -> &DMatrix<f64> {
        &self.c
    }

    pub fn d(&self) -> &DMatrix<f64> {
        &self.d
    }

    pub fn state_count(&self) -> usize {
        self.state_names.len()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.output_names.len()
    }

    pub fn state_names(&self) -> &[String] {
        &self.state_names
    }

    pub fn inputs(&self) -> &[InputVariable] {
        &self.inputs
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Heat capacity of each state [J/K].
    pub fn heat_capacities(&self) -> &DVector<f64> {
        &self.heat_capacities
    }

    pub fn state_index(&self, name: &str) -> Option<usize> {
        self.state_names.iter().position(|s| s == name)
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.input_names.iter().position(|i| i == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.output_names.iter().position(|o| o == name)
    }

    /// `A x + B u`. Panics if the vector dimensions don't match the model.
    pub fn derivative(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.a * x + &self.b * u
    }

    /// `C x + D u`. Panics if the vector dimensions don't match the model.
    pub fn output(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.c * x + &self.d * u
    }

    /// State vector with every node at the same temperature.
    pub fn uniform_state(&self, temperature: f64) -> DVector<f64> {
        DVector::from_element(self.state_count(), temperature)
    }

    /// Input vector with all pseudo-zones at the same temperature and no heat inputs.
    pub fn uniform_input(&self, temperature: f64) -> DVector<f64> {
        DVector::from_iterator(
            self.input_count(),
            self.inputs.iter().map(|input| match input {
                InputVariable::Temperature { .. } => temperature,
                _ => 0.0,
            }),
        )
    }

    /// Uniform input vector with some of the inputs overridden by name.
    pub fn input_vector(&self, temperature: f64, values: &[(&str, f64)]) -> ModelResult<DVector<f64>> {
        let mut u = self.uniform_input(temperature);
        for (name, value) in values {
            let index = self
                .input_index(name)
                .ok_or_else(|| ModelError::invalid_argument(format!("Unknown input {:?}", name)))?;
            u[index] = *value;
        }
        Ok(u)
    }

    /// Time constants of the free response [s], in ascending order.
    /// Modes that never decay (isolated parts of the network) are infinite.
    pub fn time_constants(&self) -> Vec<f64> {
        // C^(1/2) A C^(-1/2) is symmetric and similar to A
        let n = self.state_count();
        if n == 0 {
            return Vec::new();
        }
        let sqrt_capacities = self.heat_capacities.map(f64::sqrt);
        let symmetric = DMatrix::from_fn(n, n, |i, j| {
            self.a[(i, j)] * sqrt_capacities[i] / sqrt_capacities[j]
        });
        let eigenvalues = SymmetricEigen::new(symmetric).eigenvalues;

        let scale = eigenvalues.amax();
        let mut time_constants: Vec<f64> = eigenvalues
            .iter()
            .map(|lambda| {
                if *lambda < -1e-12 * scale {
                    -1.0 / lambda
                } else {
                    f64::INFINITY
                }
            })
            .collect();
        time_constants.sort_by(f64::total_cmp);
        time_constants
    }
}

enum OutputRow {
    State(usize),
    Input(usize),
}
