//! Time integration of the assembled state-space system.
//!
//! Inputs are held either constant or linear between their samples. The
//! default exponential method is exact for both: the propagators come from
//! the matrix exponential of the system augmented with the input (and its
//! slope), so no inverse of `A` is needed and singular systems (isolated
//! zones) work too.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use nalgebra::{linalg::LU, DMatrix, DVector, Dyn};
use tracing::{debug, warn};
use uom::si::{f64::Time, time::second};

use crate::error::{SimulationError, SimulationResult};
use crate::state_space::StateSpaceModel;

/// How an input behaves between two consecutive samples.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Hold {
    /// Sample value holds until the next sample.
    ZeroOrder,
    /// Linear interpolation between the samples.
    FirstOrder,
}

/// Source of the input vector `u(t)`. Times are seconds from the start of the
/// time axis the source was built with.
pub trait InputSource {
    fn dimension(&self) -> usize;
    fn value_at(&self, time: f64) -> DVector<f64>;
    fn hold(&self) -> Hold;
    /// Times inside the open interval `(start, end)` where the input is not smooth.
    /// Integration steps get split there.
    fn breakpoints(&self, start: f64, end: f64) -> Vec<f64>;
}

/// Sampled input, samples may be irregularly spaced.
/// Before the first sample and after the last one the end values hold.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTrajectory {
    times: Vec<f64>,
    values: Vec<DVector<f64>>,
    hold: Hold,
}

impl InputTrajectory {
    pub fn new(times: Vec<f64>, values: Vec<DVector<f64>>, hold: Hold) -> SimulationResult<Self> {
        if times.is_empty() || times.len() != values.len() {
            return Err(SimulationError::invalid_argument(format!(
                "input needs the same non-zero number of times and values, got {} and {}",
                times.len(),
                values.len()
            )));
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(SimulationError::invalid_argument("input sample times must be finite"));
        }
        if times.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(SimulationError::invalid_argument(
                "input sample times must be strictly increasing",
            ));
        }
        let dimension = values[0].len();
        if values.iter().any(|value| value.len() != dimension) {
            return Err(SimulationError::invalid_argument(
                "all input samples must have the same dimension",
            ));
        }
        if values.iter().any(|value| value.iter().any(|v| !v.is_finite())) {
            return Err(SimulationError::invalid_argument("input samples must be finite"));
        }
        Ok(InputTrajectory {
            times,
            values,
            hold,
        })
    }

    /// Input that doesn't change in time.
    pub fn constant(value: DVector<f64>) -> Self {
        InputTrajectory {
            times: vec![0.0],
            values: vec![value],
            hold: Hold::ZeroOrder,
        }
    }

    /// Build from wall clock samples; times are measured in seconds from `start`.
    pub fn from_timestamped(
        start: DateTime<Utc>,
        samples: Vec<(DateTime<Utc>, DVector<f64>)>,
        hold: Hold,
    ) -> SimulationResult<Self> {
        let (times, values) = samples
            .into_iter()
            .map(|(timestamp, value)| {
                (
                    (timestamp - start).num_milliseconds() as f64 / 1000.0,
                    value,
                )
            })
            .unzip();
        Self::new(times, values, hold)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }
}

impl InputSource for InputTrajectory {
    fn dimension(&self) -> usize {
        self.values[0].len()
    }

    fn value_at(&self, time: f64) -> DVector<f64> {
        let after = self.times.partition_point(|&t| t <= time);
        if after == 0 {
            return self.values[0].clone();
        }
        if after == self.times.len() {
            return self.values[after - 1].clone();
        }
        let before = after - 1;
        match self.hold {
            Hold::ZeroOrder => self.values[before].clone(),
            Hold::FirstOrder => {
                let fraction =
                    (time - self.times[before]) / (self.times[after] - self.times[before]);
                self.values[before].lerp(&self.values[after], fraction)
            }
        }
    }

    fn hold(&self) -> Hold {
        self.hold
    }

    fn breakpoints(&self, start: f64, end: f64) -> Vec<f64> {
        self.times
            .iter()
            .copied()
            .filter(|t| *t > start && *t < end)
            .collect()
    }
}

/// Input given by a function of time, linearly interpolated over each step.
pub struct FnInput<F> {
    dimension: usize,
    function: F,
}

impl<F> FnInput<F>
where
    F: Fn(f64) -> DVector<f64>,
{
    pub fn new(dimension: usize, function: F) -> Self {
        FnInput {
            dimension,
            function,
        }
    }
}

impl<F> InputSource for FnInput<F>
where
    F: Fn(f64) -> DVector<f64>,
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn value_at(&self, time: f64) -> DVector<f64> {
        (self.function)(time)
    }

    fn hold(&self) -> Hold {
        Hold::FirstOrder
    }

    fn breakpoints(&self, _start: f64, _end: f64) -> Vec<f64> {
        Vec::new()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Method {
    /// Exact propagation through the matrix exponential.
    #[default]
    Exponential,
    /// Unconditionally stable, first order accurate.
    ImplicitEuler,
}

#[derive(Clone, Debug)]
pub struct SimulationOptions {
    pub step: Time,
    pub method: Method,
    /// Record every n-th step. The final state is always recorded.
    pub record_every: usize,
    /// A state with larger magnitude than this is considered diverged.
    pub divergence_limit: f64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            step: Time::new::<second>(600.0),
            method: Method::default(),
            record_every: 1,
            divergence_limit: 1e6,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Cancelled,
}

/// Recorded samples of a simulation run. Times are in seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<DVector<f64>>,
    pub outputs: Vec<DVector<f64>>,
    pub output_names: Vec<String>,
    pub termination: Termination,
}

impl Trajectory {
    fn new(output_names: Vec<String>) -> Self {
        Trajectory {
            times: Vec::new(),
            states: Vec::new(),
            outputs: Vec::new(),
            output_names,
            termination: Termination::Completed,
        }
    }

    fn record(&mut self, time: f64, state: &DVector<f64>, output: DVector<f64>) {
        self.times.push(time);
        self.states.push(state.clone());
        self.outputs.push(output);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Values of one named output over time.
    pub fn series(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.output_names.iter().position(|n| n == name)?;
        Some(self.outputs.iter().map(|output| output[index]).collect())
    }

    pub fn final_state(&self) -> Option<&DVector<f64>> {
        self.states.last()
    }
}

/// Integrate the model from `x0` over `span`.
pub fn simulate<I: InputSource + ?Sized>(
    model: &StateSpaceModel,
    x0: &DVector<f64>,
    input: &I,
    span: Range<Time>,
    options: &SimulationOptions,
) -> SimulationResult<Trajectory> {
    simulate_cancellable(model, x0, input, span, options, &AtomicBool::new(false))
}

/// Like [`simulate`], but stops before the next step once `cancel` is set.
/// The samples recorded until then are returned.
pub fn simulate_cancellable<I: InputSource + ?Sized>(
    model: &StateSpaceModel,
    x0: &DVector<f64>,
    input: &I,
    span: Range<Time>,
    options: &SimulationOptions,
    cancel: &AtomicBool,
) -> SimulationResult<Trajectory> {
    let start = span.start.get::<second>();
    let end = span.end.get::<second>();
    let step = options.step.get::<second>();

    if !(start.is_finite() && end.is_finite() && start <= end) {
        return Err(SimulationError::invalid_argument(format!(
            "invalid time span {} s .. {} s",
            start, end
        )));
    }
    if !(step > 0.0 && step.is_finite()) {
        return Err(SimulationError::invalid_argument(format!(
            "step must be positive and finite, got {} s",
            step
        )));
    }
    if options.record_every == 0 {
        return Err(SimulationError::invalid_argument("record_every must be at least 1"));
    }
    if !(options.divergence_limit > 0.0) {
        return Err(SimulationError::invalid_argument("divergence limit must be positive"));
    }
    if x0.len() != model.state_count() {
        return Err(SimulationError::invalid_argument(format!(
            "initial state has {} values, the model has {} states",
            x0.len(),
            model.state_count()
        )));
    }
    if input.dimension() != model.input_count() || input.value_at(start).len() != model.input_count()
    {
        return Err(SimulationError::invalid_argument(format!(
            "input has {} values, the model has {} inputs",
            input.dimension(),
            model.input_count()
        )));
    }

    if options.method == Method::ImplicitEuler {
        if let Some(shortest) = model.time_constants().first() {
            if step > *shortest {
                warn!(
                    step,
                    shortest_time_constant = shortest,
                    "step is longer than the shortest time constant, fast modes will be damped"
                );
            }
        }
    }

    let mut propagators = Propagators::new(model, options.method, input.hold(), step);
    integrate(&mut propagators, x0, input, start, end, options, cancel)
}

/// Step loop of [`simulate_cancellable`] over validated arguments.
fn integrate<I: InputSource + ?Sized>(
    propagators: &mut Propagators,
    x0: &DVector<f64>,
    input: &I,
    start: f64,
    end: f64,
    options: &SimulationOptions,
    cancel: &AtomicBool,
) -> SimulationResult<Trajectory> {
    let model = propagators.model;
    let step = propagators.step;
    let mut breakpoints = input.breakpoints(start, end);
    breakpoints.sort_by(f64::total_cmp);
    let mut breakpoints = breakpoints.into_iter().peekable();

    let mut trajectory = Trajectory::new(model.output_names().to_vec());
    let mut x = x0.clone();
    let mut time = start;
    trajectory.record(time, &x, model.output(&x, &input.value_at(time)));

    let mut step_index = 0usize;
    while time < end {
        if cancel.load(Ordering::Relaxed) {
            warn!(time, "simulation cancelled");
            trajectory.termination = Termination::Cancelled;
            return Ok(trajectory);
        }

        let mut step_end = start + (step_index + 1) as f64 * step;
        if step_end > end - 1e-9 * step {
            step_end = end;
        }

        let mut next_x = x.clone();
        let mut sub_start = time;
        while sub_start < step_end {
            while breakpoints.next_if(|b| *b <= sub_start).is_some() {}
            let sub_end = breakpoints
                .next_if(|b| *b < step_end)
                .unwrap_or(step_end);
            let whole_step = sub_start == time && sub_end == step_end;
            next_x = propagators
                .propagate(&next_x, input, sub_start, sub_end, whole_step)
                .ok_or_else(|| SimulationError::NumericalInstability {
                    step: step_index,
                    time: sub_start,
                    last_good_state: x.clone(),
                    partial: Box::new(trajectory.clone()),
                })?;
            sub_start = sub_end;
        }

        if next_x
            .iter()
            .any(|v| !v.is_finite() || v.abs() > options.divergence_limit)
        {
            warn!(step = step_index, time = step_end, "simulation diverged");
            return Err(SimulationError::NumericalInstability {
                step: step_index,
                time: step_end,
                last_good_state: x,
                partial: Box::new(trajectory),
            });
        }

        x = next_x;
        time = step_end;
        step_index += 1;
        if step_index % options.record_every == 0 || time >= end {
            trajectory.record(time, &x, model.output(&x, &input.value_at(time)));
        }
    }

    debug!(
        steps = step_index,
        samples = trajectory.len(),
        cached_propagators = propagators.cache.len(),
        "simulation finished"
    );

    Ok(trajectory)
}

/// Discretized system for one step length.
enum Propagator {
    /// `x1 = phi x0 + gamma0 u0 + gamma1 (u1 - u0)`
    Exponential {
        phi: DMatrix<f64>,
        gamma0: DMatrix<f64>,
        gamma1: Option<DMatrix<f64>>,
    },
    /// `(I - hA) x1 = x0 + hB u`
    ImplicitEuler {
        lu: LU<f64, Dyn, Dyn>,
        hb: DMatrix<f64>,
    },
}

/// Propagators of whole steps cached by step length.
///
/// Only the nominal step and the shortened final step of a span are kept,
/// sub-steps split at input breakpoints are built on demand.
struct Propagators<'a> {
    model: &'a StateSpaceModel,
    method: Method,
    hold: Hold,
    step: f64,
    cache: HashMap<u64, Propagator>,
}

impl<'a> Propagators<'a> {
    fn new(model: &'a StateSpaceModel, method: Method, hold: Hold, step: f64) -> Self {
        Propagators {
            model,
            method,
            hold,
            step,
            cache: HashMap::new(),
        }
    }

    /// Advance `x` from `t0` to `t1`. None if the implicit system is singular.
    ///
    /// `whole_step` marks an unsplit step; it uses the nominal step length
    /// unless it is the shortened last one.
    fn propagate<I: InputSource + ?Sized>(
        &mut self,
        x: &DVector<f64>,
        input: &I,
        t0: f64,
        t1: f64,
        whole_step: bool,
    ) -> Option<DVector<f64>> {
        let (model, method, hold) = (self.model, self.method, self.hold);
        let fresh;
        let propagator = if whole_step {
            let h = if (t1 - t0 - self.step).abs() <= 1e-9 * self.step {
                self.step
            } else {
                t1 - t0
            };
            &*self
                .cache
                .entry(h.to_bits())
                .or_insert_with(|| Propagator::build(model, method, hold, h))
        } else {
            fresh = Propagator::build(model, method, hold, t1 - t0);
            &fresh
        };

        let u0 = input.value_at(t0);
        match propagator {
            Propagator::Exponential { phi, gamma0, gamma1 } => {
                let mut x1 = &*phi * x + &*gamma0 * &u0;
                if let Some(gamma1) = gamma1 {
                    x1 += &*gamma1 * (input.value_at(t1) - &u0);
                }
                Some(x1)
            }
            Propagator::ImplicitEuler { lu, hb } => {
                let u = match hold {
                    Hold::ZeroOrder => u0,
                    Hold::FirstOrder => input.value_at(t1),
                };
                lu.solve(&(x + &*hb * u))
            }
        }
    }
}

impl Propagator {
    fn build(model: &StateSpaceModel, method: Method, hold: Hold, h: f64) -> Self {
        let n = model.state_count();
        let m = model.input_count();
        match method {
            Method::Exponential => {
                // exp(h [[A, B, 0], [0, 0, I], [0, 0, 0]]), the last block row only for linear inputs
                let slope = hold == Hold::FirstOrder;
                let size = if slope { n + 2 * m } else { n + m };
                let mut augmented = DMatrix::<f64>::zeros(size, size);
                augmented.view_mut((0, 0), (n, n)).copy_from(model.a());
                augmented.view_mut((0, n), (n, m)).copy_from(model.b());
                if slope {
                    augmented
                        .view_mut((n, n + m), (m, m))
                        .fill_with_identity();
                }
                augmented *= h;
                let exponential = augmented.exp();

                Propagator::Exponential {
                    phi: exponential.view((0, 0), (n, n)).into_owned(),
                    gamma0: exponential.view((0, n), (n, m)).into_owned(),
                    gamma1: slope.then(|| exponential.view((0, n + m), (n, m)) / h),
                }
            }
            Method::ImplicitEuler => {
                let system = DMatrix::identity(n, n) - model.a() * h;
                Propagator::ImplicitEuler {
                    lu: system.lu(),
                    hb: model.b() * h,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::state_space::{assemble, AssemblyOptions, OutputSelection};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use test_case::test_case;
    use uom::si::time::hour;

    /// Zone of 10 000 J/K behind a 6 W/K window.
    fn window_model() -> StateSpaceModel {
        let model = Model::from_json(
            r#"{
            materials: { air: { thermal_conductivity: 0.026, specific_heat_capacity: 1000, density: 1 } },
            boundary_types: { window: { u: 2, g: 0.5 } },
            zones: { room: { volume: 10 } },
            boundaries: [ { boundary_type: "window", zones: ["room", "outside"], area: 3 } ],
        }"#,
        )
        .unwrap();
        assemble(&model, &AssemblyOptions::default()).unwrap()
    }

    fn entrance_model() -> StateSpaceModel {
        let model = Model::from_json(
            r#"{
            materials: {
                wall_material: { thermal_conductivity: 0.059, specific_heat_capacity: 1000, density: 660 },
            },
            boundary_types: {
                exterior_wall: { layers: [ { material: "wall_material", thickness: 0.44 } ] },
                window: { u: 0.74, g: 0.6 },
            },
            zones: { entrance: { volume: 23.383 } },
            boundaries: [
                {
                    boundary_type: "exterior_wall",
                    zones: ["outside", "entrance"],
                    area: 5,
                    sub_boundaries: [ { boundary_type: "window", area: 0 } ],
                },
            ],
        }"#,
        )
        .unwrap();
        assemble(
            &model,
            &AssemblyOptions {
                outputs: OutputSelection::AllStates,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn hours(h: f64) -> Time {
        Time::new::<hour>(h)
    }

    fn options(step_seconds: f64, method: Method) -> SimulationOptions {
        SimulationOptions {
            step: Time::new::<second>(step_seconds),
            method,
            ..Default::default()
        }
    }

    #[test]
    fn window_decay_is_exact() {
        let ss = window_model();
        let x0 = ss.uniform_state(20.0);
        let input = InputTrajectory::constant(ss.uniform_input(0.0));

        let trajectory = simulate(
            &ss,
            &x0,
            &input,
            hours(0.0)..hours(10.0),
            &options(600.0, Method::Exponential),
        )
        .unwrap();

        assert_eq!(trajectory.len(), 61);
        assert_eq!(trajectory.termination, Termination::Completed);
        let tau = 10_000.0 / 6.0;
        for (time, room) in trajectory
            .times
            .iter()
            .zip(trajectory.series("room").unwrap())
        {
            assert_relative_eq!(room, 20.0 * (-time / tau).exp(), max_relative = 1e-9);
        }
    }

    #[test_case(Method::Exponential, 3600.0; "exponential")]
    #[test_case(Method::ImplicitEuler, 3600.0; "implicit euler")]
    #[test_case(Method::ImplicitEuler, 86400.0; "implicit euler long step")]
    fn entrance_cools_down_monotonically(method: Method, step: f64) {
        let ss = entrance_model();
        assert_eq!(ss.state_count(), 3);
        let input = ss.input_vector(0.0, &[]).unwrap();

        let trajectory = simulate(
            &ss,
            &ss.uniform_state(20.0),
            &InputTrajectory::constant(input),
            hours(0.0)..hours(24.0 * 365.0),
            &options(step, method),
        )
        .unwrap();

        for pair in trajectory.states.windows(2) {
            for i in 0..3 {
                assert!(pair[1][i] <= pair[0][i] + 1e-12);
                assert!(pair[1][i] >= -1e-12, "overshoot below outside temperature");
            }
        }
        let entrance = trajectory.series("entrance").unwrap();
        assert!(entrance[1] < 20.0);
        assert_abs_diff_eq!(*entrance.last().unwrap(), 0.0, epsilon = 0.1);

        // Warm air against a cold wall: the air first decays at G_zone / C_zone
        let wall_resistance = 0.44 / (0.059 * 5.0);
        let film_resistance = 1.0 / (12.12 * 5.0);
        let g_zone = 1.0 / (wall_resistance / 4.0 + film_resistance);
        let c_zone = 23.383 * 1.199 * 1012.0;
        let zone = ss.state_index("entrance").unwrap();
        let mut x0 = ss.uniform_state(0.0);
        x0[zone] = 20.0;
        let first_second = simulate(
            &ss,
            &x0,
            &InputTrajectory::constant(ss.input_vector(0.0, &[]).unwrap()),
            Time::new::<second>(0.0)..Time::new::<second>(1.0),
            &options(1.0, method),
        )
        .unwrap();
        let rate = x0[zone] - first_second.final_state().unwrap()[zone];
        assert_relative_eq!(rate, 20.0 * g_zone / c_zone, max_relative = 1e-3);
    }

    #[test]
    fn uniform_temperature_stays_constant() {
        let ss = entrance_model();

        let trajectory = simulate(
            &ss,
            &ss.uniform_state(15.0),
            &InputTrajectory::constant(ss.uniform_input(15.0)),
            hours(0.0)..hours(48.0),
            &SimulationOptions::default(),
        )
        .unwrap();

        for state in trajectory.states.iter() {
            for value in state.iter() {
                assert_abs_diff_eq!(*value, 15.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn implicit_euler_agrees_with_exponential() {
        let ss = entrance_model();
        let x0 = ss.uniform_state(20.0);
        let input = InputTrajectory::constant(ss.input_vector(-5.0, &[("entrance/hvac", 20.0)]).unwrap());
        let span = hours(0.0)..hours(24.0);

        let exact = simulate(&ss, &x0, &input, span.clone(), &options(3600.0, Method::Exponential)).unwrap();
        let approximate = simulate(&ss, &x0, &input, span, &options(60.0, Method::ImplicitEuler)).unwrap();

        assert_abs_diff_eq!(
            exact.final_state().unwrap(),
            approximate.final_state().unwrap(),
            epsilon = 0.05
        );
    }

    #[test]
    fn linear_input_is_exact() {
        let ss = window_model();
        let outside = ss.input_index("outside").unwrap();
        let rate = 1.0 / 3600.0; // 1 K per hour
        let end = 10.0 * 3600.0;
        let mut last = ss.uniform_input(0.0);
        last[outside] = rate * end;
        let input = InputTrajectory::new(
            vec![0.0, end],
            vec![ss.uniform_input(0.0), last],
            Hold::FirstOrder,
        )
        .unwrap();

        let trajectory = simulate(
            &ss,
            &ss.uniform_state(0.0),
            &input,
            hours(0.0)..hours(10.0),
            &options(900.0, Method::Exponential),
        )
        .unwrap();

        let a = 6.0 / 10_000.0;
        for (time, room) in trajectory
            .times
            .iter()
            .zip(trajectory.series("room").unwrap())
        {
            let expected = rate * (time - 1.0 / a) + rate / a * (-a * time).exp();
            assert_abs_diff_eq!(room, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn steps_split_at_input_breakpoints() {
        let ss = window_model();
        let outside = ss.input_index("outside").unwrap();
        let mut warm = ss.uniform_input(0.0);
        warm[outside] = 10.0;
        let input = InputTrajectory::new(
            vec![0.0, 1000.0],
            vec![ss.uniform_input(0.0), warm],
            Hold::ZeroOrder,
        )
        .unwrap();

        let trajectory = simulate(
            &ss,
            &ss.uniform_state(20.0),
            &input,
            hours(0.0)..hours(2.0),
            &options(600.0, Method::Exponential),
        )
        .unwrap();

        let a = 6.0 / 10_000.0;
        let at_switch = 20.0 * (-a * 1000.0f64).exp();
        for (time, room) in trajectory
            .times
            .iter()
            .zip(trajectory.series("room").unwrap())
        {
            let expected = if *time <= 1000.0 {
                20.0 * (-a * time).exp()
            } else {
                10.0 + (at_switch - 10.0) * (-a * (time - 1000.0)).exp()
            };
            assert_relative_eq!(room, expected, max_relative = 1e-9);
        }
    }

    #[test]
    fn off_grid_samples_keep_propagator_cache_small() {
        let ss = window_model();
        let outside = ss.input_index("outside").unwrap();
        let (times, values): (Vec<f64>, Vec<DVector<f64>>) = (0..48)
            .map(|i| {
                let mut u = ss.uniform_input(0.0);
                u[outside] = (i % 5) as f64;
                (3600.0 * i as f64 + 420.0 + (i % 7) as f64, u)
            })
            .unzip();
        let input = InputTrajectory::new(times, values, Hold::ZeroOrder).unwrap();
        let defaults = SimulationOptions::default();
        let end = 48.5 * 3600.0 + 100.0;

        let mut propagators = Propagators::new(
            &ss,
            defaults.method,
            input.hold(),
            defaults.step.get::<second>(),
        );
        let trajectory = integrate(
            &mut propagators,
            &ss.uniform_state(20.0),
            &input,
            0.0,
            end,
            &defaults,
            &AtomicBool::new(false),
        )
        .unwrap();

        // nominal step and the 100 s tail
        assert_eq!(propagators.cache.len(), 2);
        let fine = simulate(
            &ss,
            &ss.uniform_state(20.0),
            &input,
            Time::new::<second>(0.0)..Time::new::<second>(end),
            &options(60.0, Method::Exponential),
        )
        .unwrap();
        assert_relative_eq!(
            trajectory.final_state().unwrap(),
            fine.final_state().unwrap(),
            max_relative = 1e-9
        );
    }

    #[test]
    fn function_input() {
        let ss = window_model();
        let outside = ss.input_index("outside").unwrap();
        let base = ss.uniform_input(0.0);
        // Outside swings around the room temperature
        let input = FnInput::new(ss.input_count(), move |t| {
            let mut u = base.clone();
            u[outside] = 5.0 + (t / 3600.0 * std::f64::consts::PI).sin();
            u
        });

        let trajectory = simulate(
            &ss,
            &ss.uniform_state(5.0),
            &input,
            hours(0.0)..hours(2.0),
            &SimulationOptions::default(),
        )
        .unwrap();

        let room = trajectory.series("room").unwrap();
        assert!(room[6] > 5.0);
        assert!(room.iter().all(|t| (4.0..6.0).contains(t)));
    }

    #[test]
    fn cancellation_keeps_prefix() {
        let ss = window_model();
        let input = InputTrajectory::constant(ss.uniform_input(0.0));
        let x0 = ss.uniform_state(20.0);
        let span = hours(0.0)..hours(10.0);
        let options = options(600.0, Method::Exponential);

        let full = simulate(&ss, &x0, &input, span.clone(), &options).unwrap();

        let cancel = AtomicBool::new(false);
        let cancelling_input = FnInput::new(ss.input_count(), |t| {
            if t >= 3600.0 {
                cancel.store(true, Ordering::Relaxed);
            }
            input.value_at(t)
        });
        let cancelled =
            simulate_cancellable(&ss, &x0, &cancelling_input, span, &options, &cancel).unwrap();

        assert_eq!(cancelled.termination, Termination::Cancelled);
        assert_eq!(cancelled.len(), 7);
        assert_eq!(cancelled.times[..], full.times[..7]);
        for (a, b) in cancelled.states.iter().zip(full.states.iter()) {
            assert_relative_eq!(a, b, max_relative = 1e-12);
        }
    }

    #[test]
    fn cancelled_before_start() {
        let ss = window_model();
        let cancel = AtomicBool::new(true);

        let trajectory = simulate_cancellable(
            &ss,
            &ss.uniform_state(20.0),
            &InputTrajectory::constant(ss.uniform_input(0.0)),
            hours(0.0)..hours(1.0),
            &SimulationOptions::default(),
            &cancel,
        )
        .unwrap();

        assert_eq!(trajectory.termination, Termination::Cancelled);
        assert_eq!(trajectory.times, vec![0.0]);
    }

    #[test]
    fn divergence_returns_partial_trajectory() {
        let ss = window_model();
        // 10 kW into 10 kJ/K warms the room by one kelvin per second
        let input = InputTrajectory::constant(ss.input_vector(0.0, &[("room/hvac", 1e4)]).unwrap());
        let options = SimulationOptions {
            step: Time::new::<second>(60.0),
            divergence_limit: 100.0,
            ..Default::default()
        };

        let result = simulate(
            &ss,
            &ss.uniform_state(20.0),
            &input,
            hours(0.0)..hours(1.0),
            &options,
        );

        assert_matches!(
            result,
            Err(SimulationError::NumericalInstability { step, last_good_state, partial, .. }) => {
                assert_eq!(step, 1);
                assert_eq!(partial.len(), step + 1);
                assert_eq!(partial.final_state(), Some(&last_good_state));
                assert!(last_good_state[0] < 100.0);
            }
        );
    }

    #[test]
    fn record_every() {
        let ss = window_model();
        let options = SimulationOptions {
            step: Time::new::<second>(60.0),
            record_every: 3,
            ..Default::default()
        };

        let trajectory = simulate(
            &ss,
            &ss.uniform_state(20.0),
            &InputTrajectory::constant(ss.uniform_input(0.0)),
            Time::new::<second>(0.0)..Time::new::<second>(600.0),
            &options,
        )
        .unwrap();

        assert_eq!(
            trajectory.times,
            vec![0.0, 180.0, 360.0, 540.0, 600.0]
        );
    }

    #[test]
    fn empty_span() {
        let ss = window_model();

        let trajectory = simulate(
            &ss,
            &ss.uniform_state(20.0),
            &InputTrajectory::constant(ss.uniform_input(0.0)),
            hours(1.0)..hours(1.0),
            &SimulationOptions::default(),
        )
        .unwrap();

        assert_eq!(trajectory.times, vec![3600.0]);
    }

    #[test]
    fn invalid_arguments() {
        let ss = window_model();
        let x0 = ss.uniform_state(20.0);
        let input = InputTrajectory::constant(ss.uniform_input(0.0));
        let span = hours(0.0)..hours(1.0);

        assert_matches!(
            simulate(&ss, &x0, &input, span.clone(), &options(0.0, Method::Exponential)),
            Err(SimulationError::InvalidArgument { .. })
        );
        assert_matches!(
            simulate(&ss, &x0, &input, hours(1.0)..hours(0.0), &SimulationOptions::default()),
            Err(SimulationError::InvalidArgument { .. })
        );
        assert_matches!(
            simulate(&ss, &DVector::zeros(3), &input, span.clone(), &SimulationOptions::default()),
            Err(SimulationError::InvalidArgument { .. })
        );
        assert_matches!(
            simulate(
                &ss,
                &x0,
                &InputTrajectory::constant(DVector::zeros(1)),
                span,
                &SimulationOptions::default()
            ),
            Err(SimulationError::InvalidArgument { .. })
        );
    }

    #[test]
    fn input_trajectory_holds_ends() {
        let input = InputTrajectory::new(
            vec![10.0, 20.0, 40.0],
            vec![
                DVector::from_element(1, 1.0),
                DVector::from_element(1, 3.0),
                DVector::from_element(1, 7.0),
            ],
            Hold::FirstOrder,
        )
        .unwrap();

        assert_eq!(input.value_at(0.0)[0], 1.0);
        assert_eq!(input.value_at(15.0)[0], 2.0);
        assert_eq!(input.value_at(20.0)[0], 3.0);
        assert_eq!(input.value_at(30.0)[0], 5.0);
        assert_eq!(input.value_at(100.0)[0], 7.0);
        assert_eq!(input.breakpoints(10.0, 40.0), vec![20.0]);
    }

    #[test]
    fn input_trajectory_rejects_unordered_times() {
        assert_matches!(
            InputTrajectory::new(
                vec![0.0, 0.0],
                vec![DVector::zeros(1), DVector::zeros(1)],
                Hold::ZeroOrder
            ),
            Err(SimulationError::InvalidArgument { .. })
        );
        assert_matches!(
            InputTrajectory::new(vec![], vec![], Hold::ZeroOrder),
            Err(SimulationError::InvalidArgument { .. })
        );
    }

    #[test]
    fn timestamped_input() {
        let start = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let input = InputTrajectory::from_timestamped(
            start,
            vec![
                (start, DVector::from_element(1, 0.0)),
                (
                    Utc.with_ymd_and_hms(2022, 1, 1, 1, 0, 0).unwrap(),
                    DVector::from_element(1, 4.0),
                ),
            ],
            Hold::FirstOrder,
        )
        .unwrap();

        assert_eq!(input.times(), [0.0, 3600.0]);
        assert_eq!(input.value_at(1800.0)[0], 2.0);
    }
}
