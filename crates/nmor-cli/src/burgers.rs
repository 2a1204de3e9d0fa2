//! Moving-shock solution of the inviscid Burgers equation.
//!
//! With flux `mu * u^2 / 2` and the Riemann data `u = 1` left of `x = 0.25`,
//! `u = 0` right of it, the shock travels with speed `mu / 2`.

use nmor_core::{CubicParameterSpace, Parameter, SpaceTimeGrid};
use nmor_model::{AnalyticalModel, Result};

pub const SHOCK_START: f64 = 0.25;
pub const PARAMETER_RANGE: (f64, f64) = (0.25, 1.5);
pub const DEFAULT_REFERENCE: f64 = 1.0;

/// Shock position at time `t`.
pub fn shock_position(t: f64, mu: f64) -> f64 {
    SHOCK_START + mu * t / 2.0
}

/// Value at `(x, t)`; `smoothing > 0` replaces the jump by a `tanh` profile of that width.
pub fn exact_solution(x: f64, t: f64, mu: f64, smoothing: f64) -> f64 {
    let distance = x - shock_position(t, mu);
    if smoothing > 0.0 {
        0.5 * (1.0 - (distance / smoothing).tanh())
    } else if distance < 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Full-order model on `[0, 1] x [0, 1]` with `n_x` by `n_t` grid points.
pub fn moving_shock(n_x: usize, n_t: usize, smoothing: f64) -> Result<AnalyticalModel> {
    let grid = SpaceTimeGrid::new(n_x, n_t, (0.0, 1.0), (0.0, 1.0))?;
    let space = CubicParameterSpace::interval(PARAMETER_RANGE.0, PARAMETER_RANGE.1)?;
    AnalyticalModel::new(grid, space, move |x, t, mu| {
        exact_solution(x, t, mu.to_vec()[0], smoothing)
    })
    .with_name("BurgersMovingShock")
    .with_reference_parameter(Parameter::Scalar(DEFAULT_REFERENCE))
}
