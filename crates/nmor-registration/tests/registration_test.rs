use nmor_core::{
    CauchyNavierOperator, ExecutionBudget, ProductOperator, Restriction, ScalarField,
    SpaceTimeGrid,
};
use nmor_registration::{
    EarlyStopping, RegistrationOracle, RegistrationParams, StationaryVelocityShooting,
};

/// Smoothed moving front `u = 1` left of `0.3 + mu * t / 2`.
fn front(grid: &SpaceTimeGrid, mu: f64) -> ScalarField {
    grid.sample(|x, t| 0.5 * (1.0 - ((x - 0.3 - mu * t / 2.0) / 0.05).tanh()))
}

fn shooting() -> StationaryVelocityShooting {
    StationaryVelocityShooting::new(CauchyNavierOperator::new(0.01, 1, 1.0).unwrap())
        .with_time_steps(5)
        .unwrap()
}

#[test]
fn test_registration_is_deterministic() {
    let grid = SpaceTimeGrid::unit(20, 10).unwrap();
    let reference = front(&grid, 1.0);
    let target = front(&grid, 0.6);
    let params = RegistrationParams::new().with_iterations(15);
    let oracle = shooting();

    let first = oracle
        .register(&reference, &target, None, &params, &ExecutionBudget::unbounded())
        .unwrap();
    let second = oracle
        .register(&reference, &target, None, &params, &ExecutionBudget::unbounded())
        .unwrap();
    assert_eq!(first.initial_vector_field, second.initial_vector_field);
    assert_eq!(first.iterations, second.iterations);
}

#[test]
fn test_warm_start_continues_from_initial_field() {
    let grid = SpaceTimeGrid::unit(20, 10).unwrap();
    let reference = front(&grid, 1.0);
    let target = front(&grid, 0.6);
    let params = RegistrationParams::new()
        .with_sigma(0.05)
        .with_iterations(20)
        .without_early_stopping();
    let oracle = shooting();
    let budget = ExecutionBudget::unbounded();

    let cold = oracle.register(&reference, &target, None, &params, &budget).unwrap();

    // An unreachable tolerance stops before the first step
    let frozen = params.clone().with_gradient_tolerance(f64::INFINITY);
    let warm = oracle
        .register(
            &reference,
            &target,
            Some(&cold.initial_vector_field),
            &frozen,
            &budget,
        )
        .unwrap();
    assert_eq!(warm.iterations, 0);
    assert_eq!(warm.initial_vector_field, cold.initial_vector_field);
    assert!((warm.energy - cold.energy).abs() <= 1e-6 * cold.energy.max(1.0));
}

#[test]
fn test_restricted_energy_ignores_margin() {
    let grid = SpaceTimeGrid::unit(20, 10).unwrap();
    let reference = front(&grid, 1.0);
    let mut target = front(&grid, 1.0).data().clone();
    // Corrupt the margin only
    target.row_mut(0).fill(5.0);
    let target = ScalarField::new(target);

    let restriction = Restriction::from_margin([20, 10], 2).unwrap();
    let params = RegistrationParams::new()
        .with_iterations(5)
        .with_restriction(restriction)
        .with_early_stopping(EarlyStopping::default());
    let result = shooting()
        .register(&reference, &target, None, &params, &ExecutionBudget::unbounded())
        .unwrap();
    assert!(result.energy_intensity_unscaled < 1e-10);
    assert!(result.initial_vector_field.norm() < 1e-6);
}

#[test]
fn test_product_operator_is_regularizer() {
    let oracle = shooting();
    assert_eq!(oracle.product_operator().name(), "cauchy-navier");
    assert_eq!(oracle.operator().alpha(), 0.01);
}
