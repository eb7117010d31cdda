use common::{KalmanBank, KalmanFilter, KalmanParams};

#[test]
fn test_constant_input_converges_within_twenty_updates() {
    let params = KalmanParams::new(1.0, 0.01, 0.1);
    let mut filter = KalmanFilter::with_state(0.0, params.r);

    let mut estimate = 0.0;
    for _ in 0..20 {
        estimate = filter.update(1.0, &params);
    }
    assert!(
        (estimate - 1.0).abs() < 0.01,
        "estimate should be within 1% of 1.0, got {}",
        estimate
    );
}

#[test]
fn test_convergence_is_monotonic_and_covariance_non_increasing() {
    let params = KalmanParams::new(1.0, 0.01, 0.1);
    let mut filter = KalmanFilter::with_state(0.0, params.r);

    let mut last_estimate = filter.estimate();
    let mut last_cov = filter.error_covariance();
    for _ in 0..50 {
        let estimate = filter.update(0.7, &params);
        assert!(estimate >= last_estimate - 1e-6, "estimate went backwards");
        assert!(estimate <= 0.7 + 1e-6, "estimate overshot");
        assert!(
            filter.error_covariance() <= last_cov + 1e-9,
            "covariance grew: {} -> {}",
            last_cov,
            filter.error_covariance()
        );
        last_estimate = estimate;
        last_cov = filter.error_covariance();
    }
}

#[test]
fn test_first_measurement_after_reset_is_exact() {
    let params = KalmanParams::default();
    let mut filter = KalmanFilter::new();
    for _ in 0..10 {
        filter.update(0.9, &params);
    }
    filter.reset();
    assert!(!filter.is_initialized());
    assert_eq!(filter.update(0.25, &params), 0.25);
    assert_eq!(filter.error_covariance(), params.r);
}

#[test]
fn test_non_finite_measurement_keeps_estimate() {
    let params = KalmanParams::default();
    let mut filter = KalmanFilter::new();
    filter.update(0.5, &params);
    assert_eq!(filter.update(f32::NAN, &params), 0.5);
    assert_eq!(filter.update(f32::INFINITY, &params), 0.5);
}

#[test]
fn test_param_change_does_not_reset_estimates() {
    let mut bank = KalmanBank::new(2, KalmanParams::new(1.0, 0.01, 0.1));
    let mut values = [0.2, 0.8];
    bank.update(&mut values);
    let mut values = [0.4, 0.6];
    bank.update(&mut values);
    let before = [values[0], values[1]];

    bank.set_params(KalmanParams::new(1.0, 1.0, 0.001));
    let mut values = [0.4, 0.6];
    bank.update(&mut values);

    assert!(bank.filter(0).unwrap().is_initialized());
    // Much higher q / lower r: the next output jumps almost onto the input,
    // starting from where the old estimate was.
    assert!((values[0] - 0.4).abs() < (before[0] - 0.4).abs());
    assert!((values[1] - 0.6).abs() < (before[1] - 0.6).abs());
}

#[test]
fn test_bank_channels_are_independent() {
    let mut bank = KalmanBank::new(3, KalmanParams::default());
    let mut values = [0.0, 0.5, 1.0];
    bank.update(&mut values);
    assert_eq!(values, [0.0, 0.5, 1.0]);

    for _ in 0..5 {
        let mut v = [0.0, 0.5, 1.0];
        bank.update(&mut v);
        assert_eq!(v, [0.0, 0.5, 1.0]);
    }
}

#[test]
fn test_params_validation() {
    assert!(KalmanParams::default().validate().is_ok());
    assert!(KalmanParams::new(0.0, 0.01, 0.1).validate().is_err());
    assert!(KalmanParams::new(1.0, -0.01, 0.1).validate().is_err());
    assert!(KalmanParams::new(1.0, 0.01, 0.0).validate().is_err());
    assert!(KalmanParams::new(1.0, f32::NAN, 0.1).validate().is_err());
}
