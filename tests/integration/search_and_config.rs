use crate::common::{Scenario, init_logging};
use hypergrad::config::ConfigError;
use hypergrad::search::{SearchError, alpha_max, log_alpha_grid};
use hypergrad::{
    Criterion, Design, HeldOutMse, Implicit, ImplicitForward, Lasso, Monitor, SolverConfig,
    bfgs_search, grid_search,
};
use ndarray::{Array1, array};
use std::io::Write;
use tempfile::{NamedTempFile, tempdir};

#[test]
fn config_survives_a_save_load_cycle() {
    init_logging();
    let dir = tempdir().unwrap();
    let path = dir.path().join("solver.toml");

    let mut config = SolverConfig::default();
    config.tol = 1e-9;
    config.implicit_forward.n_iter_jac = 5000;
    config.implicit.tol_cg = 1e-10;
    config.search.log_alpha_span = 6.5;
    config.save(&path).unwrap();

    let loaded = SolverConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn config_file_drives_algorithm_settings() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[implicit_forward]\ntol_jac = 1e-8\nn_iter_jac = 5000\n\n[implicit]\nmax_iter_cg = 250"
    )
    .unwrap();
    let config = SolverConfig::load(file.path()).unwrap();

    let implicit_forward = ImplicitForward::from_config(&config);
    assert_eq!(implicit_forward.tol_jac, 1e-8);
    assert_eq!(implicit_forward.n_iter_jac, 5000);
    let implicit = Implicit::from_config(&config);
    assert_eq!(implicit.tol_cg, 1e-6);
    assert_eq!(implicit.max_iter_cg, 250);
}

#[test]
fn missing_or_invalid_config_files_are_reported() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        SolverConfig::load(dir.path().join("absent.toml")),
        Err(ConfigError::IoError(_))
    ));

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[search]\nn_grid = 0").unwrap();
    assert!(matches!(
        SolverConfig::load(file.path()),
        Err(ConfigError::InvalidSetting {
            key: "search.n_grid",
            ..
        })
    ));
}

#[test]
fn grid_search_picks_the_lowest_held_out_error() {
    let s = Scenario::new();
    let criterion = HeldOutMse::new(s.idx_train.clone(), s.idx_val.clone());
    let model = Lasso::new();
    let grid = log_alpha_grid(alpha_max(&s.dense, s.y.view()).ln(), 5.0, 8, 1);

    let mut monitor = Monitor::new();
    let result = grid_search(
        &criterion,
        &model,
        &s.dense,
        s.y.view(),
        &grid,
        1e-8,
        &mut monitor,
    )
    .unwrap();

    assert_eq!(result.n_evaluations, 8);
    assert_eq!(monitor.len(), 8);
    assert!(monitor.grads.iter().all(Option::is_none));
    assert!(monitor.objs.iter().all(|&v| result.value <= v));
    let best = monitor.best_index().unwrap();
    assert_eq!(result.log_alpha, grid[best]);
    // The all-zero model at alpha_max is beaten by some smaller penalty.
    assert!(result.value < monitor.objs[0]);
}

#[test]
fn empty_grid_is_rejected() {
    let s = Scenario::new();
    let criterion = HeldOutMse::new(s.idx_train.clone(), s.idx_val.clone());
    let err = grid_search(
        &criterion,
        &Lasso::new(),
        &s.dense,
        s.y.view(),
        &[],
        1e-8,
        &mut Monitor::new(),
    )
    .unwrap_err();
    assert!(matches!(err, SearchError::EmptyGrid));
}

#[test]
fn bfgs_search_does_not_increase_the_criterion() {
    let s = Scenario::new();
    let criterion = HeldOutMse::new(s.idx_train.clone(), s.idx_val.clone());
    let model = Lasso::new();
    let mut config = SolverConfig::default();
    config.tol = 1e-8;
    config.search.max_iterations = 10;
    let algo = ImplicitForward::from_config(&config);

    let log_alpha0 = array![alpha_max(&s.dense, s.y.view()).ln() - 3.0];
    let initial = criterion
        .get_val(&model, &s.dense, s.y.view(), log_alpha0.view(), config.tol)
        .unwrap();

    let mut monitor = Monitor::new();
    let result = bfgs_search(
        &criterion,
        &algo,
        &model,
        &s.dense,
        s.y.view(),
        log_alpha0.view(),
        &config,
        &mut monitor,
    )
    .unwrap();

    assert!(!monitor.is_empty());
    assert_eq!(result.n_evaluations, monitor.len());
    assert!(monitor.grads.iter().all(Option::is_some));
    assert!(result.value <= initial + 1e-12, "{} > {}", result.value, initial);
    assert!(result.log_alpha[0] <= alpha_max(&s.dense, s.y.view()).ln());
}

#[test]
fn bfgs_search_rejects_a_target_orthogonal_to_every_feature() {
    init_logging();
    let x = Design::dense(array![[1.0, 0.0], [0.0, 0.0]]);
    let y: Array1<f64> = array![0.0, 1.0];
    let criterion = HeldOutMse::new(vec![0], vec![1]);
    let err = bfgs_search(
        &criterion,
        &ImplicitForward::default(),
        &Lasso::new(),
        &x,
        y.view(),
        array![0.0].view(),
        &SolverConfig::default(),
        &mut Monitor::new(),
    )
    .unwrap_err();
    assert!(matches!(err, SearchError::DegenerateData));
}

#[test]
fn bfgs_search_ignores_records_from_earlier_searches() {
    init_logging();
    let s = Scenario::new();
    let criterion = HeldOutMse::new(s.idx_train.clone(), s.idx_val.clone());
    let model = Lasso::new();
    let mut config = SolverConfig::default();
    config.tol = 1e-8;
    config.search.max_iterations = 1;
    config.search.tolerance = 1e-30;
    let algo = ImplicitForward::from_config(&config);

    // A record below any reachable held-out error, left by a previous run.
    let mut monitor = Monitor::new();
    monitor.record(-1.0, array![0.0].view(), None);

    let log_alpha0 = array![alpha_max(&s.dense, s.y.view()).ln() - 3.0];
    let result = bfgs_search(
        &criterion,
        &algo,
        &model,
        &s.dense,
        s.y.view(),
        log_alpha0.view(),
        &config,
        &mut monitor,
    )
    .unwrap();

    assert!(result.value.is_finite());
    assert!(result.value >= 0.0, "value {} came from the stale record", result.value);
    assert_ne!(result.log_alpha, array![0.0]);
    assert_eq!(result.n_evaluations, monitor.len() - 1);
    assert!(result.n_evaluations >= 1);
    assert_eq!(monitor.objs[0], -1.0);
}
