use crate::common::{Scenario, TOL, assert_allclose, assert_close};
use hypergrad::algo::forward::get_beta_jac_iterdiff;
use hypergrad::algo::implicit::get_beta_jac_t_v_implicit;
use hypergrad::algo::implicit_forward::get_beta_jac_fast_iterdiff;
use hypergrad::algo::{AlgoError, SolverStatus};
use hypergrad::models::ModelError;
use hypergrad::{
    CoordinateDescentEstimator, Design, ElasticNet, Estimator, Lasso, Model, Support,
    WeightedLasso,
};
use ndarray::{Array1, ArrayView1, array};

const N_ITER_JAC: usize = 1000;

fn check_full_jacobians(s: &Scenario, model: &dyn Model, log_alpha: Array1<f64>) -> Support {
    let la = log_alpha.view();
    let y = s.y.view();

    let fwd_dense = get_beta_jac_iterdiff(&s.dense, y, la, model, TOL).unwrap();
    let fwd_dense_again = get_beta_jac_iterdiff(&s.dense, y, la, model, TOL).unwrap();
    let imp_dense =
        get_beta_jac_fast_iterdiff(&s.dense, y, la, model, TOL, TOL, N_ITER_JAC).unwrap();
    let fwd_sparse = get_beta_jac_iterdiff(&s.sparse, y, la, model, TOL).unwrap();
    let imp_sparse =
        get_beta_jac_fast_iterdiff(&s.sparse, y, la, model, TOL, TOL, N_ITER_JAC).unwrap();

    assert_eq!(fwd_dense.support, fwd_dense_again.support);
    assert_eq!(fwd_dense.dense, fwd_dense_again.dense);

    assert_eq!(fwd_dense.support, imp_dense.support);
    assert_close(&fwd_dense.dense, &imp_dense.dense);
    assert_allclose(&fwd_dense.jac, &imp_dense.jac, 1e-5, 1e-6);

    assert_eq!(imp_dense.support, fwd_sparse.support);
    assert_close(&imp_dense.dense, &fwd_sparse.dense);
    assert_allclose(&imp_dense.jac, &fwd_sparse.jac, 1e-5, 1e-6);

    assert_eq!(fwd_sparse.support, imp_sparse.support);
    assert_close(&fwd_sparse.dense, &imp_sparse.dense);
    assert_allclose(&fwd_sparse.jac, &imp_sparse.jac, 1e-5, 1e-6);

    let get_v = |support: &Support, dense: ArrayView1<f64>| s.held_out_direction(support, dense);
    let imp = get_beta_jac_t_v_implicit(&s.dense, y, la, &get_v, model, TOL, 1e-6, 100).unwrap();
    assert_eq!(imp.support, fwd_dense.support);
    assert_eq!(imp.jac_v.len(), log_alpha.len());
    fwd_dense.support
}

#[test]
fn lasso_forward_and_implicit_forward_agree() {
    let s = Scenario::new();
    let support = check_full_jacobians(&s, &Lasso::new(), s.lasso_log_alpha());
    assert!(!support.is_empty());
    assert!(support.len() < 100);
}

#[test]
fn weighted_lasso_forward_and_implicit_forward_agree() {
    let s = Scenario::new();
    let support = check_full_jacobians(&s, &WeightedLasso::new(), s.wlasso_log_alpha());
    assert!(!support.is_empty());
}

#[test]
fn elastic_net_forward_and_implicit_forward_agree() {
    let s = Scenario::new();
    let support =
        check_full_jacobians(&s, &ElasticNet::new().with_max_iter(100), s.enet_log_alpha());
    assert!(!support.is_empty());
}

#[test]
fn injected_estimator_matches_builtin_elastic_net() {
    let s = Scenario::new();
    let la = s.enet_log_alpha();
    let builtin = ElasticNet::new().with_max_iter(100);
    let custom = ElasticNet::new()
        .with_max_iter(100)
        .with_estimator(CoordinateDescentEstimator::new(100).with_tol(1e-16));

    let reference = get_beta_jac_fast_iterdiff(
        &s.sparse,
        s.y.view(),
        la.view(),
        &builtin,
        TOL,
        TOL,
        N_ITER_JAC,
    )
    .unwrap();
    let injected =
        get_beta_jac_fast_iterdiff(&s.sparse, s.y.view(), la.view(), &custom, TOL, TOL, N_ITER_JAC)
            .unwrap();
    assert_eq!(reference.support, injected.support);
    assert_close(&reference.dense, &injected.dense);
    assert_close(&reference.jac, &injected.jac);
}

#[test]
fn warm_started_estimator_matches_builtin_weighted_lasso() {
    let s = Scenario::new();
    let la = s.wlasso_log_alpha();
    let builtin = WeightedLasso::new();
    let custom = WeightedLasso::new()
        .with_estimator(CoordinateDescentEstimator::new(1000).with_warm_start(true));

    let reference = get_beta_jac_fast_iterdiff(
        &s.sparse,
        s.y.view(),
        la.view(),
        &builtin,
        TOL,
        TOL,
        N_ITER_JAC,
    )
    .unwrap();
    // The second solve starts from the first solution.
    for _ in 0..2 {
        let injected = get_beta_jac_fast_iterdiff(
            &s.sparse,
            s.y.view(),
            la.view(),
            &custom,
            TOL,
            TOL,
            N_ITER_JAC,
        )
        .unwrap();
        assert_eq!(reference.support, injected.support);
        assert_close(&reference.dense, &injected.dense);
        assert_close(&reference.jac, &injected.jac);
    }
}

#[test]
fn implicit_round_trip_matches_forward() {
    let s = Scenario::new();
    let model = Lasso::new();
    let la = s.lasso_log_alpha();
    let get_v = |support: &Support, dense: ArrayView1<f64>| s.held_out_direction(support, dense);

    let fwd = get_beta_jac_iterdiff(&s.dense, s.y.view(), la.view(), &model, TOL)
        .unwrap()
        .into_beta_jac_v(&get_v)
        .unwrap();
    let imp =
        get_beta_jac_t_v_implicit(&s.dense, s.y.view(), la.view(), &get_v, &model, TOL, 1e-10, 1000)
            .unwrap();
    assert_eq!(fwd.support, imp.support);
    assert_allclose(&fwd.jac_v, &imp.jac_v, 1e-5, 1e-6);
}

#[test]
fn provided_get_beta_jac_is_forward() {
    let s = Scenario::new();
    let model = Lasso::new();
    let la = s.lasso_log_alpha();
    let provided = model.get_beta_jac(&s.dense, s.y.view(), la.view(), TOL).unwrap();
    let direct = get_beta_jac_iterdiff(&s.dense, s.y.view(), la.view(), &model, TOL).unwrap();
    assert_eq!(provided.support, direct.support);
    assert_eq!(provided.jac, direct.jac);
    assert_eq!(provided.status, SolverStatus::Converged);
}

#[test]
fn wrong_hyperparameter_count_is_rejected() {
    let s = Scenario::new();
    let err = get_beta_jac_fast_iterdiff(
        &s.dense,
        s.y.view(),
        array![0.0, 0.0, 0.0].view(),
        &ElasticNet::new(),
        1e-8,
        1e-3,
        100,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        AlgoError::Model(ModelError::HyperparameterShape {
            expected: 2,
            found: 3,
            ..
        })
    ));
}

#[test]
fn wrong_target_length_is_rejected() {
    let s = Scenario::new();
    let short = Array1::<f64>::zeros(10);
    let err = get_beta_jac_iterdiff(
        &s.dense,
        short.view(),
        s.lasso_log_alpha().view(),
        &Lasso::new(),
        1e-8,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        AlgoError::TargetShape {
            expected: 100,
            found: 10
        }
    ));
}

#[test]
fn zero_column_is_never_selected() {
    let s = Scenario::new();
    let mut x = s.x.clone();
    x.column_mut(3).fill(0.0);
    let design = Design::dense(x);
    let bj = get_beta_jac_fast_iterdiff(
        &design,
        s.y.view(),
        s.wlasso_log_alpha().view(),
        &WeightedLasso::new(),
        1e-10,
        1e-6,
        100,
    )
    .unwrap();
    assert!(!bj.support.mask()[3]);
    assert!(bj.jac.iter().all(|v| v.is_finite()));
}

#[test]
fn loose_injected_estimator_still_gives_a_jacobian() {
    let s = Scenario::new();
    let la = s.lasso_log_alpha();
    let loose = || CoordinateDescentEstimator::new(3).with_tol(1e-1);
    let model = Lasso::new().with_estimator(loose());

    // Same settings fitted on their own, to know which support to expect.
    let penalty = Lasso::new().penalty(la.view(), s.dense.n_features()).unwrap();
    let fit = loose().fit(&s.dense, s.y.view(), &penalty, TOL).unwrap();
    let support = Support::from_coefficients(fit.coef.view());
    assert!(!support.is_empty());

    let bj = get_beta_jac_fast_iterdiff(&s.dense, s.y.view(), la.view(), &model, TOL, TOL, 1000)
        .unwrap();
    assert_eq!(bj.support, support);
    assert_eq!(bj.dense, support.restrict(fit.coef.view()));
    assert_eq!(bj.jac.dim(), (support.len(), 1));
    assert!(bj.jac.iter().all(|v| v.is_finite()));

    let get_v = |support: &Support, dense: ArrayView1<f64>| s.held_out_direction(support, dense);
    let imp =
        get_beta_jac_t_v_implicit(&s.dense, s.y.view(), la.view(), &get_v, &model, TOL, 1e-10, 1000)
            .unwrap();
    assert_eq!(imp.support, support);
    assert_eq!(imp.jac_v.len(), 1);
    assert!(imp.jac_v[0].is_finite());

    let via_forward = bj.into_beta_jac_v(&get_v).unwrap();
    assert_allclose(&via_forward.jac_v, &imp.jac_v, 1e-5, 1e-6);
}
