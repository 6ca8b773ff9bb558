use crate::common::{Scenario, TOL, assert_allclose, assert_close};
use hypergrad::criterion::CriterionError;
use hypergrad::{
    Backward, Criterion, DiffAlgorithm, ElasticNet, FiniteDiffMonteCarloSure, Forward,
    HeldOutMse, Implicit, ImplicitForward, Lasso, Model, WeightedLasso,
};
use ndarray::{Array1, array};

#[derive(Clone, Copy)]
enum Family {
    Lasso,
    WeightedLasso,
    ElasticNet,
}

fn setup(s: &Scenario, family: Family) -> (Box<dyn Model>, Array1<f64>) {
    match family {
        Family::Lasso => (Box::new(Lasso::new()), s.lasso_log_alpha()),
        Family::WeightedLasso => (Box::new(WeightedLasso::new()), s.wlasso_log_alpha()),
        Family::ElasticNet => (
            Box::new(ElasticNet::new().with_max_iter(100)),
            s.enet_log_alpha(),
        ),
    }
}

fn val_grad(
    s: &Scenario,
    criterion: &dyn Criterion,
    model: &dyn Model,
    log_alpha: &Array1<f64>,
    algo: &dyn DiffAlgorithm,
) -> (f64, Array1<f64>) {
    criterion
        .get_val_grad(model, &s.dense, s.y.view(), log_alpha.view(), algo, TOL)
        .unwrap()
}

fn check_val_grad(family: Family, criterion: &dyn Criterion) {
    let s = Scenario::new();
    let (model, log_alpha) = setup(&s, family);
    let model = model.as_ref();

    let (val_fwd, grad_fwd) = val_grad(&s, criterion, model, &log_alpha, &Forward);
    let (val_imp_fwd, grad_imp_fwd) = val_grad(
        &s,
        criterion,
        model,
        &log_alpha,
        &ImplicitForward::new(1e-8, 5000),
    );
    let (val_bwd, grad_bwd) = val_grad(&s, criterion, model, &log_alpha, &Backward);

    assert_close(&array![val_fwd], &array![val_imp_fwd]);
    assert_close(&grad_fwd, &grad_imp_fwd);
    // Backward replays the same coordinate descent as forward.
    assert_eq!(val_bwd, val_fwd);
    assert_allclose(&grad_bwd, &grad_fwd, 1e-6, 1e-9);

    if let Family::WeightedLasso = family {
        return;
    }

    let (val_imp, grad_imp) = val_grad(&s, criterion, model, &log_alpha, &Implicit::default());
    assert_close(&array![val_imp_fwd], &array![val_imp]);
    assert_allclose(&grad_imp_fwd, &grad_imp, 1e-5, 1e-3);
}

fn held_out(s: &Scenario) -> HeldOutMse {
    HeldOutMse::new(s.idx_train.clone(), s.idx_val.clone())
}

#[test]
fn lasso_held_out_gradients_agree() {
    let s = Scenario::new();
    check_val_grad(Family::Lasso, &held_out(&s));
}

#[test]
fn weighted_lasso_held_out_gradients_agree() {
    let s = Scenario::new();
    check_val_grad(Family::WeightedLasso, &held_out(&s));
}

#[test]
fn elastic_net_held_out_gradients_agree() {
    let s = Scenario::new();
    check_val_grad(Family::ElasticNet, &held_out(&s));
}

#[test]
fn lasso_sure_gradients_agree() {
    let s = Scenario::new();
    check_val_grad(Family::Lasso, &FiniteDiffMonteCarloSure::new(s.sigma_star));
}

#[test]
fn weighted_lasso_sure_gradients_agree() {
    let s = Scenario::new();
    check_val_grad(
        Family::WeightedLasso,
        &FiniteDiffMonteCarloSure::new(s.sigma_star),
    );
}

#[test]
fn elastic_net_sure_gradients_agree() {
    let s = Scenario::new();
    check_val_grad(
        Family::ElasticNet,
        &FiniteDiffMonteCarloSure::new(s.sigma_star),
    );
}

#[test]
fn sparse_design_gives_the_same_held_out_gradient() {
    let s = Scenario::new();
    let criterion = held_out(&s);
    let model = Lasso::new();
    let la = s.lasso_log_alpha();
    let algo = ImplicitForward::default();
    let dense = criterion
        .get_val_grad(&model, &s.dense, s.y.view(), la.view(), &algo, TOL)
        .unwrap();
    let sparse = criterion
        .get_val_grad(&model, &s.sparse, s.y.view(), la.view(), &algo, TOL)
        .unwrap();
    assert_eq!(dense.0, sparse.0);
    assert_close(&dense.1, &sparse.1);
}

#[test]
fn empty_support_has_zero_gradient() {
    let s = Scenario::new();
    let criterion = held_out(&s);
    let model = Lasso::new();
    // Far above alpha_max every coefficient is zero.
    let la = array![s.alpha.ln() + 5.0];
    for algo in [
        &Forward as &dyn DiffAlgorithm,
        &ImplicitForward::default(),
        &Implicit::default(),
        &Backward,
    ] {
        let (value, grad) = criterion
            .get_val_grad(&model, &s.dense, s.y.view(), la.view(), algo, TOL)
            .unwrap();
        let y_val: Array1<f64> = s.idx_val.iter().map(|&i| s.y[i]).collect();
        assert_eq!(value, y_val.dot(&y_val) / y_val.len() as f64);
        assert_eq!(grad, array![0.0], "{}", algo.name());
    }
}

#[test]
fn split_indices_out_of_range_are_rejected() {
    let s = Scenario::new();
    let criterion = HeldOutMse::new(vec![0, 1, 2], vec![150]);
    let err = criterion
        .get_val_grad(
            &Lasso::new(),
            &s.dense,
            s.y.view(),
            s.lasso_log_alpha().view(),
            &Forward,
            1e-8,
        )
        .unwrap_err();
    assert!(matches!(err, CriterionError::Design(_)));
}
