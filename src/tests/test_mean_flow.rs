use ndarray::{arr1, arr2, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::activations::Activation;
use crate::algorithms::{Actor, MeanFlow, MeanFlowConfig};
use crate::loss::{Loss, MSE};
use crate::optimizer::{Adam, Optimizer};

fn mean_flow(seed: u64) -> MeanFlow {
    let mut rng = StdRng::seed_from_u64(seed);
    let actor = Actor::new(3, 2, 16, 2, Activation::Gelu, &mut rng).unwrap();
    MeanFlow::new(actor, MeanFlowConfig::default()).unwrap()
}

fn fixture() -> (Array2<f32>, Array2<f32>, Array2<f32>) {
    let actions = arr2(&[[0.5, -0.2], [-0.9, 0.1], [0.0, 0.7]]);
    let states = arr2(&[[0.1, 0.2, 0.3], [1.0, -1.0, 0.5], [-0.3, 0.0, 0.8]]);
    let noise = arr2(&[[1.2, -0.4], [0.3, 2.1], [-1.5, 0.6]]);
    (actions, states, noise)
}

#[test]
fn test_config_validation() {
    let mut rng = StdRng::seed_from_u64(0);
    let actor = Actor::new(3, 2, 8, 1, Activation::Gelu, &mut rng).unwrap();
    let bad = MeanFlowConfig { noise_std_dev: 0.0, ..MeanFlowConfig::default() };
    assert!(MeanFlow::new(actor.clone(), bad).is_err());
    let bad = MeanFlowConfig { prob_default_flow_obj: 1.5, ..MeanFlowConfig::default() };
    assert!(MeanFlow::new(actor.clone(), bad).is_err());
    let bad = MeanFlowConfig { sample_steps: 0, ..MeanFlowConfig::default() };
    assert!(MeanFlow::new(actor, bad).is_err());
}

#[test]
fn test_actor_output_is_bounded_by_scale() {
    let flow = mean_flow(1);
    let (_, states, noise) = fixture();
    let out = flow
        .actor
        .predict(noise.view(), Actor::filled(3, 1.0).view(), Actor::filled(3, 0.0).view(), states.view())
        .unwrap();
    assert_eq!(out.dim(), (3, 2));
    assert!(out.iter().all(|v| v.abs() <= flow.actor.output_scale));
}

#[test]
fn test_sample_times_ordering() {
    let flow = mean_flow(2);
    let mut rng = StdRng::seed_from_u64(5);
    let (times, starts) = flow.sample_times(2000, &mut rng);
    let mut equal = 0;
    for (&t, &r) in times.iter().zip(starts.iter()) {
        assert!((0.0..=1.0).contains(&t));
        assert!(r >= 0.0 && r <= t);
        if r == t {
            equal += 1;
        }
    }
    // prob_default_flow_obj = 0.5
    assert!((800..1200).contains(&equal), "{} of 2000 with r == t", equal);
}

#[test]
fn test_noise_scale() {
    let flow = mean_flow(3);
    let mut rng = StdRng::seed_from_u64(6);
    let noise = flow.sample_noise(5000, &mut rng);
    assert_eq!(noise.dim(), (5000, 2));
    let std = noise.std(0.0);
    assert!((std - 2.0).abs() < 0.1, "std {}", std);
}

#[test]
fn test_one_step_sample() {
    let flow = mean_flow(4);
    let (_, states, noise) = fixture();
    let mut rng = StdRng::seed_from_u64(0);
    let sampled = flow.sample(states.view(), Some(noise.view()), &mut rng).unwrap();
    let velocity = flow
        .actor
        .predict(noise.view(), Actor::filled(3, 1.0).view(), Actor::filled(3, 0.0).view(), states.view())
        .unwrap();
    assert_eq!(sampled, &noise - &velocity);

    let mut tracked = flow.clone();
    let with_grad = tracked.sample_with_grad(states.view(), noise.view()).unwrap();
    assert_eq!(with_grad, sampled);
}

#[test]
fn test_trained_flow_reproduces_constant_action() {
    let mut rng = StdRng::seed_from_u64(21);
    let actor = Actor::new(1, 1, 64, 2, Activation::Gelu, &mut rng).unwrap();
    let mut flow = MeanFlow::new(actor, MeanFlowConfig::default()).unwrap();
    let mut adam = Adam::new(1e-3, 0.9, 0.999, 1e-8);

    let batch = 128;
    let states = Array2::zeros((batch, 1));
    let actions = Array2::from_elem((batch, 1), 0.6);
    for _ in 0..1500 {
        let noise = flow.sample_noise(batch, &mut rng);
        let result = flow.loss(actions.view(), states.view(), noise.view(), &mut rng).unwrap();
        adam.step(flow.actor.network.layers.iter_mut().zip(result.gradients.layers.iter()))
            .unwrap();
    }

    let eval_states = Array2::zeros((512, 1));
    let one_step = flow.sample(eval_states.view(), None, &mut rng).unwrap();
    let error = one_step.mapv(|a| (a - 0.6).abs()).mean().unwrap();
    assert!(error < 0.3, "one-step samples miss the action by {} on average", error);

    flow.config.sample_steps = 4;
    let multi_step = flow.sample(eval_states.view(), None, &mut rng).unwrap();
    let error = multi_step.mapv(|a| (a - 0.6).abs()).mean().unwrap();
    assert!(error < 0.4, "4-step samples miss the action by {} on average", error);
}

#[test]
fn test_multi_step_sample_shape() {
    let mut flow = mean_flow(5);
    flow.config.sample_steps = 4;
    let (_, states, _) = fixture();
    let mut rng = StdRng::seed_from_u64(1);
    let sampled = flow.sample(states.view(), None, &mut rng).unwrap();
    assert_eq!(sampled.dim(), (3, 2));
    assert!(sampled.iter().all(|v| v.is_finite()));
}

#[test]
fn test_flow_matching_case_targets_velocity() {
    // with r == t the target is exactly noise - action
    let mut flow = mean_flow(6);
    let (actions, states, noise) = fixture();
    let times = arr1(&[0.2, 0.5, 0.9]);

    let result = flow
        .loss_at(actions.view(), states.view(), noise.view(), times.view(), times.view())
        .unwrap();

    let time_col = times.view().insert_axis(Axis(1));
    let noised = &actions * &time_col.mapv(|t| 1.0 - t) + &noise * &time_col;
    let pred = flow
        .actor
        .predict(noised.view(), times.view(), times.view(), states.view())
        .unwrap();
    let flow_target = &noise - &actions;
    let expected = MSE.compute_batch(pred.view(), flow_target.view());
    assert!((result.loss - expected).abs() < 1e-5);
}

#[test]
fn test_flow_matching_gradient_matches_finite_differences() {
    let mut flow = mean_flow(7);
    let (actions, states, noise) = fixture();
    let times = arr1(&[0.3, 0.6, 0.1]);
    let result = flow
        .loss_at(actions.view(), states.view(), noise.view(), times.view(), times.view())
        .unwrap();

    let loss_of = |candidate: &mut MeanFlow| {
        candidate
            .loss_at(actions.view(), states.view(), noise.view(), times.view(), times.view())
            .unwrap()
            .loss
    };

    let eps = 1e-2;
    let last = flow.actor.network.layers.len() - 1;
    for (i, j) in [(0, 0), (3, 1), (7, 0)] {
        let mut plus = flow.clone();
        plus.actor.network.layers[last].weights[[i, j]] += eps;
        let mut minus = flow.clone();
        minus.actor.network.layers[last].weights[[i, j]] -= eps;
        let numeric = (loss_of(&mut plus) - loss_of(&mut minus)) / (2.0 * eps);
        let analytic = result.gradients.layers[last].weights[[i, j]];
        assert!((numeric - analytic).abs() < 2e-2, "analytic {} numeric {}", analytic, numeric);
    }
}

#[test]
fn test_time_derivative_matches_finite_differences() {
    let mut flow = mean_flow(8);
    let (actions, states, noise) = fixture();
    let times = arr1(&[0.3, 0.6, 0.1]);
    let starts = arr1(&[0.1, 0.2, 0.0]);
    let velocity = &noise - &actions;

    let (_, du_dt) = flow
        .actor
        .forward_with_tangent(
            noise.view(),
            times.view(),
            starts.view(),
            states.view(),
            velocity.view(),
            Actor::filled(3, 1.0).view(),
            Actor::filled(3, 0.0).view(),
        )
        .unwrap();

    // move along z' = v, t' = 1, r' = 0
    let eps = 1e-2;
    let eval = |delta: f32| -> Array2<f32> {
        let z = &noise + &(&velocity * delta);
        let t: Array1<f32> = times.mapv(|t| t + delta);
        flow.actor.predict(z.view(), t.view(), starts.view(), states.view()).unwrap()
    };
    let numeric = (eval(eps) - eval(-eps)) / (2.0 * eps);
    for (a, n) in du_dt.iter().zip(numeric.iter()) {
        assert!((a - n).abs() < 5e-2, "analytic {} numeric {}", a, n);
    }
}

#[test]
fn test_loss_rejects_mismatched_noise() {
    let mut flow = mean_flow(9);
    let (actions, states, _) = fixture();
    let mut rng = StdRng::seed_from_u64(0);
    let noise = Array2::zeros((2, 2));
    assert!(flow.loss(actions.view(), states.view(), noise.view(), &mut rng).is_err());
}
