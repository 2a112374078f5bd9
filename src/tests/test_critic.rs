use ndarray::{arr2, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::f32::consts::E;

use crate::activations::Activation;
use crate::algorithms::{softmin_aggregate, Critic, SOFTMIN_TEMPERATURE};

fn critic(seed: u64) -> Critic {
    let mut rng = StdRng::seed_from_u64(seed);
    Critic::new(3, 2, 8, 2, 3, Activation::Gelu, &mut rng).unwrap()
}

#[test]
fn test_softmin_bounds() {
    let q = arr2(&[[1.0, 2.0, 3.0], [-5.0, 0.3, 0.31], [0.0, 0.0, 0.0], [100.0, -100.0, 7.0]]);
    let (aggregate, weights) = softmin_aggregate(q.view(), SOFTMIN_TEMPERATURE);
    let slack = (3.0 - 1.0) / (E * SOFTMIN_TEMPERATURE);

    for (row, &value) in q.rows().into_iter().zip(aggregate.iter()) {
        let min = row.fold(f32::INFINITY, |a, &b| a.min(b));
        assert!(value >= min - 1e-5, "{} < {}", value, min);
        assert!(value <= min + slack + 1e-5, "{} > {}", value, min + slack);
    }
    for row in weights.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-5);
    }
    // equal inputs aggregate to themselves
    assert!(aggregate[2].abs() < 1e-6);
}

#[test]
fn test_softmin_is_stable_for_large_values() {
    let q = arr2(&[[1e4, 1e4 + 1.0]]);
    let (aggregate, _) = softmin_aggregate(q.view(), SOFTMIN_TEMPERATURE);
    assert!(aggregate[0].is_finite());
    assert!((aggregate[0] - 1e4).abs() < 1.0);
}

#[test]
fn test_critic_shapes() {
    let critic = critic(0);
    assert_eq!(critic.num_heads(), 3);
    let states = Array2::zeros((4, 3));
    let actions = Array2::zeros((4, 2));
    assert_eq!(critic.head_values(states.view(), actions.view()).unwrap().dim(), (4, 3));
    assert_eq!(critic.predict(states.view(), actions.view()).unwrap().len(), 4);
    assert!(critic.predict(states.view(), Array2::zeros((4, 1)).view()).is_err());
    assert_eq!(critic.layers().count(), 9);
}

#[test]
fn test_predict_matches_forward() {
    let mut critic = critic(1);
    let states = arr2(&[[0.1, 0.2, 0.3], [-0.5, 0.0, 1.0]]);
    let actions = arr2(&[[0.5, -0.5], [1.0, 0.0]]);
    let predicted = critic.predict(states.view(), actions.view()).unwrap();
    let forward = critic.forward(states.view(), actions.view()).unwrap();
    assert_eq!(predicted, forward);
}

#[test]
fn test_backward_before_forward_fails() {
    let critic = critic(2);
    assert!(critic.backward(Array1::ones(2).view()).is_err());
}

#[test]
fn test_action_gradient_matches_finite_differences() {
    let mut critic = critic(3);
    let states = arr2(&[[0.1, 0.2, 0.3], [-0.5, 0.0, 1.0]]);
    let actions = arr2(&[[0.5, -0.5], [1.0, 0.0]]);

    critic.forward(states.view(), actions.view()).unwrap();
    let gradients = critic.backward(Array1::ones(2).view()).unwrap();
    assert_eq!(gradients.actions.dim(), (2, 2));
    assert_eq!(gradients.states.dim(), (2, 3));
    assert_eq!(gradients.heads.len(), 3);
    assert_eq!(gradients.layer_gradients().count(), 9);

    let eps = 1e-2;
    for r in 0..2 {
        for c in 0..2 {
            let mut plus = actions.clone();
            plus[[r, c]] += eps;
            let mut minus = actions.clone();
            minus[[r, c]] -= eps;
            let numeric = (critic.predict(states.view(), plus.view()).unwrap().sum()
                - critic.predict(states.view(), minus.view()).unwrap().sum())
                / (2.0 * eps);
            let analytic = gradients.actions[[r, c]];
            assert!((numeric - analytic).abs() < 2e-2, "analytic {} numeric {}", analytic, numeric);
        }
    }
}

#[test]
fn test_parameter_gradient_matches_finite_differences() {
    let mut critic = critic(4);
    let states = arr2(&[[0.3, -0.2, 0.1]]);
    let actions = arr2(&[[0.2, 0.4]]);

    critic.forward(states.view(), actions.view()).unwrap();
    let gradients = critic.backward(Array1::ones(1).view()).unwrap();

    let eps = 1e-2;
    for head in 0..critic.num_heads() {
        let last = critic.heads[head].layers.len() - 1;
        for i in 0..critic.heads[head].layers[last].weights.nrows() {
            let mut plus = critic.clone();
            plus.heads[head].layers[last].weights[[i, 0]] += eps;
            let mut minus = critic.clone();
            minus.heads[head].layers[last].weights[[i, 0]] -= eps;
            let numeric = (plus.predict(states.view(), actions.view()).unwrap()[0]
                - minus.predict(states.view(), actions.view()).unwrap()[0])
                / (2.0 * eps);
            let analytic = gradients.heads[head].layers[last].weights[[i, 0]];
            assert!((numeric - analytic).abs() < 2e-2, "head {}: analytic {} numeric {}", head, analytic, numeric);
        }
    }
}
