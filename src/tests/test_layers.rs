use ndarray::{arr1, arr2, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::activations::Activation;
use crate::error::FlowQlError;
use crate::layers::{DenseLayer, LayerGradients, WeightInit};

fn fixed_layer(activation: Activation) -> DenseLayer {
    let mut rng = StdRng::seed_from_u64(0);
    DenseLayer::new(2, 2, activation, &mut rng)
        .with_weights(arr2(&[[0.5, -1.0], [0.25, 2.0]]))
        .unwrap()
        .with_biases(arr1(&[0.1, -0.2]))
        .unwrap()
}

#[test]
fn test_parameter_shape_mismatch_is_an_error() {
    let mut rng = StdRng::seed_from_u64(0);
    let layer = DenseLayer::new(1, 2, Activation::Linear, &mut rng);
    assert!(matches!(
        layer.clone().with_weights(arr2(&[[1.0], [1.0]])),
        Err(FlowQlError::DimensionMismatch { .. })
    ));
    assert!(matches!(
        layer.with_biases(arr1(&[0.0])),
        Err(FlowQlError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_dense_layer_creation() {
    let mut rng = StdRng::seed_from_u64(1);
    let layer = DenseLayer::new(3, 4, Activation::Relu, &mut rng);
    assert_eq!(layer.weights.shape(), &[3, 4]);
    assert_eq!(layer.biases.shape(), &[4]);
    assert_eq!(layer.input_size(), 3);
    assert_eq!(layer.output_size(), 4);
    assert_eq!(layer.num_parameters(), 16);
}

#[test]
fn test_forward_batch_values() {
    let mut layer = fixed_layer(Activation::Linear);
    let output = layer.forward_batch(arr2(&[[1.0, 2.0]]).view());
    // [1*0.5 + 2*0.25 + 0.1, 1*-1 + 2*2 - 0.2]
    assert!((output[[0, 0]] - 1.1).abs() < 1e-6);
    assert!((output[[0, 1]] - 2.8).abs() < 1e-6);
    assert_eq!(layer.predict_batch(arr2(&[[1.0, 2.0]]).view()), output);
}

#[test]
fn test_backward_requires_forward() {
    let layer = fixed_layer(Activation::Tanh);
    let result = layer.backward_batch(Array2::ones((1, 2)).view());
    assert!(matches!(result, Err(FlowQlError::TrainingError(_))));
}

#[test]
fn test_backward_shapes_and_bias_gradient() {
    let mut layer = fixed_layer(Activation::Linear);
    layer.forward_batch(arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).view());
    let (input_errors, gradients) = layer.backward_batch(Array2::ones((3, 2)).view()).unwrap();
    assert_eq!(input_errors.dim(), (3, 2));
    assert_eq!(gradients.weights.dim(), (2, 2));
    assert_eq!(gradients.biases, arr1(&[3.0, 3.0]));
    // dL/dW = X^T * 1
    assert_eq!(gradients.weights, arr2(&[[9.0, 9.0], [12.0, 12.0]]));
}

#[test]
fn test_tangent_matches_finite_difference() {
    let mut layer = fixed_layer(Activation::Gelu);
    let inputs = arr2(&[[0.3, -0.7]]);
    let direction = arr2(&[[1.0, 0.5]]);
    let (outputs, tangents) = layer.forward_tangent_batch(inputs.view(), direction.view());
    assert_eq!(outputs, layer.predict_batch(inputs.view()));

    let eps = 1e-3;
    let plus = layer.predict_batch((&inputs + &(&direction * eps)).view());
    let minus = layer.predict_batch((&inputs - &(&direction * eps)).view());
    let numeric = (plus - minus) / (2.0 * eps);
    for (a, n) in tangents.iter().zip(numeric.iter()) {
        assert!((a - n).abs() < 1e-2, "analytic {} numeric {}", a, n);
    }
}

#[test]
fn test_gradient_norm() {
    let layer = fixed_layer(Activation::Relu);
    let mut gradients = LayerGradients::zeros_like(&layer);
    assert_eq!(gradients.squared_norm(), 0.0);
    gradients.biases[0] = 3.0;
    gradients.weights[[1, 1]] = 4.0;
    assert_eq!(gradients.squared_norm(), 25.0);
}

#[test]
fn test_weight_init_ranges() {
    let mut rng = StdRng::seed_from_u64(2);
    let weights = WeightInit::Uniform { min: -0.1, max: 0.1 }.initialize_weights((10, 10), &mut rng);
    assert!(weights.iter().all(|w| (-0.1..=0.1).contains(w)));
    let zeros = WeightInit::Zeros.initialize_weights((3, 3), &mut rng);
    assert!(zeros.iter().all(|&w| w == 0.0));
}
