use ndarray::{Array2, ArrayView2};

const SQRT_2_OVER_PI: f32 = 0.797_884_6;

/// GELU (Gaussian Error Linear Unit) activation function
pub struct Gelu;

impl Gelu {
    /// Approximation of GELU using tanh
    /// GELU(x) ≈ 0.5 * x * (1 + tanh(sqrt(2/π) * (x + 0.044715 * x^3)))
    pub fn apply_batch(inputs: &mut Array2<f32>) {
        inputs.mapv_inplace(|x| {
            let inner = SQRT_2_OVER_PI * (x + 0.044715 * x.powi(3));
            0.5 * x * (1.0 + inner.tanh())
        });
    }

    pub fn derivative_batch(inputs: ArrayView2<f32>) -> Array2<f32> {
        inputs.mapv(|x| {
            let inner = SQRT_2_OVER_PI * (x + 0.044715 * x.powi(3));
            let tanh_inner = inner.tanh();
            let sech2_inner = 1.0 - tanh_inner.powi(2);
            0.5 * (1.0 + tanh_inner) + 0.5 * x * sech2_inner * SQRT_2_OVER_PI * (1.0 + 0.134145 * x.powi(2))
        })
    }
}
