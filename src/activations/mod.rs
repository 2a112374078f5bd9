//! # Activation Functions Module
//!
//! Element-wise non-linearities used by the actor and critic networks.
//!
//! - **ReLU**: `max(0, x)`
//! - **Tanh**: bounded output in (-1, 1); the actor's output layer uses it
//! - **Linear**: identity, used for value heads
//! - **LeakyReLU**: ReLU with a small negative slope
//! - **GELU**: smooth ReLU variant, the default for hidden layers
//!
//! Every activation exposes its derivative at the pre-activation values.
//! The mean-flow objective pushes tangents through the actor, so smooth
//! activations give better-behaved time derivatives than ReLU.

pub mod functions;
pub mod gelu;

pub use functions::Activation;
