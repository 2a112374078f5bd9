pub mod test_critic;
pub mod test_environment;
pub mod test_layers;
pub mod test_mean_flow;
