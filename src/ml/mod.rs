pub mod ml_model;
pub mod inference;

pub use ml_model::{DigitNet, ModelConfig};
pub use inference::{create_runner, init_model_binary, BurnRunner};
