pub mod image_classifier;
pub mod postprocess;
pub mod runner;

pub use image_classifier::{Classifier, ClassifierOptions};
pub use postprocess::{select_top, top_label, ScoreTransform};
pub use runner::ModelRunner;
