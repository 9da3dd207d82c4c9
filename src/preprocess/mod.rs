pub mod image_preprocessor;
pub mod options;

pub use image_preprocessor::{
    apply_color_adjust, binarize, center_crop_square, gray_average, resize_nearest,
    rotate_quarter_turns, ImagePreprocessor,
};
pub use options::{ColorAdjust, Normalization, PreprocessOptions, DEFAULT_THRESHOLD};
