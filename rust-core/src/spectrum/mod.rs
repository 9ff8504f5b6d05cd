//! Windowed FFT and the multi-resolution cascade built on it

pub mod cascade;
pub mod cubic;
pub mod fft;
pub mod windowing;

pub use cascade::{CascadeParams, FftCascade};
pub use cubic::MonotoneCubic;
pub use fft::{is_allowed_size, next_fast_size, FftError, RealFft};
pub use windowing::{WindowFunction, WindowParseError};
