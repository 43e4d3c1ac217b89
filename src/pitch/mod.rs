pub mod detector;
pub mod yin;
