pub mod decode;
pub mod silence;
pub mod tempo;
