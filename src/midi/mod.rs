pub mod note;
pub mod parse;
pub mod select;
