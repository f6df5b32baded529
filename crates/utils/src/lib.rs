pub mod assets;
pub mod env;
pub mod path;
