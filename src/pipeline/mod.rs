pub mod builder;
pub mod defaults;
pub mod rescorer;
pub mod traits;
