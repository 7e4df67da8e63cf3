pub mod database;
pub mod sources;
pub mod validation;

pub use database::*;
pub use sources::*;
pub use validation::*;
