pub mod builders;
pub mod types;

pub use types::*;
