pub mod config;
pub mod error;
pub mod frame;
pub mod query;
pub mod series;

pub use config::{AlertingConfig, Config};
pub use error::*;
pub use frame::*;
pub use query::*;
pub use series::*;
