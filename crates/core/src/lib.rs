pub mod config;
pub mod error;
pub mod subject;
pub mod tier;
pub mod work;

pub use config::Config;
pub use error::*;
pub use subject::*;
pub use tier::Tier;
pub use work::*;
