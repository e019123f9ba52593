pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod traits;
pub mod types;

pub use client::MandolineClient;
pub use config::*;
pub use error::ClientError;
pub use factory::*;
pub use traits::*;
pub use types::*;
