pub mod error;
pub mod flatten;
pub mod payload;
pub mod properties;

pub use error::PayloadError;
pub use flatten::*;
pub use payload::*;
pub use properties::*;
