pub mod crypto;
pub mod error;
pub mod serialized;
pub mod system;
pub mod timer;

pub use error::*;
pub use timer::Timer;
