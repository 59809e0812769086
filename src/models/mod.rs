pub mod job;
pub mod migration;
pub mod status;
pub mod table;
pub mod transfer;

pub use job::*;
pub use migration::*;
pub use status::*;
pub use table::*;
pub use transfer::*;
