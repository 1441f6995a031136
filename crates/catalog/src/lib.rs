pub mod cache;
pub mod catalogue;
pub mod error;
pub mod loader;
pub mod store;

pub use cache::*;
pub use catalogue::*;
pub use error::*;
pub use loader::*;
pub use store::*;
