//! Theme cascade orchestration: applies catalogue themes to the layers of a
//! map and keeps the surrounding UI in step.

pub mod applier;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod memory;
pub mod report;
pub mod selector;
pub mod session;

pub use applier::*;
pub use collaborators::*;
pub use config::*;
pub use error::*;
pub use memory::*;
pub use report::*;
pub use selector::*;
pub use session::*;
