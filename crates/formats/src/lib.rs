pub mod geojson;
pub mod manifest;
pub mod profile;
pub mod registry;

pub use geojson::*;
pub use manifest::*;
pub use profile::*;
pub use registry::*;
