pub mod hatch;
pub mod layer;
pub mod scale;
pub mod symbology;
pub mod visibility;

pub use hatch::*;
pub use layer::*;
pub use scale::*;
pub use symbology::*;
pub use visibility::*;
