pub mod identifiers;
pub mod record;
pub mod stats;
pub mod work;

pub use identifiers::*;
pub use record::*;
pub use stats::*;
pub use work::*;
