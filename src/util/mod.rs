mod math;
pub use math::*;

mod search;
pub use search::*;

mod bench;
pub use bench::*;
