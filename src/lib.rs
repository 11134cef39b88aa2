pub mod suballoc;
pub mod util;
