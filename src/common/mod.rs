pub mod constants;
pub mod event_bus;
pub mod util;
pub mod value;

pub use constants::*;
pub use event_bus::*;
pub use util::*;
pub use value::*;
