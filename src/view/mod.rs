pub mod dynamic_view;

pub use dynamic_view::*;
