pub mod binary_index;
pub mod fts;
pub mod id_index;
pub mod unique_index;

pub use binary_index::*;
pub use fts::*;
pub use id_index::*;
pub use unique_index::*;
