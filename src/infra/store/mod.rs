//! Record stores.

pub mod records;
pub mod table;

pub use records::RecordStore;
pub use table::{Keyed, Table};
