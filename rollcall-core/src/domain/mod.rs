pub mod entry;
pub mod event;
pub mod record;

pub use entry::*;
pub use event::*;
pub use record::*;
