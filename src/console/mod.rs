//! Console module - Print and logging facilities.

pub mod logger;

#[macro_use]
pub mod print;

pub use logger::{init as init_logger, set_clock};
pub use print::set_writer;
