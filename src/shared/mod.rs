pub mod logging;
pub mod models;

pub use models::{DataType, DateWindow, Step};
