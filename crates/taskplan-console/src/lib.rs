pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod editor;
pub mod error;
pub mod reorder;
pub mod sanitize;
pub mod snapshot;
pub mod task;
pub mod ui;

pub use error::{Error, Result};
