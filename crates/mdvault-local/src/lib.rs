//! Local filesystem backend for mdvault.

mod backend;
mod picker;
mod watch;

pub use backend::LocalBackend;
pub use picker::{FilePicker, FixedPicker};
