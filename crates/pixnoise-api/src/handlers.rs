//! Request handlers.

pub mod form;
pub mod health;
pub mod images;
pub mod root;
pub mod videos;

pub use health::*;
pub use images::*;
pub use root::*;
pub use videos::*;
