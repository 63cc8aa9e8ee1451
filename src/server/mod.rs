pub mod handlers;
pub mod runtime;

pub use runtime::*;
