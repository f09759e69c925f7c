pub mod convert;
pub mod health;
mod headers;

pub use convert::{messages_handler, stream_handler};
pub use health::health_handler;
