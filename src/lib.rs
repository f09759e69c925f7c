pub mod api;
pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod fc;
pub mod json_scan;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod state;
pub mod stream;

mod util;
