//! Tool-call recovery: parsing free-text invocations, repairing their JSON,
//! shaping their arguments and scrubbing the artifacts from client text.
pub mod normalize;
pub mod parser;
pub mod repair;
pub mod sanitize;

pub use normalize::{normalize_call, normalize_calls, ToolNameMap};
pub use parser::{parse_function_calls, parse_function_calls_with_dialect, Dialect, FunctionCall};
pub use repair::{repair_json, try_repair_json, EMPTY_REPAIR};
pub use sanitize::sanitize_content;
