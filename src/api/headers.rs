use http::HeaderMap;

use crate::context::RequestContext;
use crate::error::BridgeError;
use crate::fc::ToolNameMap;
use crate::state::AppState;

pub(crate) const TRIGGER_HEADER: &str = "x-trigger-signal";
pub(crate) const RECOVERY_HEADER: &str = "x-recovery-enabled";
pub(crate) const MODEL_HEADER: &str = "x-model";
pub(crate) const TOOL_NAMES_HEADER: &str = "x-tool-names";

/// Build the conversion context from the request headers.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidRequest`] when a context header is not
/// valid text or the recovery flag is not a boolean.
pub(crate) fn request_context(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<RequestContext, BridgeError> {
    let trigger = header_str(headers, TRIGGER_HEADER)?;
    let recovery = match header_str(headers, RECOVERY_HEADER)? {
        None => state.config.features.enable_function_recovery,
        Some(value) => parse_flag(value).ok_or_else(|| {
            BridgeError::InvalidRequest(format!("{RECOVERY_HEADER} must be true or false"))
        })?,
    };
    let model = header_str(headers, MODEL_HEADER)?
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map_or_else(|| state.config.features.default_model.clone(), str::to_string);
    let tool_names = header_str(headers, TOOL_NAMES_HEADER)?
        .map(|names| ToolNameMap::from_tool_names(names.split(',')))
        .unwrap_or_default();

    Ok(RequestContext::new(model)
        .with_trigger(trigger)
        .with_recovery(recovery)
        .with_tool_names(tool_names))
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Result<Option<&'h str>, BridgeError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| BridgeError::InvalidRequest(format!("{name} is not valid text")))
        })
        .transpose()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
