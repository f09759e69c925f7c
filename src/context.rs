use crate::fc::ToolNameMap;

/// Per-request inputs to a conversion.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    trigger: Option<String>,
    pub recovery_enabled: bool,
    pub model: String,
    pub tool_names: ToolNameMap,
}

impl RequestContext {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            trigger: None,
            recovery_enabled: true,
            model: model.into(),
            tool_names: ToolNameMap::default(),
        }
    }

    /// An empty trigger is the same as none.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Option<&str>) -> Self {
        self.trigger = trigger
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_recovery(mut self, enabled: bool) -> Self {
        self.recovery_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_tool_names(mut self, names: ToolNameMap) -> Self {
        self.tool_names = names;
        self
    }

    #[inline]
    #[must_use]
    pub fn trigger(&self) -> Option<&str> {
        self.trigger.as_deref()
    }

    /// Recovery runs only when it is enabled and a trigger was supplied.
    #[inline]
    #[must_use]
    pub fn recovery_active(&self) -> bool {
        self.recovery_enabled && self.trigger.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_trigger_is_none() {
        assert_eq!(RequestContext::new("m").with_trigger(Some("  ")).trigger(), None);
        assert_eq!(RequestContext::new("m").with_trigger(None).trigger(), None);
        assert_eq!(
            RequestContext::new("m")
                .with_trigger(Some("<T/>"))
                .trigger(),
            Some("<T/>")
        );
    }

    #[test]
    fn recovery_needs_a_trigger() {
        let ctx = RequestContext::new("m");
        assert!(ctx.recovery_enabled);
        assert!(!ctx.recovery_active());
        let ctx = ctx.with_trigger(Some("<T/>"));
        assert!(ctx.recovery_active());
        assert!(!ctx.with_recovery(false).recovery_active());
    }
}
