//! Canonical schema constants for structured logging
//!
//! Field keys are shared by the logging macros and by ad-hoc `tracing`
//! calls in the reconciliation engine so captured events stay queryable.

pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";
pub const FIELD_TRACE_ID: &str = "trace_id";

// Repository coordinates
pub const FIELD_FMRI: &str = "fmri";
pub const FIELD_PG: &str = "pg";
pub const FIELD_PROPERTY: &str = "property";
pub const FIELD_LAYER: &str = "layer";
pub const FIELD_SOURCE: &str = "source";
pub const FIELD_SNAPSHOT: &str = "snapshot";
pub const FIELD_ATTEMPT: &str = "attempt";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";
pub const FIELD_ERR_ENTITY: &str = "err_entity";
pub const FIELD_ERR_PG: &str = "err_pg";
pub const FIELD_ERR_MESSAGE: &str = "err_message";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_distinct() {
        assert_ne!(EVENT_START, EVENT_END);
        assert_ne!(EVENT_START, EVENT_END_ERROR);
        assert_ne!(EVENT_END, EVENT_END_ERROR);
    }

    #[test]
    fn test_error_field_keys_match_macro_output() {
        assert_eq!(FIELD_ERR_KIND, "err_kind");
        assert_eq!(FIELD_ERR_CODE, "err_code");
        assert_eq!(FIELD_ERR_ENTITY, "err_entity");
        assert_eq!(FIELD_ERR_PG, "err_pg");
        assert_eq!(FIELD_ERR_MESSAGE, "err_message");
    }
}
