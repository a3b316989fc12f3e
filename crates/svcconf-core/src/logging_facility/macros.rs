//! Operation boundary macros
//!
//! A top-level call emits one `start` event, then exactly one `end` or
//! `end_error`. All three carry `component` (the calling module) and `op`;
//! callers append their own fields after the required ones.

#[doc(hidden)]
#[macro_export]
macro_rules! __log_op_event {
    ($level:ident, $op:expr, $event:expr) => {
        tracing::$level!(component = module_path!(), op = $op, event = $event)
    };
    ($level:ident, $op:expr, $event:expr, $($field:tt)+) => {
        tracing::$level!(component = module_path!(), op = $op, event = $event, $($field)+)
    };
}

/// Log the start of an operation
///
/// ```
/// # use svcconf_core::log_op_start;
/// log_op_start!("import_bundle");
/// log_op_start!("import_bundle", source = "site.json");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)*)?) => {
        $crate::__log_op_event!(
            info,
            $op,
            $crate::core_types::schema::EVENT_START
            $(, $($field)*)?
        )
    };
}

/// Log the successful end of an operation; `duration_ms` is required
///
/// ```
/// # use svcconf_core::log_op_end;
/// log_op_end!("import_bundle", duration_ms = 42);
/// log_op_end!("import_bundle", duration_ms = 42, status = "OK");
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {
        $crate::__log_op_event!(
            info,
            $op,
            $crate::core_types::schema::EVENT_END,
            duration_ms = $duration
            $(, $($field)*)?
        )
    };
}

/// Log the failed end of an operation
///
/// `$err` is anything convertible into an `ExError`. Its kind and code are
/// logged, and so are the entity and property group it names, if any.
///
/// ```
/// # use svcconf_core::log_op_error;
/// # use svcconf_core::errors::{ExError, ExErrorKind};
/// let err = ExError::new(ExErrorKind::Unreachable).with_entity("svc:/app");
/// log_op_error!("import_bundle", err, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        let ex_err: $crate::errors::ExError = $err.clone().into();
        $crate::__log_op_event!(
            error,
            $op,
            $crate::core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
            err_entity = ex_err.entity().unwrap_or(""),
            err_pg = ex_err.pg().unwrap_or(""),
            err_message = ex_err.message()
            $(, $($field)*)?
        );
    }};
}
