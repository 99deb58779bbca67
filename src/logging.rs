//! Helper macros enforcing consistent gateway log fields.
//!
//! These macros keep `operation` (and optionally `target_id`) fields present on every log
//! emitted from transport/dispatcher layers so downstream parsing can rely on them.

/// Log an event for an operation/target pair plus any extra fields.
#[macro_export]
macro_rules! gateway_event {
    ($level:ident, $target:expr, $event:expr, operation = $operation:expr, target_id = $target_id:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target = $target,
            event = $event,
            operation = $operation,
            target_id = %$target_id,
            $($field = %$value,)*
        )
    };
    ($level:ident, $target:expr, $event:expr, operation = $operation:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target = $target,
            event = $event,
            operation = $operation,
            $($field = %$value,)*
        )
    };
}
