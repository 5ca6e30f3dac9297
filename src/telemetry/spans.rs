//! Span helpers for reconciliation tracing.

use tracing::{info_span, Span};

use crate::model::ResourceIdentity;

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for the span every reconciliation pass runs in.
pub struct ReconcileSpan;

impl ReconcileSpan {
    /// Fields included:
    /// - `kind`, `namespace`, `name`: the identity being reconciled
    /// - `attempt`: consecutive failures before this pass, plus one
    /// - `status`, `error.message`: filled in by `SpanExt::record_result`
    /// - `actions`: number of backend actions executed
    pub fn new(identity: &ResourceIdentity, attempt: u32) -> Span {
        info_span!(
            "reconcile",
            kind = %identity.kind,
            namespace = %identity.namespace,
            name = %identity.name,
            attempt = attempt,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            actions = tracing::field::Empty,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;

    #[test]
    fn test_record_result_without_subscriber() {
        let id = ResourceIdentity::new(ResourceKind::Service, "default", "web");
        let span = ReconcileSpan::new(&id, 1);
        span.record_result::<(), String>(&Err("boom".into()));
        span.record_result::<(), String>(&Ok(()));
        span.record("actions", 3u64);
    }
}
