use thiserror::Error;

/// Failure modes of a single delivery attempt.
///
/// The queue consumer pattern-matches on these (together with the attempt
/// number carried in message headers) to choose between rescheduling a retry
/// copy and letting the message dead-letter. Schema violations, request-id
/// mismatches, and duplicates never reach this type — the consumer settles
/// those before an attempt starts.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A downstream dependency (render or dispatch) failed or timed out.
    /// Retryable while attempts remain.
    #[error("transient dependency failure: {0}")]
    Transient(String),

    /// The circuit breaker is open. The real dependency was not invoked;
    /// treated like a transient failure by the retry decision.
    #[error("circuit open, call rejected")]
    CircuitOpen,
}
