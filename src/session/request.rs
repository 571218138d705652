// Pending application decisions. `active_requests` is the only place these
// live; accepting or rejecting one removes it atomically.

/// A request awaiting an accept/reject decision from the Application.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingRequest {
    Connect {
        app_name: String,
        /// Echoed back verbatim in the `_result`/`_error` response.
        transaction_id: f64,
    },
}
