use reqwest::StatusCode;

use crate::models::Id;

/// Failures talking to the aggregator.
///
/// Token-grant failures and data-read failures are kept distinct so callers
/// can decide whether a refresh-and-retry is worth attempting.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// OAuth exchange or refresh was rejected. Carries the provider's raw
    /// error body for diagnostics.
    #[error("provider auth request failed ({status}): {body}")]
    Auth { status: StatusCode, body: String },

    /// An authenticated data read was rejected.
    #[error("provider data request failed ({status}): {body}")]
    Data { status: StatusCode, body: String },

    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode provider {payload} response: {source}")]
    Decode {
        payload: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The provider answered 2xx but the `results` envelope was empty where
    /// exactly one record was required.
    #[error("provider returned an empty {payload} result set")]
    EmptyResults { payload: &'static str },
}

impl ProviderError {
    /// True when the failure looks like a stale/invalid token, i.e. a data
    /// call that is worth retrying exactly once after a token refresh.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ProviderError::Data { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

/// Errors surfaced by the sync engine and the ledger entry points.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(Id),

    #[error("account not found: {0}")]
    AccountNotFound(Id),

    #[error("transaction not found: {0}")]
    TransactionNotFound(Id),

    /// Token refresh failed; the connection was marked errored and callers
    /// must not proceed to data sync.
    #[error("token refresh failed for connection {connection_id}")]
    Refresh {
        connection_id: Id,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A balance adjustment would touch an account the requesting user does
    /// not own, or reverse a transaction whose account no longer exists.
    #[error("balance invariant violation: {reason}")]
    BalanceInvariant { reason: String },

    /// Provider-sourced transactions are write-once.
    #[error("transaction {0} is provider-sourced and cannot be edited")]
    SyncedTransactionImmutable(Id),

    #[error("account {0} is managed by a connection; disconnect it first")]
    AccountLinked(Id),

    #[error(transparent)]
    InvalidAmount(#[from] crate::models::NegativeAmountError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unauthorized_data_errors_invite_a_refresh_retry() {
        let unauthorized = ProviderError::Data {
            status: StatusCode::UNAUTHORIZED,
            body: "token expired".to_string(),
        };
        assert!(unauthorized.is_unauthorized());

        let server_side = ProviderError::Data {
            status: StatusCode::BAD_GATEWAY,
            body: "upstream".to_string(),
        };
        assert!(!server_side.is_unauthorized());

        let auth = ProviderError::Auth {
            status: StatusCode::UNAUTHORIZED,
            body: "bad client".to_string(),
        };
        assert!(!auth.is_unauthorized());
    }
}
