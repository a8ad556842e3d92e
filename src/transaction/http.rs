//! HTTP transaction: posts one payload to one endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::net::HttpClient;
use crate::transaction::{Transaction, TransactionError};

/// A payload bound for a single endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransaction {
    id: Uuid,
    target: String,
    url: Url,
    payload: Bytes,
    content_type: String,
    unit_count: u64,
}

impl HttpTransaction {
    pub fn new(target: impl Into<String>, url: Url, payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            url,
            payload: payload.into(),
            content_type: "application/octet-stream".to_string(),
            unit_count: 1,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_unit_count(mut self, unit_count: u64) -> Self {
        self.unit_count = unit_count;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[async_trait]
impl Transaction for HttpTransaction {
    fn target(&self) -> &str {
        &self.target
    }

    fn unit_count(&self) -> u64 {
        self.unit_count
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        client: &HttpClient,
    ) -> Result<(), TransactionError> {
        let request = client
            .inner()
            .post(self.url.clone())
            .header(CONTENT_TYPE, self.content_type.as_str())
            .header("x-transaction-id", self.id.to_string())
            .body(self.payload.clone());

        let response = tokio::select! {
            result = request.send() => result.map_err(|source| TransactionError::Request {
                target: self.target.clone(),
                source,
            })?,
            _ = cancel.cancelled() => {
                tracing::debug!(transaction_id = %self.id, endpoint = %self.target, "Request cancelled");
                return Err(TransactionError::Cancelled);
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                transaction_id = %self.id,
                endpoint = %self.target,
                status = status.as_u16(),
                "Transaction delivered"
            );
            Ok(())
        } else {
            Err(TransactionError::Rejected {
                target: self.target.clone(),
                status: status.as_u16(),
            })
        }
    }
}
