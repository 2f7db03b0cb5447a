//! AWS backends: SQS for the queue, DynamoDB for the ledger, S3 for archives.
//!
//! Credentials and region come from the standard AWS provider chain
//! (environment, profile, instance metadata), loaded once by [`load_config`].

mod dynamodb;
mod s3;
mod sqs;

use std::time::Duration;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_sqs::error::DisplayErrorContext;

use crate::BackendError;

pub use dynamodb::DynamoStatusStore;
pub use s3::S3BlobStore;
pub use sqs::SqsQueue;

/// Resolve region and credentials from the environment.
pub async fn load_config() -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest()).load().await
}

/// Any SDK failure that has no more specific meaning for taskfan.
fn unavailable(err: impl std::error::Error) -> BackendError {
    BackendError::Unavailable(DisplayErrorContext(err).to_string())
}

/// Whole seconds, as the AWS APIs take timeouts.
fn whole_seconds(duration: Duration) -> Result<i32, BackendError> {
    i32::try_from(duration.as_secs()).map_err(|_| {
        BackendError::InvalidRequest(format!("duration too long: {}s", duration.as_secs()))
    })
}
