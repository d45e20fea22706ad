//! Rate-limited bulk sending on top of [`DeliveryService::send_now`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::info;

use mailroom_mail::NewMailJob;

use super::service::DeliveryService;

pub const DEFAULT_BULK_BATCH_SIZE: usize = 10;
pub const DEFAULT_BULK_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItemResult {
    /// Position in the input.
    pub index: usize,
    pub recipient_email: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
}

/// Sends messages in fixed-size concurrent batches with a pause between
/// batches.
#[derive(Debug, Clone)]
pub struct BulkSender {
    service: Arc<DeliveryService>,
    batch_size: usize,
    delay: Duration,
}

impl BulkSender {
    pub fn new(service: Arc<DeliveryService>) -> Self {
        Self {
            service,
            batch_size: DEFAULT_BULK_BATCH_SIZE,
            delay: DEFAULT_BULK_DELAY,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn send_bulk(&self, messages: Vec<NewMailJob>) -> BulkReport {
        let mut report = BulkReport {
            total: messages.len(),
            ..BulkReport::default()
        };
        let batch_count = messages.len().div_ceil(self.batch_size);

        let mut indexed = messages.into_iter().enumerate().peekable();
        let mut batch_no = 0;
        while indexed.peek().is_some() {
            if batch_no > 0 {
                tokio::time::sleep(self.delay).await;
            }
            batch_no += 1;

            let batch: Vec<(usize, NewMailJob)> = indexed.by_ref().take(self.batch_size).collect();
            let sends = batch.into_iter().map(|(index, message)| {
                let service = self.service.clone();
                async move {
                    let recipient_email = message.recipient_email.clone();
                    match service.send_now(message).await {
                        Ok(outcome) => BulkItemResult {
                            index,
                            recipient_email,
                            success: outcome.is_success(),
                            message_id: outcome.message_id,
                            error: outcome.error,
                        },
                        Err(err) => BulkItemResult {
                            index,
                            recipient_email,
                            success: false,
                            message_id: None,
                            error: Some(err.to_string()),
                        },
                    }
                }
            });

            for result in join_all(sends).await {
                if result.success {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }
                report.results.push(result);
            }
            info!(batch = batch_no, of = batch_count, "bulk batch sent");
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "bulk send finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_support::Fixture;
    use std::time::Instant;

    #[tokio::test]
    async fn batches_are_paced_and_results_aggregated() {
        let fx = Fixture::new().await;
        let mut messages: Vec<NewMailJob> = (0..5)
            .map(|i| NewMailJob::new(format!("user{i}@example.com")).with_template(fx.template.id))
            .collect();
        messages.push(NewMailJob::new("not-an-address"));

        let started = Instant::now();
        let report = BulkSender::new(fx.service.clone())
            .with_batch_size(2)
            .with_delay(Duration::from_millis(50))
            .send_bulk(messages)
            .await;

        // 3 batches, 2 pauses.
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!((report.total, report.succeeded, report.failed), (6, 5, 1));
        let indexes: Vec<usize> = report.results.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);
        assert!(report.results[5].error.as_deref().unwrap().contains("invalid recipient"));
        assert_eq!(fx.adapter.sent().len(), 5);
    }

    #[tokio::test]
    async fn empty_input_sends_nothing() {
        let fx = Fixture::new().await;
        let report = BulkSender::new(fx.service.clone()).send_bulk(Vec::new()).await;
        assert_eq!(report, BulkReport::default());
    }
}
