//! Delivery log contract, query types and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailroom_core::{FlowId, LogId, ProviderId, TemplateId};
use mailroom_mail::{LogStatus, MailLog, NewMailLog};

use crate::store::{Pagination, StoreError};

/// Filter criteria for log queries. Every field is optional and ANDed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    pub status: Option<LogStatus>,
    pub provider_id: Option<ProviderId>,
    pub template_id: Option<TemplateId>,
    pub flow_id: Option<FlowId>,
    pub is_test: Option<bool>,
    pub channel: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring over recipient, subject and error text.
    pub search: Option<String>,
}

impl LogFilter {
    pub(crate) fn matches(&self, log: &MailLog) -> bool {
        let e = &log.entry;
        self.status.is_none_or(|s| e.status == s)
            && self.provider_id.is_none_or(|p| e.provider_id == Some(p))
            && self.template_id.is_none_or(|t| e.template_id == Some(t))
            && self.flow_id.is_none_or(|f| e.flow_id == Some(f))
            && self.is_test.is_none_or(|t| e.is_test == t)
            && self.channel.as_deref().is_none_or(|c| e.channel == c)
            && self.from.is_none_or(|from| log.created_at >= from)
            && self.to.is_none_or(|to| log.created_at <= to)
            && self.search.as_deref().is_none_or(|needle| {
                let needle = needle.to_lowercase();
                [Some(e.recipient_email.as_str()), Some(e.subject.as_str()), e.error.as_deref()]
                    .into_iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
    }
}

/// Paginated log query result, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct LogQueryResult {
    pub logs: Vec<MailLog>,
    /// Rows matching the filter across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl LogQueryResult {
    pub(crate) fn new(logs: Vec<MailLog>, total: u64, pagination: Pagination) -> Self {
        let has_more = u64::from(pagination.offset) + (logs.len() as u64) < total;
        Self {
            logs,
            total,
            pagination,
            has_more,
        }
    }
}

#[async_trait]
pub trait MailLogStore: Send + Sync {
    /// Write one immutable row.
    async fn append(&self, entry: NewMailLog) -> Result<MailLog, StoreError>;

    async fn query(
        &self,
        filter: LogFilter,
        pagination: Pagination,
    ) -> Result<LogQueryResult, StoreError>;

    /// Successful (`sent` or `queued`) rows for `provider_id` since `since`.
    /// Backs the hourly/daily caps.
    async fn count_delivered_since(
        &self,
        provider_id: ProviderId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// In-memory delivery log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMailLogStore {
    logs: RwLock<Vec<MailLog>>,
}

impl InMemoryMailLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Rows in insertion order.
    pub fn all(&self) -> Result<Vec<MailLog>, StoreError> {
        Ok(self.logs.read()?.clone())
    }
}

#[async_trait]
impl MailLogStore for InMemoryMailLogStore {
    async fn append(&self, entry: NewMailLog) -> Result<MailLog, StoreError> {
        let log = MailLog::new(LogId::new(), entry, Utc::now());
        self.logs.write()?.push(log.clone());
        Ok(log)
    }

    async fn query(
        &self,
        filter: LogFilter,
        pagination: Pagination,
    ) -> Result<LogQueryResult, StoreError> {
        let logs = self.logs.read()?;
        let matching: Vec<_> = logs.iter().rev().filter(|l| filter.matches(l)).collect();
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        Ok(LogQueryResult::new(page, total, pagination))
    }

    async fn count_delivered_since(
        &self,
        provider_id: ProviderId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let logs = self.logs.read()?;
        let count = logs
            .iter()
            .filter(|l| {
                l.entry.provider_id == Some(provider_id)
                    && matches!(l.entry.status, LogStatus::Sent | LogStatus::Queued)
                    && l.created_at >= since
            })
            .count();
        Ok(count as u64)
    }
}
