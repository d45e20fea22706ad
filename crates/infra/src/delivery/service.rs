//! Per-job delivery: resolve provider, render, send, log, transition.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use mailroom_core::{DomainError, FlowId, JobId, LogId, ProviderId};
use mailroom_mail::{
    JobStatus, JsonMap, LogStatus, MailJob, MailLog, MailProvider, NewMailJob, NewMailLog,
    RecipientMode, body_preview, render,
};

use crate::catalog::{FlowStore, ProviderStore, TemplateStore};
use crate::error::{PipelineError, PipelineResult};
use crate::jobs::{JobStats, JobStore};
use crate::mail_log::MailLogStore;
use crate::selector::ProviderSelector;
use crate::vendors::{OutboundMessage, SendReceipt, VendorAdapter, VendorRegistry};

const DEFAULT_CHANNEL: &str = "email";

/// Result of one send attempt, mirrored from its log row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub job_id: Option<JobId>,
    pub log_id: LogId,
    pub status: LogStatus,
    pub provider_id: Option<ProviderId>,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    fn from_log(log: &MailLog) -> Self {
        Self {
            job_id: log.entry.job_id,
            log_id: log.id,
            status: log.entry.status,
            provider_id: log.entry.provider_id,
            message_id: log.entry.provider_message_id.clone(),
            error: log.entry.error.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != LogStatus::Failed
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub outcomes: Vec<DeliveryOutcome>,
}

/// Everything resolved before the vendor call.
struct Prepared {
    adapter: Arc<dyn VendorAdapter>,
    provider: MailProvider,
    message: OutboundMessage,
}

/// Delivery orchestration over the stores and vendor adapters.
#[derive(Clone)]
pub struct DeliveryService {
    jobs: Arc<dyn JobStore>,
    providers: Arc<dyn ProviderStore>,
    flows: Arc<dyn FlowStore>,
    templates: Arc<dyn TemplateStore>,
    logs: Arc<dyn MailLogStore>,
    selector: ProviderSelector,
    vendors: VendorRegistry,
}

impl DeliveryService {
    pub fn new<C>(
        jobs: Arc<dyn JobStore>,
        catalog: Arc<C>,
        logs: Arc<dyn MailLogStore>,
        vendors: VendorRegistry,
    ) -> Self
    where
        C: ProviderStore + FlowStore + TemplateStore + 'static,
    {
        let providers: Arc<dyn ProviderStore> = catalog.clone();
        Self {
            selector: ProviderSelector::new(providers.clone(), logs.clone()),
            jobs,
            providers,
            flows: catalog.clone(),
            templates: catalog,
            logs,
            vendors,
        }
    }

    pub fn selector(&self) -> &ProviderSelector {
        &self.selector
    }

    /// Validate and store a new `pending` job. Every referenced provider,
    /// flow and template must exist.
    pub async fn enqueue(&self, new: NewMailJob) -> PipelineResult<MailJob> {
        new.validate()?;
        if let Some(id) = new.provider_id {
            if self.providers.get_provider(id).await?.is_none() {
                return Err(DomainError::not_found(format!("provider {id}")).into());
            }
        }
        if let Some(id) = new.flow_id {
            if self.flows.get_flow(id).await?.is_none() {
                return Err(DomainError::not_found(format!("flow {id}")).into());
            }
        }
        if let Some(id) = new.template_id {
            if self.templates.get_template(id).await?.is_none() {
                return Err(DomainError::not_found(format!("template {id}")).into());
            }
        }

        let job = self.jobs.enqueue(new).await?;
        info!(job_id = %job.id, priority = job.priority, "mail job enqueued");
        Ok(job)
    }

    /// Claim up to `limit` jobs and deliver each one independently.
    ///
    /// Only the claim itself can fail the batch. Every claimed job ends
    /// `sent` or `failed`.
    pub async fn process_batch(&self, limit: usize, worker_id: &str) -> PipelineResult<BatchReport> {
        let jobs = self.jobs.claim_pending(limit, worker_id).await?;
        let mut report = BatchReport {
            claimed: jobs.len(),
            ..BatchReport::default()
        };
        if !jobs.is_empty() {
            debug!(worker_id, claimed = jobs.len(), "claimed mail jobs");
        }

        for job in jobs {
            match self.process_one(&job).await {
                Ok(outcome) => {
                    if outcome.is_success() {
                        report.sent += 1;
                    } else {
                        report.failed += 1;
                    }
                    report.outcomes.push(outcome);
                }
                Err(err) => {
                    error!(job_id = %job.id, worker_id, error = %err, "job processing aborted");
                    self.fail_if_still_processing(job.id, &err).await;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Deliver one claimed job: one log row, then `sent` or `failed`.
    pub async fn process_one(&self, job: &MailJob) -> PipelineResult<DeliveryOutcome> {
        let (entry, result) = self.attempt(job, Some(job.id)).await;
        let logged = self.logs.append(entry).await;

        let transition = match &result {
            Ok(receipt) => {
                info!(
                    job_id = %job.id,
                    message_id = receipt.message_id.as_deref().unwrap_or_default(),
                    "mail sent"
                );
                self.jobs.mark_as_sent(job.id).await
            }
            Err(error) => {
                warn!(job_id = %job.id, error = %error, "mail delivery failed");
                self.jobs.mark_as_failed(job.id, error).await
            }
        };

        let log = logged?;
        transition?;
        Ok(DeliveryOutcome::from_log(&log))
    }

    /// Resolve, render, send and log without touching the queue.
    pub async fn send_now(&self, new: NewMailJob) -> PipelineResult<DeliveryOutcome> {
        new.validate()?;
        let transient = MailJob::from_new(JobId::new(), new, Utc::now());
        let (entry, result) = self.attempt(&transient, None).await;
        if let Err(error) = &result {
            warn!(recipient = %transient.recipient_email, error = %error, "direct send failed");
        }
        let log = self.logs.append(entry).await?;
        Ok(DeliveryOutcome::from_log(&log))
    }

    pub async fn get_job(&self, job_id: JobId) -> PipelineResult<MailJob> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("job {job_id}")).into())
    }

    /// Manual stale-lease recovery.
    pub async fn release(&self, job_ids: &[JobId]) -> PipelineResult<u64> {
        let released = self.jobs.release(job_ids).await?;
        info!(requested = job_ids.len(), released, "released mail jobs");
        Ok(released)
    }

    pub async fn job_stats(&self) -> PipelineResult<JobStats> {
        Ok(self.jobs.stats().await?)
    }

    pub async fn stale_jobs(&self, older_than: Duration) -> PipelineResult<Vec<MailJob>> {
        Ok(self.jobs.list_stale(older_than).await?)
    }

    async fn fail_if_still_processing(&self, job_id: JobId, err: &PipelineError) {
        match self.jobs.get(job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Processing => {
                if let Err(mark_err) = self.jobs.mark_as_failed(job_id, &err.to_string()).await {
                    error!(job_id = %job_id, error = %mark_err, "could not mark job failed");
                }
            }
            Ok(_) => {}
            Err(get_err) => error!(job_id = %job_id, error = %get_err, "could not reload job"),
        }
    }

    /// Build the log row and run the send. Failures before the vendor call
    /// still produce a row describing what was resolved.
    async fn attempt(
        &self,
        job: &MailJob,
        job_id: Option<JobId>,
    ) -> (NewMailLog, Result<SendReceipt, String>) {
        let mut entry = base_entry(job, job_id);
        let prepared = match self.prepare(job, &mut entry).await {
            Ok(prepared) => prepared,
            Err(err) => {
                let error = err.to_string();
                entry.error = Some(error.clone());
                return (entry, Err(error));
            }
        };

        debug!(
            provider = %prepared.provider.name(),
            recipient = %prepared.message.to_email,
            "sending mail"
        );
        match prepared
            .adapter
            .send(&prepared.provider.settings, &prepared.message)
            .await
        {
            Ok(receipt) => {
                entry.status = LogStatus::Sent;
                entry.provider_message_id = receipt.message_id.clone();
                entry.provider_response = receipt.response.clone();
                (entry, Ok(receipt))
            }
            Err(failure) => {
                entry.error = Some(failure.error.clone());
                entry.provider_response = failure.response;
                (entry, Err(failure.error))
            }
        }
    }

    async fn prepare(&self, job: &MailJob, entry: &mut NewMailLog) -> PipelineResult<Prepared> {
        let template = match job.template_id {
            Some(id) => {
                let template = self
                    .templates
                    .get_template(id)
                    .await?
                    .ok_or_else(|| DomainError::not_found(format!("template {id}")))?;
                if !template.is_active {
                    return Err(DomainError::validation(format!(
                        "template '{}' is inactive",
                        template.name
                    ))
                    .into());
                }
                Some(template)
            }
            None => None,
        };

        let flow_id = job.flow_id.or(template.as_ref().map(|t| t.flow_id));
        entry.flow_id = flow_id;

        let provider = self.resolve_provider(job.provider_id, flow_id).await?;
        entry.provider_id = Some(provider.id);

        let mut to_email = job.recipient_email.clone();
        let mut to_name = job.recipient_name.clone();
        let (subject, body) = match &template {
            Some(template) => {
                if let RecipientMode::Fixed { email, name } = &template.recipient_mode {
                    to_email = email.clone();
                    to_name = name.clone();
                }
                let rendered = render(template, &job.payload);
                if !rendered.missing_variables.is_empty() {
                    debug!(template = %template.name, missing = ?rendered.missing_variables, "unresolved template variables");
                    entry.metadata.insert(
                        "missing_variables".to_string(),
                        Value::from(rendered.missing_variables),
                    );
                }
                (rendered.subject, rendered.body)
            }
            None => {
                let body = job.raw_body().ok_or_else(|| {
                    DomainError::validation("job has neither a template nor payload.body")
                })?;
                (job.subject.clone().unwrap_or_default(), body.to_string())
            }
        };
        entry.recipient_email = to_email.clone();
        entry.recipient_name = to_name.clone();
        entry.subject = subject.clone();
        entry.body_preview = body_preview(&body);

        let settings = &provider.settings;
        let from_email = settings.from_email.clone().ok_or_else(|| {
            DomainError::provider_unavailable(format!(
                "provider '{}' has no default from address",
                settings.name
            ))
        })?;
        let adapter = self.vendors.get(settings.provider_type).ok_or_else(|| {
            DomainError::provider_unavailable(format!(
                "no adapter registered for provider type '{}'",
                settings.provider_type
            ))
        })?;

        let message = OutboundMessage {
            from_email,
            from_name: settings.from_name.clone(),
            reply_to: settings.reply_to.clone(),
            to_email,
            to_name,
            cc: entry.cc.clone(),
            bcc: entry.bcc.clone(),
            subject,
            body,
        };
        Ok(Prepared {
            adapter,
            provider,
            message,
        })
    }

    /// Job override, then the bound flow's provider (if the flow is active),
    /// then default selection.
    async fn resolve_provider(
        &self,
        explicit: Option<ProviderId>,
        flow_id: Option<FlowId>,
    ) -> PipelineResult<MailProvider> {
        if explicit.is_some() {
            return self.selector.select(explicit).await;
        }
        if let Some(id) = flow_id {
            let flow = self
                .flows
                .get_flow(id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("flow {id}")))?;
            if flow.is_active {
                return self.selector.select(Some(flow.provider_id)).await;
            }
            debug!(flow = %flow.name, "flow inactive, using default provider selection");
        }
        self.selector.select(None).await
    }
}

impl std::fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryService")
            .field("vendors", &self.vendors)
            .finish_non_exhaustive()
    }
}

fn meta_str(metadata: &JsonMap, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Accepts a JSON array of strings or a comma separated string.
fn address_list(metadata: &JsonMap, key: &str) -> Vec<String> {
    let raw: Vec<&str> = match metadata.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => s.split(',').collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn base_entry(job: &MailJob, job_id: Option<JobId>) -> NewMailLog {
    NewMailLog {
        job_id,
        provider_id: job.provider_id,
        template_id: job.template_id,
        flow_id: job.flow_id,
        recipient_email: job.recipient_email.clone(),
        recipient_name: job.recipient_name.clone(),
        cc: address_list(&job.metadata, "cc"),
        bcc: address_list(&job.metadata, "bcc"),
        subject: job.subject.clone().unwrap_or_default(),
        body_preview: String::new(),
        status: LogStatus::Failed,
        provider_message_id: None,
        provider_response: None,
        error: None,
        triggered_by: meta_str(&job.metadata, "triggered_by"),
        is_test: job
            .metadata
            .get("is_test")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        channel: meta_str(&job.metadata, "channel").unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
        metadata: job.metadata.clone(),
    }
}
