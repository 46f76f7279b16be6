//! Batch Partitioner: turns a flushed buffer into jobs.
//!
//! Entries are grouped by the `service` field of JSON log objects and each
//! group is cut into sub-batches bounded by `max_logs_per_job` and by the
//! model's token budget. Every sub-batch becomes one job, created
//! concurrently; a failed creation is logged and does not affect siblings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use piiscan_ai::{DetectionPrompt, LanguageModel};
use piiscan_core::{CreateJobRequest, JobId};

use super::buffer::{FlushReason, FlushSink};
use crate::jobs::JobService;

/// Group for entries without a usable `service` field.
pub const DEFAULT_SERVICE: &str = "unknown_service";

/// A bounded slice of one service's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBatch {
    pub service: String,
    pub logs: Vec<String>,
}

/// The `service` an entry belongs to.
///
/// Non-JSON entries, non-object JSON, and objects whose `service` is missing,
/// not a string, or blank all fall into [`DEFAULT_SERVICE`].
pub fn service_of(entry: &str) -> String {
    serde_json::from_str::<JsonValue>(entry)
        .ok()
        .as_ref()
        .and_then(|v| v.get("service"))
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SERVICE)
        .to_string()
}

/// Group `entries` by service and cut each group into sub-batches.
///
/// Groups keep first-appearance order; entries keep arrival order within a
/// group. For every emitted sub-batch, `logs.len() <= max_logs` and
/// `exceeds(&logs)` is false, except for a single entry that is over budget
/// on its own: it is emitted alone rather than dropped.
pub fn partition_entries<F>(entries: Vec<String>, max_logs: usize, exceeds: F) -> Vec<SubBatch>
where
    F: Fn(&[String]) -> bool,
{
    let max_logs = max_logs.max(1);

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for entry in entries {
        let service = service_of(&entry);
        groups
            .entry(service.clone())
            .or_insert_with(|| {
                order.push(service);
                Vec::new()
            })
            .push(entry);
    }

    let mut batches = Vec::new();
    for service in order {
        let Some(group) = groups.remove(&service) else {
            continue;
        };

        let mut current: Vec<String> = Vec::new();
        for entry in group {
            current.push(entry);

            if exceeds(&current) {
                if current.len() > 1 {
                    let carried = current.pop();
                    batches.push(SubBatch {
                        service: service.clone(),
                        logs: std::mem::take(&mut current),
                    });
                    current.extend(carried);
                }
                if current.len() == 1 && exceeds(&current) {
                    warn!(service = %service, "log entry alone exceeds the token budget; submitting it by itself");
                    batches.push(SubBatch {
                        service: service.clone(),
                        logs: std::mem::take(&mut current),
                    });
                    continue;
                }
            }

            if current.len() >= max_logs {
                batches.push(SubBatch {
                    service: service.clone(),
                    logs: std::mem::take(&mut current),
                });
            }
        }

        if !current.is_empty() {
            batches.push(SubBatch {
                service: service.clone(),
                logs: current,
            });
        }
    }
    batches
}

/// Outcome of one `execute` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionReport {
    pub created: Vec<JobId>,
    pub failed: usize,
}

/// Flush sink that partitions entries and creates one job per sub-batch.
#[derive(Clone)]
pub struct BatchPartitioner {
    jobs: JobService,
    model: Arc<dyn LanguageModel>,
    max_logs_per_job: usize,
}

impl std::fmt::Debug for BatchPartitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPartitioner")
            .field("max_logs_per_job", &self.max_logs_per_job)
            .finish_non_exhaustive()
    }
}

impl BatchPartitioner {
    pub fn new(jobs: JobService, model: Arc<dyn LanguageModel>, max_logs_per_job: usize) -> Self {
        Self {
            jobs,
            model,
            max_logs_per_job,
        }
    }

    /// Sub-batches for `entries`, judged against the detection prompt each
    /// sub-batch would produce.
    pub fn partition(&self, entries: Vec<String>) -> Vec<SubBatch> {
        partition_entries(entries, self.max_logs_per_job, |logs| {
            self.model
                .exceeds_token_budget(&DetectionPrompt::build(logs))
        })
    }

    /// Partition `entries` and create every sub-batch's job concurrently.
    ///
    /// Never fails: creation errors are logged per sub-batch and counted.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn execute(&self, entries: Vec<String>) -> PartitionReport {
        let mut tasks = JoinSet::new();
        for batch in self.partition(entries) {
            let jobs = self.jobs.clone();
            tasks.spawn(async move {
                let SubBatch { service, logs } = batch;
                let count = logs.len();
                let outcome = jobs
                    .create_job(CreateJobRequest::new(vec![service.clone()], logs))
                    .await;
                (service, count, outcome)
            });
        }

        let mut report = PartitionReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(job))) => report.created.push(job.id),
                Ok((service, count, Err(err))) => {
                    report.failed += 1;
                    error!(service = %service, logs = count, error = %err, "failed to create job for sub-batch");
                }
                Err(err) => {
                    report.failed += 1;
                    error!(error = %err, "sub-batch task panicked or was cancelled");
                }
            }
        }

        info!(
            created = report.created.len(),
            failed = report.failed,
            "partitioned flushed logs into jobs"
        );
        report
    }
}

#[async_trait]
impl FlushSink for BatchPartitioner {
    async fn flush(&self, entries: Vec<String>, reason: FlushReason) {
        info!(reason = %reason, count = entries.len(), "partitioning flushed logs");
        self.execute(entries).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use piiscan_ai::TokenBudget;
    use piiscan_core::{Job, JobStatus};

    use crate::jobs::{InMemoryJobStore, JobRepository, JobTopics};
    use crate::search::InMemorySearchIndex;
    use crate::test_support::{RecordingPubSub, StubModel};

    fn line(service: &str, n: usize) -> String {
        format!(r#"{{"service":"{service}","msg":"request {n}"}}"#)
    }

    fn never(_: &[String]) -> bool {
        false
    }

    #[test]
    fn service_falls_back_to_default_group() {
        assert_eq!(service_of(r#"{"service":"checkout"}"#), "checkout");
        assert_eq!(service_of(r#"{"service":"  "}"#), DEFAULT_SERVICE);
        assert_eq!(service_of(r#"{"service":42}"#), DEFAULT_SERVICE);
        assert_eq!(service_of(r#"{"msg":"no service"}"#), DEFAULT_SERVICE);
        assert_eq!(service_of(r#"["service"]"#), DEFAULT_SERVICE);
        assert_eq!(service_of("GET /health 200"), DEFAULT_SERVICE);
    }

    #[test]
    fn one_hundred_fifty_lines_make_two_jobs() {
        let entries: Vec<String> = (0..150).map(|n| line("checkout", n)).collect();

        let batches = partition_entries(entries.clone(), 100, never);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].logs.len(), 100);
        assert_eq!(batches[1].logs.len(), 50);
        assert!(batches.iter().all(|b| b.service == "checkout"));
        assert_eq!(batches.concat_logs(), entries);
    }

    #[test]
    fn groups_are_not_merged() {
        let entries = vec![
            line("a", 0),
            line("b", 1),
            "plain text".to_string(),
            line("a", 2),
        ];

        let batches = partition_entries(entries, 10, never);

        let shape: Vec<(&str, usize)> = batches
            .iter()
            .map(|b| (b.service.as_str(), b.logs.len()))
            .collect();
        assert_eq!(shape, vec![("a", 2), ("b", 1), (DEFAULT_SERVICE, 1)]);
    }

    #[test]
    fn token_budget_closes_batches_early() {
        let entries: Vec<String> = (0..5).map(|n| format!("entry-{n}")).collect();
        let over_two = |logs: &[String]| logs.len() > 2;

        let batches = partition_entries(entries, 100, over_two);

        let sizes: Vec<usize> = batches.iter().map(|b| b.logs.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn oversized_entry_is_emitted_alone() {
        let entries = vec!["a".to_string(), "x".repeat(50), "b".to_string()];
        let too_long = |logs: &[String]| logs.iter().map(String::len).sum::<usize>() > 10;

        let batches = partition_entries(entries, 100, too_long);

        let logs: Vec<Vec<String>> = batches.into_iter().map(|b| b.logs).collect();
        assert_eq!(
            logs,
            vec![vec!["a".to_string()], vec!["x".repeat(50)], vec!["b".to_string()]]
        );
    }

    trait ConcatLogs {
        fn concat_logs(&self) -> Vec<String>;
    }

    impl ConcatLogs for Vec<SubBatch> {
        fn concat_logs(&self) -> Vec<String> {
            self.iter().flat_map(|b| b.logs.iter().cloned()).collect()
        }
    }

    fn arb_entries() -> impl Strategy<Value = Vec<String>> {
        let entry = (0usize..4, "[a-z ]{0,40}").prop_map(|(service, msg)| match service {
            0 => msg,
            n => format!(r#"{{"service":"svc-{n}","msg":"{msg}"}}"#),
        });
        prop::collection::vec(entry, 0..200)
    }

    proptest! {
        #[test]
        fn every_batch_is_bounded(entries in arb_entries(), max in 1usize..20, budget in 40usize..400) {
            let exceeds = |logs: &[String]| logs.iter().map(String::len).sum::<usize>() > budget;
            for batch in partition_entries(entries, max, &exceeds) {
                prop_assert!(!batch.logs.is_empty());
                prop_assert!(batch.logs.len() <= max);
                prop_assert!(batch.logs.len() == 1 || !exceeds(&batch.logs));
            }
        }

        #[test]
        fn every_entry_lands_once_in_order(entries in arb_entries(), max in 1usize..20, budget in 40usize..400) {
            let exceeds = |logs: &[String]| logs.iter().map(String::len).sum::<usize>() > budget;
            let batches = partition_entries(entries.clone(), max, &exceeds);

            prop_assert_eq!(batches.iter().map(|b| b.logs.len()).sum::<usize>(), entries.len());

            let mut services: Vec<String> = entries.iter().map(|e| service_of(e)).collect();
            services.dedup();
            for service in services {
                let expected: Vec<&String> = entries.iter().filter(|e| service_of(e) == service).collect();
                let emitted: Vec<&String> = batches
                    .iter()
                    .filter(|b| b.service == service)
                    .flat_map(|b| b.logs.iter())
                    .collect();
                prop_assert_eq!(emitted, expected);
            }
        }
    }

    fn partitioner(
        repository_max_logs: usize,
        partition_max_logs: usize,
    ) -> (BatchPartitioner, Arc<InMemoryJobStore>, Arc<RecordingPubSub>) {
        let store = InMemoryJobStore::arc();
        let bus = Arc::new(RecordingPubSub::new());
        let repository = JobRepository::new(
            store.clone(),
            Arc::new(InMemorySearchIndex::new()),
            repository_max_logs,
        );
        let jobs = JobService::new(repository, bus.clone(), JobTopics::default());
        let model = Arc::new(StubModel::answering(vec![]).with_budget(TokenBudget::new(100_000)));
        (
            BatchPartitioner::new(jobs, model, partition_max_logs),
            store,
            bus,
        )
    }

    #[tokio::test]
    async fn execute_creates_one_tagged_job_per_sub_batch() {
        let (partitioner, store, bus) = partitioner(100, 100);
        let entries: Vec<String> = (0..150).map(|n| line("checkout", n)).collect();

        let report = partitioner.execute(entries).await;

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.failed, 0);
        let jobs = store.all();
        assert!(jobs.iter().all(|j| j.tags == vec!["checkout"]));
        assert!(jobs.iter().all(|j| j.status() == JobStatus::Processing));
        let mut sizes: Vec<usize> = jobs.iter().map(|j| j.logs.len()).collect();
        sizes.sort();
        assert_eq!(sizes, vec![50, 100]);

        let published: Vec<Job> = bus.payloads(&JobTopics::default().job_created);
        assert_eq!(published.len(), 2);
    }

    #[tokio::test]
    async fn one_failed_sub_batch_does_not_stop_siblings() {
        // The repository accepts one log per job, so the two-entry group fails.
        let (partitioner, store, _) = partitioner(1, 10);
        let entries = vec![line("a", 0), line("a", 1), line("b", 2)];

        let report = partitioner.execute(entries).await;

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.all()[0].tags, vec!["b"]);
    }

    #[test]
    fn partition_uses_the_model_budget() {
        let (mut partitioner, _, _) = partitioner(100, 100);
        partitioner.model = Arc::new(StubModel::answering(vec![]).with_budget(TokenBudget::new(1)));
        let entries = vec![line("a", 0), line("a", 1)];

        let batches = partitioner.partition(entries);

        assert_eq!(batches.len(), 2);
    }
}
