// Collector module - fans usage queries out over a bounded worker pool
//
// # Architecture
// - One dispatcher walks every datacenter's records in order and hands each
//   record to the pool as a Task carrying an exclusive `&mut` to that record
// - `pool_size` workers pull tasks from a shared queue, run the CPU and RAM
//   queries, write usage and rating into the record
// - A worker whose query fails posts the error and stops; the dispatcher stops
//   feeding the queue as soon as it sees the first error
//
// Workers and the dispatcher are plain futures joined on the caller's task, so
// tasks can borrow the records directly instead of copying them around.

use futures_util::future::{join, join_all};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::metrics::{MetricsBackend, QueryError, UsageQuery};
use crate::workload::{Datacenter, WorkloadRecord};

/// Smallest pool that can still finish a run after one worker has died
pub const MIN_POOL_SIZE: usize = 2;

/// Errors that end a collection run
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("worker pool of {requested} cannot make progress, need at least {minimum} workers")]
    PoolConfiguration { requested: usize, minimum: usize },

    #[error("usage query for {namespace}/{workload} in {datacenter} failed: {source}")]
    Query {
        datacenter: String,
        namespace: String,
        workload: String,
        #[source]
        source: QueryError,
    },
}

/// Summary of a successful run
#[derive(Debug, Clone, Copy)]
pub struct CollectionStats {
    /// Number of tasks handed to the pool
    pub dispatched: usize,
    pub elapsed: Duration,
}

/// One unit of work: a record to measure and the datacenter it belongs to.
///
/// The record reference is exclusive, so two tasks can never address the same
/// record.
struct Task<'a> {
    /// Dispatch order, counted across all datacenters
    position: usize,
    datacenter: &'a str,
    record: &'a mut WorkloadRecord,
}

/// Populates usage and ratings for every record of a set of datacenters.
///
/// The backend is shared read-only by all workers for the duration of a run.
pub struct UsageCollector<B> {
    backend: B,
    pool_size: usize,
    /// Label name for the datacenter matcher, `None` to leave it out
    datacenter_label: Option<String>,
}

impl<B: MetricsBackend> UsageCollector<B> {
    /// Creates a collector running `pool_size` concurrent workers.
    ///
    /// The pool size is validated when a run starts, see [`UsageCollector::collect`].
    pub fn new(backend: B, pool_size: usize) -> Self {
        UsageCollector {
            backend,
            pool_size,
            datacenter_label: None,
        }
    }

    /// Adds a `<label>="<datacenter>"` matcher to every usage query.
    pub fn with_datacenter_label(mut self, label: Option<String>) -> Self {
        self.datacenter_label = label;
        self
    }

    /// Runs one collection pass over `datacenters`.
    ///
    /// Every record is measured and rated in place. The first query failure
    /// observed ends dispatch and is returned; records measured before it keep
    /// their values, the rest stay unrated.
    ///
    /// # Errors
    /// - `PoolConfiguration` if the pool is smaller than [`MIN_POOL_SIZE`],
    ///   before any query is sent
    /// - `Query` for the first failed usage query
    pub async fn collect(
        &self,
        datacenters: &mut [Datacenter],
    ) -> Result<CollectionStats, CollectError> {
        if self.pool_size < MIN_POOL_SIZE {
            return Err(CollectError::PoolConfiguration {
                requested: self.pool_size,
                minimum: MIN_POOL_SIZE,
            });
        }

        let workloads: usize = datacenters.iter().map(|dc| dc.records.len()).sum();
        let span = info_span!("collection", workers = self.pool_size, workloads);

        async move {
            let (task_tx, task_rx) = mpsc::channel::<Task<'_>>(1);
            // One slot per worker: a failing worker posts once and never blocks.
            let (error_tx, mut error_rx) = mpsc::channel::<CollectError>(self.pool_size);
            let task_rx = Mutex::new(task_rx);

            let workers = join_all(
                (0..self.pool_size).map(|id| self.worker(id, &task_rx, error_tx.clone())),
            );
            drop(error_tx);
            debug!("Generated {} workers", self.pool_size);

            let start = Instant::now();
            info!("Starting processing workloads...");

            let ((dispatched, observed), _) =
                join(dispatch(datacenters, task_tx, &mut error_rx), workers).await;

            let elapsed = start.elapsed();
            info!("Processed {} workloads in {:?}", dispatched, elapsed);

            // A failure on one of the last tasks can land after dispatch ended.
            match observed.or_else(|| error_rx.try_recv().ok()) {
                Some(err) => Err(err),
                None => Ok(CollectionStats {
                    dispatched,
                    elapsed,
                }),
            }
        }
        .instrument(span)
        .await
    }

    /// Pulls tasks until the queue closes or a query fails.
    ///
    /// A failed query ends this worker for the rest of the run; the remaining
    /// workers keep draining the queue.
    async fn worker<'a>(
        &self,
        id: usize,
        tasks: &Mutex<mpsc::Receiver<Task<'a>>>,
        errors: mpsc::Sender<CollectError>,
    ) {
        loop {
            let next = tasks.lock().await.recv().await;
            let Some(task) = next else {
                break;
            };

            if let Err(err) = self.process(id, task).await {
                debug!(worker = id, error = %err, "Worker got an error, stopping");
                // Capacity covers every worker, this never waits.
                let _ = errors.send(err).await;
                return;
            }
        }
        debug!(worker = id, "Task queue closed, worker exiting");
    }

    async fn process(&self, worker: usize, task: Task<'_>) -> Result<(), CollectError> {
        let Task {
            position,
            datacenter,
            record,
        } = task;

        debug!(
            worker,
            position,
            datacenter,
            workload = %record.name,
            "Querying usage"
        );

        let query = UsageQuery {
            datacenter_label: self.datacenter_label.as_deref(),
            datacenter,
            namespace: &record.namespace,
            pod: &record.name,
            instance_id: &record.instance_id,
        };
        let (cpu_query, ram_query) = (query.cpu(), query.ram());

        let failed = |source: QueryError| CollectError::Query {
            datacenter: datacenter.to_string(),
            namespace: record.namespace.clone(),
            workload: record.name.clone(),
            source,
        };
        let cpu = self.backend.query(&cpu_query).await.map_err(&failed)?;
        let ram = self.backend.query(&ram_query).await.map_err(&failed)?;

        record.record_usage(cpu, ram);
        record.apply_rating();

        debug!(
            worker,
            cpu_millicores = record.cpu_usage_millicores,
            ram_mebibytes = record.ram_usage_mebibytes,
            cpu_rating = %record.cpu_rating,
            ram_rating = %record.ram_rating,
            "Workload rated"
        );
        Ok(())
    }
}

/// Feeds one task per record into the queue, datacenter by datacenter.
///
/// Each send races against the error signal; the first error wins, stops
/// dispatch and closes the queue. Returns the number of tasks handed over and
/// the error that stopped dispatch, if any.
async fn dispatch<'a>(
    datacenters: &'a mut [Datacenter],
    tasks: mpsc::Sender<Task<'a>>,
    errors: &mut mpsc::Receiver<CollectError>,
) -> (usize, Option<CollectError>) {
    let mut position = 0;

    'dispatch: for Datacenter { name, records } in datacenters {
        let datacenter: &'a str = name.as_str();

        for record in records.iter_mut() {
            let task = Task {
                position,
                datacenter,
                record,
            };

            tokio::select! {
                biased;

                Some(err) = errors.recv() => {
                    warn!(position, error = %err, "Stopping dispatch after worker error");
                    return (position, Some(err));
                }
                sent = tasks.send(task) => {
                    if sent.is_err() {
                        break 'dispatch;
                    }
                    debug!(position, datacenter, "Task dispatched");
                }
            }
            position += 1;
        }
    }

    debug!("All tasks have been sent, waiting for workers to finish");
    (position, None)
}
