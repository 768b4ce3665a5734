//! Asynchronous batch embedding management.
//!
//! Chunks ingested in async mode wait with `embedding_status = pending`
//! and their vector text stashed in `metadata._vector_source`. The batch
//! manager groups them into jobs, submits them to the remote batch API,
//! and writes vectors back in bulk when a job completes. It is driven by
//! explicit `flush_queue` / `sync_status` calls only.

use crate::embedding::{
    parse_custom_id, BatchEmbeddingClient, BatchRequestLine, RemoteBatchStatus,
};
use crate::error::{Result, VitenError};
use crate::store::{BatchJob, SqliteStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Queues chunks awaiting embedding and reconciles remote batch jobs.
pub struct BatchManager {
    store: Arc<SqliteStore>,
    client: Arc<dyn BatchEmbeddingClient>,
    model: String,
}

impl BatchManager {
    pub fn new(store: Arc<SqliteStore>, client: Arc<dyn BatchEmbeddingClient>, model: &str) -> Self {
        Self {
            store,
            client,
            model: model.to_string(),
        }
    }

    /// Associate chunks with a new pending job.
    pub fn enqueue(&self, chunk_ids: &[i64]) -> Result<BatchJob> {
        let job = self.store.create_batch_job(chunk_ids.len() as i64)?;
        self.store.assign_chunks_to_job(job.id, chunk_ids)?;
        debug!("Enqueued {} chunks as batch job {}", chunk_ids.len(), job.id);
        Ok(job)
    }

    /// Submit a pending job's chunks to the remote batch API.
    pub async fn submit_job(&self, job_id: i64) -> Result<()> {
        let chunks = self.store.chunks_for_job(job_id)?;
        if chunks.is_empty() {
            return Err(VitenError::Batch(format!(
                "batch job {} has no chunks to submit",
                job_id
            )));
        }

        let lines: Vec<BatchRequestLine> = chunks
            .iter()
            .filter_map(|chunk| {
                let id = chunk.id?;
                let vector_source = chunk
                    .meta_str("_vector_source")
                    .unwrap_or(chunk.content.as_str());
                Some(BatchRequestLine::for_chunk(id, &self.model, vector_source))
            })
            .collect();

        let remote_job_id = self.client.submit(&lines).await?;
        self.store.set_batch_job_running(job_id, &remote_job_id)?;
        info!(
            "Batch job {} running as remote job {} ({} chunks)",
            job_id,
            remote_job_id,
            lines.len()
        );
        Ok(())
    }

    /// Collect unassigned pending chunks into one submitted job.
    ///
    /// Returns None without side effects when fewer than `min_size` chunks
    /// are waiting and `force` is not set, or when nothing waits at all.
    #[instrument(skip(self))]
    pub async fn flush_queue(&self, min_size: usize, force: bool) -> Result<Option<i64>> {
        let pending = self.store.pending_unassigned_chunks()?;
        if pending.is_empty() {
            return Ok(None);
        }
        if pending.len() < min_size && !force {
            debug!(
                "Holding back batch: {} pending < min_size {}",
                pending.len(),
                min_size
            );
            return Ok(None);
        }

        let chunk_ids: Vec<i64> = pending.iter().filter_map(|c| c.id).collect();
        let job = self.enqueue(&chunk_ids)?;
        self.submit_job(job.id).await?;
        Ok(Some(job.id))
    }

    /// Poll every running job and apply completed results.
    ///
    /// Completed jobs commit their vectors in one transaction; chunks the
    /// remote response did not cover stay pending and become eligible for
    /// re-enqueue. Failed jobs mark their chunks failed.
    #[instrument(skip(self))]
    pub async fn sync_status(&self) -> Result<Vec<BatchJob>> {
        let mut updated = Vec::new();

        for job in self.store.running_batch_jobs()? {
            let Some(remote_job_id) = job.remote_job_id.clone() else {
                warn!("Running batch job {} has no remote id", job.id);
                continue;
            };

            match self.client.status(&remote_job_id).await? {
                RemoteBatchStatus::Completed => {
                    self.apply_results(&job, &remote_job_id).await?;
                    if let Some(job) = self.store.get_batch_job(job.id)? {
                        updated.push(job);
                    }
                }
                RemoteBatchStatus::Failed(error) => {
                    self.store.fail_batch_job(job.id, &error)?;
                    if let Some(job) = self.store.get_batch_job(job.id)? {
                        updated.push(job);
                    }
                }
                RemoteBatchStatus::Pending | RemoteBatchStatus::Running => {
                    debug!("Batch job {} still in flight", job.id);
                }
            }
        }

        Ok(updated)
    }

    async fn apply_results(&self, job: &BatchJob, remote_job_id: &str) -> Result<()> {
        let results = self.client.results(remote_job_id).await?;
        let mut by_chunk: HashMap<i64, Vec<f32>> = HashMap::new();
        for line in results {
            if let (Some(chunk_id), Some(embedding)) =
                (parse_custom_id(&line.custom_id), line.embedding)
            {
                by_chunk.insert(chunk_id, embedding);
            }
        }

        let assigned = self.store.chunks_for_job(job.id)?;
        let mut updates: Vec<(i64, Vec<f32>)> = Vec::new();
        let mut missing: Vec<i64> = Vec::new();
        for chunk in &assigned {
            let Some(id) = chunk.id else { continue };
            match by_chunk.remove(&id) {
                Some(embedding) => updates.push((id, embedding)),
                None => missing.push(id),
            }
        }

        if !missing.is_empty() {
            // Partial results are not a job failure: the uncovered chunks
            // go back to the queue.
            warn!(
                "Batch job {} returned {} of {} chunks; releasing the rest for re-enqueue",
                job.id,
                updates.len(),
                assigned.len()
            );
            self.store.release_chunks_from_job(&missing)?;
        }

        self.store.bulk_update_vectors(&updates)?;
        self.store.complete_batch_job(job.id)?;
        info!("Batch job {} completed with {} vectors", job.id, updates.len());
        Ok(())
    }
}
