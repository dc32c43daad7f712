//! Sample submission: upload the file, create the job record.

use std::path::Path;

use tracing::info;

use shared::hash;
use shared::store::Store;
use shared::types::Job;
use shared::{CoreError, Result};

pub async fn submit(
    store: &Store,
    path: &Path,
    timeout: u64,
    tags: Option<String>,
) -> Result<Job> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CoreError::NotFound(format!("no file name in {}", path.display())))?
        .to_string();

    let sha256 = hash::sha256_file(path).await?;
    let sample_id = store.blobs().put_file(&file_name, path).await?;

    let job = Job::new(sample_id, file_name, sha256, timeout, tags);
    store.insert_job(&job).await?;

    info!(job = %job.id, file = %job.file_name, sha256 = %job.sha256, "job submitted");
    Ok(job)
}
