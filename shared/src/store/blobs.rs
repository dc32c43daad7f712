//! GridFS-backed blob storage for samples, transcripts, captures, and
//! reports. Every blob is addressed by the ObjectId recorded on the job.

use std::path::Path;

use bson::oid::ObjectId;
use futures::io::{AsyncReadExt, AsyncWriteExt};
use mongodb::gridfs::GridFsBucket;
use mongodb::Client;
use tokio::io::AsyncReadExt as TokioAsyncReadExt;
use tokio::io::AsyncWriteExt as TokioAsyncWriteExt;

use crate::types::CoreError;
use crate::Result;

const CHUNK: usize = 64 * 1024;

#[derive(Clone)]
pub struct BlobStore {
    bucket: GridFsBucket,
}

impl BlobStore {
    pub fn new(client: &Client, db_name: &str) -> Self {
        Self {
            bucket: client.database(db_name).gridfs_bucket(None),
        }
    }

    pub async fn put_bytes(&self, name: &str, data: &[u8]) -> Result<ObjectId> {
        let mut stream = self.bucket.open_upload_stream(name, None);
        let id = stream
            .id()
            .as_object_id()
            .ok_or_else(|| CoreError::Blob("upload stream id is not an ObjectId".to_string()))?;
        stream.write_all(data).await?;
        stream.close().await?;
        Ok(id)
    }

    pub async fn put_string(&self, name: &str, text: &str) -> Result<ObjectId> {
        self.put_bytes(name, text.as_bytes()).await
    }

    /// Uploads a file from disk in chunks, so captures larger than memory
    /// never get buffered whole.
    pub async fn put_file(&self, name: &str, path: &Path) -> Result<ObjectId> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut stream = self.bucket.open_upload_stream(name, None);
        let id = stream
            .id()
            .as_object_id()
            .ok_or_else(|| CoreError::Blob("upload stream id is not an ObjectId".to_string()))?;

        let mut chunk = vec![0u8; CHUNK];
        loop {
            let read = file.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            stream.write_all(&chunk[..read]).await?;
        }
        stream.close().await?;
        Ok(id)
    }

    pub async fn get(&self, id: ObjectId) -> Result<Vec<u8>> {
        let mut stream = self.bucket.open_download_stream(id.into()).await?;
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        Ok(data)
    }

    pub async fn download_to_file(&self, id: ObjectId, path: &Path) -> Result<()> {
        let mut stream = self.bucket.open_download_stream(id.into()).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut chunk = vec![0u8; CHUNK];
        loop {
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            file.write_all(&chunk[..read]).await?;
        }
        file.flush().await?;
        Ok(())
    }

    pub async fn drop_all(&self) -> Result<()> {
        self.bucket.drop().await?;
        Ok(())
    }
}
