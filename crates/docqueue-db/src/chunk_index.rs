//! Chunk index stored in Postgres.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use docqueue_core::{ChunkIndex, Error, IndexedChunk, Result};

/// PostgreSQL implementation of ChunkIndex.
///
/// Chunks are keyed by `(job_id, chunk_index)`, so upserting the same chunks
/// twice leaves one copy.
pub struct PgChunkIndex {
    pool: Pool<Postgres>,
}

impl PgChunkIndex {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Number of chunks stored for a job.
    pub async fn count_for_job(&self, job_id: Uuid) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM document_chunk WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count.0)
    }
}

fn offset(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::Index(format!("offset {value} exceeds column range")))
}

#[async_trait]
impl ChunkIndex for PgChunkIndex {
    async fn upsert(&self, job_id: Uuid, chunks: &[IndexedChunk]) -> Result<()> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for indexed in chunks {
            let chunk = &indexed.chunk;
            sqlx::query(
                "INSERT INTO document_chunk
                     (job_id, chunk_index, content, start_offset, end_offset, page_numbers, embedding)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (job_id, chunk_index) DO UPDATE
                 SET content = EXCLUDED.content,
                     start_offset = EXCLUDED.start_offset,
                     end_offset = EXCLUDED.end_offset,
                     page_numbers = EXCLUDED.page_numbers,
                     embedding = EXCLUDED.embedding",
            )
            .bind(job_id)
            .bind(chunk.index)
            .bind(&chunk.text)
            .bind(offset(chunk.start_offset)?)
            .bind(offset(chunk.end_offset)?)
            .bind(&chunk.page_numbers)
            .bind(&indexed.vector)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "chunk_index",
            op = "upsert",
            job_id = %job_id,
            chunk_count = chunks.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Indexed chunks"
        );
        Ok(())
    }

    async fn delete_by_job(&self, job_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunk WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_conversion() {
        assert_eq!(offset(42).unwrap(), 42);
        assert!(matches!(offset(usize::MAX), Err(Error::Index(_))));
    }
}
