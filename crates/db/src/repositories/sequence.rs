use async_trait::async_trait;

use signoff_core::domain::approval::RequestId;

use super::{IdSequencer, RepositoryError};
use crate::DbPool;

pub const APPROVAL_REQUEST_SEQUENCE: &str = "approval_request_id";

/// Counter row in `id_sequence`. Each call is a single upsert statement, so
/// SQLite's write lock makes the increment atomic across connections and
/// processes sharing the database file.
pub struct SqlIdSequencer {
    pool: DbPool,
    name: String,
}

impl SqlIdSequencer {
    pub fn new(pool: DbPool) -> Self {
        Self::named(pool, APPROVAL_REQUEST_SEQUENCE)
    }

    pub fn named(pool: DbPool, name: impl Into<String>) -> Self {
        Self { pool, name: name.into() }
    }
}

#[async_trait]
impl IdSequencer for SqlIdSequencer {
    async fn next_request_id(&self) -> Result<RequestId, RepositoryError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO id_sequence (name, value) VALUES (?, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await?;

        Ok(RequestId(value))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use signoff_core::domain::approval::RequestId;

    use super::SqlIdSequencer;
    use crate::repositories::IdSequencer;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn first_value_is_one_and_values_increase() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let sequencer = SqlIdSequencer::new(pool);

        assert_eq!(sequencer.next_request_id().await.expect("first"), RequestId(1));
        assert_eq!(sequencer.next_request_id().await.expect("second"), RequestId(2));
    }

    #[tokio::test]
    async fn named_sequences_are_independent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let requests = SqlIdSequencer::new(pool.clone());
        let other = SqlIdSequencer::named(pool, "other");

        requests.next_request_id().await.expect("advance");
        requests.next_request_id().await.expect("advance");
        assert_eq!(other.next_request_id().await.expect("other"), RequestId(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_receive_distinct_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("sequence.db").display());
        let pool = connect_with_settings(&url, 4, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let sequencer = Arc::new(SqlIdSequencer::new(pool));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sequencer = Arc::clone(&sequencer);
            handles.push(tokio::spawn(async move {
                let mut values = Vec::new();
                for _ in 0..10 {
                    values.push(sequencer.next_request_id().await.expect("next id").0);
                }
                values
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let values = handle.await.expect("join");
            assert!(values.windows(2).all(|pair| pair[0] < pair[1]), "per-task order");
            all.extend(values);
        }

        let distinct: BTreeSet<i64> = all.iter().copied().collect();
        assert_eq!(distinct.len(), 80);
        assert_eq!(distinct.first(), Some(&1));
        assert_eq!(distinct.last(), Some(&80));
    }
}
