use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Error as SqlxError, Row};
use std::time::Duration;
use tracing::{error, info};

use super::store::{DocumentStore, StoreError};
use crate::models::{Collaborator, Document, DEFAULT_TITLE};

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id            TEXT PRIMARY KEY,
        title         TEXT NOT NULL DEFAULT 'Untitled Document',
        content       TEXT NOT NULL DEFAULT '',
        owner         TEXT NULL,
        collaborators JSONB NOT NULL DEFAULT '[]',
        is_public     BOOLEAN NOT NULL DEFAULT FALSE,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_modified TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    CREATE INDEX IF NOT EXISTS documents_last_modified_idx ON documents (last_modified DESC);
"#;

/// Document Row from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: String,
    pub title: String,
    pub content: String,
    pub owner: Option<String>,
    pub collaborators: Json<Vec<Collaborator>>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            title: row.title,
            content: row.content,
            owner: row.owner,
            collaborators: row.collaborators.0,
            is_public: row.is_public,
            created_at: row.created_at,
            last_modified: row.last_modified,
        }
    }
}

/// Postgres-backed document store
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    /// * `max_connections` - Upper bound on pooled connections
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create the documents table if it does not exist yet
    pub async fn init_schema(&self) -> Result<(), SqlxError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        info!("Document schema ready");
        Ok(())
    }

    fn log_pool(&self, action: &str, document_id: &str) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        info!(
            "{} document {}. Pool connections: {} idle, {} in use",
            action,
            document_id,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }

    /// Load a document, inserting a default one first when the id is unknown
    ///
    /// Both statements run in one transaction so concurrent joiners of a
    /// brand new id all observe the same row.
    pub async fn load_or_insert_doc(&self, document_id: &str) -> Result<Document, SqlxError> {
        self.log_pool("Loading", document_id);

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool for document {}: {}. Pool state: {} idle, {} total",
                    document_id,
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                return Err(e);
            }
        };

        let insert_sql = r#"
            INSERT INTO documents (id, title, content)
            VALUES ($1, $2, '')
            ON CONFLICT (id) DO NOTHING;
        "#;
        let inserted = sqlx::query(insert_sql)
            .bind(document_id)
            .bind(DEFAULT_TITLE)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let select_sql = r#"
            SELECT id, title, content, owner, collaborators, is_public, created_at, last_modified
            FROM documents
            WHERE id = $1;
        "#;
        let row = sqlx::query_as::<_, DocumentRow>(select_sql)
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        if inserted > 0 {
            info!("Document {} created with defaults", document_id);
        }
        Ok(row.into())
    }

    /// Overwrite one column of a document and bump its modification time
    async fn overwrite(
        &self,
        document_id: &str,
        column: Column,
        value: &str,
    ) -> Result<Option<DateTime<Utc>>, SqlxError> {
        self.log_pool("Updating", document_id);

        let query_sql = format!(
            r#"
            UPDATE documents
            SET {} = $1,
                last_modified = GREATEST(last_modified, NOW())
            WHERE id = $2
            RETURNING last_modified;
        "#,
            column.as_str()
        );
        let row = sqlx::query(&query_sql)
            .bind(value)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("last_modified")?)),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Column {
    Content,
    Title,
}

impl Column {
    fn as_str(self) -> &'static str {
        match self {
            Column::Content => "content",
            Column::Title => "title",
        }
    }
}

impl DocumentStore for PgDocumentStore {
    fn fetch_or_create<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Document, StoreError>> {
        Box::pin(async move { Ok(self.load_or_insert_doc(id).await?) })
    }

    fn update_content<'a>(
        &'a self,
        id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, Result<DateTime<Utc>, StoreError>> {
        Box::pin(async move {
            self.overwrite(id, Column::Content, content)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        })
    }

    fn update_title<'a>(
        &'a self,
        id: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<DateTime<Utc>, StoreError>> {
        Box::pin(async move {
            self.overwrite(id, Column::Title, title)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        })
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
