//! Long-lived read-only PostgreSQL connection.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{debug, info, warn};

use etl_types::PostgresSettings;

use crate::error::PipelineError;
use crate::retry::BackoffPolicy;

/// Owns one connection and replaces it whenever a query fails.
pub struct PgExecutor {
    config: Config,
    client: Mutex<Option<Client>>,
    policy: BackoffPolicy,
}

impl PgExecutor {
    pub fn new(settings: &PostgresSettings, policy: BackoffPolicy) -> Self {
        let password = SecretString::from(settings.password.clone());

        let mut config = Config::new();
        config
            .host(&settings.host)
            .port(settings.port)
            .dbname(&settings.dbname)
            .user(&settings.user)
            .application_name("movies-etl")
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs));
        if !password.expose_secret().is_empty() {
            config.password(password.expose_secret());
        }

        Self {
            config,
            client: Mutex::new(None),
            policy,
        }
    }

    /// Establish the connection, waiting for the database as long as it takes.
    pub async fn connect(&self) {
        self.policy.retry("postgres connect", || self.open()).await;
        info!(
            dbname = ?self.config.get_dbname(),
            "Connected to source database"
        );
    }

    async fn open(&self) -> Result<(), PipelineError> {
        let mut slot = self.client.lock().await;
        // Drop the broken client first so its connection task winds down
        slot.take();

        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "Source database connection closed");
            }
        });
        client
            .batch_execute("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
            .await?;

        *slot = Some(client);
        debug!("Source database session opened (read only)");
        Ok(())
    }

    async fn try_query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, PipelineError> {
        let slot = self.client.lock().await;
        let client = slot
            .as_ref()
            .ok_or_else(|| PipelineError::Query("not connected".to_string()))?;
        Ok(client.query(sql, params).await?)
    }

    /// Run a parameterized query.
    ///
    /// Any failure drops the connection, reconnects with backoff and runs
    /// the query again, so this only returns once the query has succeeded.
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Vec<Row> {
        self.policy
            .retry_reconnect(
                "postgres query",
                || self.try_query(sql, params),
                || self.open(),
            )
            .await
    }
}
