//! Drive ProxySQL admin tables toward a desired row set
//!
//! Upserts are per row: a row that fails is reported and the rest of the
//! batch still runs. Nothing is pruned implicitly; rows the operator no
//! longer wants are removed by key.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::admin::{AdminConnector, AdminSession};
use super::tables::{AdminRow, AdminTable, MysqlServer, MysqlUser, ProxySqlServer};
use crate::deadline::{is_context_error, OpContext};
use crate::error::{Error, Result};
use crate::mysql::Dsn;
use crate::sql::SqlValue;

/// What one upsert call did
#[derive(Debug, Default)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
    /// `Error::AdminSyncFailed`, one per failed row
    pub failures: Vec<Error>,
}

impl UpsertReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: UpsertReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.failures.extend(other.failures);
    }
}

enum RowOutcome {
    Inserted,
    Updated,
}

/// Synchronizer bound to one ProxySQL admin endpoint
pub struct ProxySynchronizer {
    connector: Arc<dyn AdminConnector>,
    admin: Dsn,
}

impl ProxySynchronizer {
    pub fn new(connector: Arc<dyn AdminConnector>, admin: Dsn) -> Self {
        Self { connector, admin }
    }

    pub fn admin(&self) -> &Dsn {
        &self.admin
    }

    async fn session(&self, ctx: &OpContext) -> Result<Box<dyn AdminSession>> {
        ctx.run_on(&self.admin.host, self.connector.connect(&self.admin))
            .await
    }

    /// Every row of `R`'s table
    pub async fn list<R: AdminRow>(&self, ctx: &OpContext) -> Result<Vec<R>> {
        ctx.check()?;
        let mut session = self.session(ctx).await?;
        let records = ctx
            .run_on(&self.admin.host, session.select_all(R::TABLE, R::COLUMNS))
            .await?;
        records.iter().map(R::from_record).collect()
    }

    pub async fn list_servers(&self, ctx: &OpContext) -> Result<Vec<MysqlServer>> {
        self.list(ctx).await
    }

    pub async fn list_peers(&self, ctx: &OpContext) -> Result<Vec<ProxySqlServer>> {
        self.list(ctx).await
    }

    pub async fn list_users(&self, ctx: &OpContext) -> Result<Vec<MysqlUser>> {
        self.list(ctx).await
    }

    /// Insert rows missing by natural key and update the rest in place.
    ///
    /// Fails as a whole only when the admin endpoint cannot be reached or
    /// the context runs out; row-level failures land in the report.
    #[instrument(skip(self, ctx, desired), fields(admin = %self.admin.host, table = R::TABLE.name(), rows = desired.len()))]
    pub async fn upsert<R: AdminRow>(&self, ctx: &OpContext, desired: &[R]) -> Result<UpsertReport> {
        ctx.check()?;
        let mut session = self.session(ctx).await?;
        let mut report = UpsertReport::default();

        for row in desired {
            match ctx
                .run_on(&self.admin.host, upsert_row(session.as_mut(), row))
                .await
            {
                Ok(RowOutcome::Inserted) => report.inserted += 1,
                Ok(RowOutcome::Updated) => report.updated += 1,
                // A timed-out session may be mid-statement; stop using it.
                Err(e) if is_context_error(&e) || matches!(e, Error::NodeTimeout { .. }) => return Err(e),
                Err(e) => {
                    warn!("Failed to sync {} row {}: {}", R::TABLE, row.key_label(), e);
                    report.failures.push(Error::AdminSyncFailed {
                        table: R::TABLE.name().to_string(),
                        key: row.key_label(),
                        source: Box::new(e),
                    });
                }
            }
        }

        debug!(
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failures.len(),
            "Upsert finished"
        );
        Ok(report)
    }

    pub async fn upsert_servers(&self, ctx: &OpContext, desired: &[MysqlServer]) -> Result<UpsertReport> {
        self.upsert(ctx, desired).await
    }

    pub async fn upsert_peers(&self, ctx: &OpContext, desired: &[ProxySqlServer]) -> Result<UpsertReport> {
        self.upsert(ctx, desired).await
    }

    pub async fn upsert_users(&self, ctx: &OpContext, desired: &[MysqlUser]) -> Result<UpsertReport> {
        self.upsert(ctx, desired).await
    }

    async fn remove(&self, ctx: &OpContext, table: AdminTable, key: Vec<(&'static str, SqlValue)>) -> Result<u64> {
        ctx.check()?;
        let mut session = self.session(ctx).await?;
        let removed = ctx
            .run_on(&self.admin.host, session.delete(table, &key))
            .await?;
        info!("Removed {} row(s) from {} on {}", removed, table, self.admin.host);
        Ok(removed)
    }

    /// Delete the backend `hostname` from every hostgroup
    pub async fn remove_server(&self, ctx: &OpContext, hostname: &str) -> Result<u64> {
        self.remove(ctx, AdminTable::MysqlServers, vec![("hostname", hostname.into())])
            .await
    }

    pub async fn remove_peer(&self, ctx: &OpContext, hostname: &str) -> Result<u64> {
        self.remove(ctx, AdminTable::ProxySqlServers, vec![("hostname", hostname.into())])
            .await
    }

    pub async fn remove_user(&self, ctx: &OpContext, username: &str, frontend: bool) -> Result<u64> {
        self.remove(
            ctx,
            AdminTable::MysqlUsers,
            vec![("username", username.into()), ("frontend", frontend.into())],
        )
        .await
    }

    /// Activate and persist what is in `table`'s memory layer
    pub async fn load_to_runtime(&self, ctx: &OpContext, table: AdminTable) -> Result<()> {
        ctx.check()?;
        let mut session = self.session(ctx).await?;
        ctx.run_on(&self.admin.host, session.load_to_runtime(table))
            .await?;
        debug!("Loaded {} to runtime on {}", table.module(), self.admin.host);
        Ok(())
    }
}

async fn upsert_row<R: AdminRow>(session: &mut dyn AdminSession, row: &R) -> Result<RowOutcome> {
    let key = row.key();
    if session.count(R::TABLE, &key).await? > 0 {
        session.update(R::TABLE, &row.assignments(), &key).await?;
        Ok(RowOutcome::Updated)
    } else {
        session.insert(R::TABLE, &row.columns()).await?;
        Ok(RowOutcome::Inserted)
    }
}
