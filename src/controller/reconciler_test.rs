//! Tests for the reconciler's proxy sync pass

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::super::reconciler::{sync_proxies, ProxyPlan};
    use super::super::topology::{member_host, proxy_host};
    use crate::deadline::OpContext;
    use crate::error::{Error, Result};
    use crate::mysql::Dsn;
    use crate::proxysql::admin::Assignments;
    use crate::proxysql::{
        AdminConnector, AdminRow, AdminSession, AdminTable, MysqlServer, MysqlUser, ProxySqlServer, Record,
    };
    use crate::sql::SqlValue;

    type Tables = HashMap<AdminTable, Vec<Record>>;

    /// One admin store per proxy host
    #[derive(Clone, Default)]
    struct FakeProxies {
        stores: Arc<Mutex<HashMap<String, Tables>>>,
        loads: Arc<Mutex<Vec<(String, AdminTable)>>>,
        down: HashSet<String>,
        /// Accept the connection but never answer
        hung: HashSet<String>,
        /// Rows with this hostname fail to write
        rejected_host: Option<String>,
    }

    impl FakeProxies {
        fn hostnames(&self, proxy: &str, table: AdminTable) -> Vec<String> {
            let stores = self.stores.lock().unwrap();
            let mut hosts: Vec<String> = stores
                .get(proxy)
                .and_then(|t| t.get(&table))
                .map(|rows| {
                    rows.iter()
                        .filter_map(|r| r.get("hostname").and_then(|v| v.as_text()).map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            hosts.sort();
            hosts
        }

        fn seed(&self, proxy: &str, table: AdminTable, record: Record) {
            self.stores
                .lock()
                .unwrap()
                .entry(proxy.to_string())
                .or_default()
                .entry(table)
                .or_default()
                .push(record);
        }
    }

    struct FakeSession {
        proxy: String,
        fakes: FakeProxies,
    }

    impl FakeSession {
        fn with_rows<T>(&self, table: AdminTable, f: impl FnOnce(&mut Vec<Record>) -> T) -> T {
            let mut stores = self.fakes.stores.lock().unwrap();
            f(stores
                .entry(self.proxy.clone())
                .or_default()
                .entry(table)
                .or_default())
        }

        fn reject(&self, values: &Assignments) -> Result<()> {
            let Some(rejected_host) = self.fakes.rejected_host.as_deref() else {
                return Ok(());
            };
            let rejected = values
                .iter()
                .any(|(c, v)| *c == "hostname" && v.as_text() == Some(rejected_host));
            if rejected {
                Err(Error::query(&self.proxy, sqlx::Error::Protocol("rejected".to_string())))
            } else {
                Ok(())
            }
        }
    }

    fn matches(record: &Record, key: &Assignments) -> bool {
        key.iter().all(|(c, v)| record.get(*c) == Some(v))
    }

    #[async_trait]
    impl AdminConnector for FakeProxies {
        async fn connect(&self, dsn: &Dsn) -> Result<Box<dyn AdminSession>> {
            if self.down.contains(&dsn.host) {
                return Err(Error::ConnectFailed {
                    host: dsn.host.clone(),
                    source: sqlx::Error::Protocol("connection refused".to_string()),
                });
            }
            if self.hung.contains(&dsn.host) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(Box::new(FakeSession {
                proxy: dsn.host.clone(),
                fakes: self.clone(),
            }))
        }
    }

    #[async_trait]
    impl AdminSession for FakeSession {
        async fn select_all(&mut self, table: AdminTable, columns: &[&'static str]) -> Result<Vec<Record>> {
            Ok(self.with_rows(table, |rows| {
                rows.iter()
                    .map(|row| {
                        columns
                            .iter()
                            .map(|c| {
                                let value = match row.get(*c) {
                                    Some(SqlValue::Int(i)) => SqlValue::Text(i.to_string()),
                                    Some(other) => other.clone(),
                                    None => SqlValue::Null,
                                };
                                (c.to_string(), value)
                            })
                            .collect()
                    })
                    .collect()
            }))
        }

        async fn count(&mut self, table: AdminTable, key: &Assignments) -> Result<i64> {
            Ok(self.with_rows(table, |rows| rows.iter().filter(|r| matches(r, key)).count() as i64))
        }

        async fn insert(&mut self, table: AdminTable, columns: &Assignments) -> Result<()> {
            self.reject(columns)?;
            let record: Record = columns.iter().map(|(c, v)| (c.to_string(), v.clone())).collect();
            self.with_rows(table, |rows| rows.push(record));
            Ok(())
        }

        async fn update(&mut self, table: AdminTable, set: &Assignments, key: &Assignments) -> Result<u64> {
            self.reject(key)?;
            Ok(self.with_rows(table, |rows| {
                let mut n = 0;
                for row in rows.iter_mut().filter(|r| matches(r, key)) {
                    for (c, v) in set {
                        row.insert(c.to_string(), v.clone());
                    }
                    n += 1;
                }
                n
            }))
        }

        async fn delete(&mut self, table: AdminTable, key: &Assignments) -> Result<u64> {
            Ok(self.with_rows(table, |rows| {
                let before = rows.len();
                rows.retain(|r| !matches(r, key));
                (before - rows.len()) as u64
            }))
        }

        async fn load_to_runtime(&mut self, table: AdminTable) -> Result<()> {
            self.fakes.loads.lock().unwrap().push((self.proxy.clone(), table));
            Ok(())
        }
    }

    fn proxies(count: i32) -> Vec<Dsn> {
        (0..count)
            .map(|i| Dsn::new(proxy_host("db", "prod", i), 6032, "admin", "admin"))
            .collect()
    }

    fn plan(members: i32, proxies: &[Dsn]) -> ProxyPlan {
        ProxyPlan {
            servers: (0..members)
                .map(|i| MysqlServer::new(if i == 0 { 10 } else { 20 }, member_host("db", "prod", i), 3306))
                .collect(),
            peers: proxies
                .iter()
                .map(|p| ProxySqlServer::new(p.host.as_str(), p.port))
                .collect(),
            users: vec![MysqlUser::new("root", "pw", 10)],
            retired_servers: Vec::new(),
        }
    }

    fn server_record(hostname: &str) -> Record {
        MysqlServer::new(20, hostname, 3306)
            .columns()
            .into_iter()
            .map(|(c, v)| (c.to_string(), v))
            .collect()
    }

    fn ctx() -> OpContext {
        OpContext::with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_every_proxy_receives_topology() {
        let fakes = FakeProxies::default();
        let connector: Arc<dyn AdminConnector> = Arc::new(fakes.clone());
        let proxies = proxies(2);

        let failures = sync_proxies(&connector, &proxies, &plan(3, &proxies), &ctx())
            .await
            .unwrap();
        assert!(failures.is_empty());

        for proxy in &proxies {
            assert_eq!(fakes.hostnames(&proxy.host, AdminTable::MysqlServers).len(), 3);
            assert_eq!(fakes.hostnames(&proxy.host, AdminTable::ProxySqlServers).len(), 2);
        }
        let loads = fakes.loads.lock().unwrap();
        assert_eq!(loads.len(), 6);
        assert!(loads.contains(&(proxies[1].host.clone(), AdminTable::MysqlUsers)));
    }

    #[tokio::test]
    async fn test_scale_down_removes_only_retired_members() {
        let fakes = FakeProxies::default();
        let connector: Arc<dyn AdminConnector> = Arc::new(fakes.clone());
        let proxies = proxies(1);
        // Rows the operator did not write, one of them under the member domain.
        let manual = member_host("db", "prod", 7);
        fakes.seed(&proxies[0].host, AdminTable::MysqlServers, server_record(&manual));
        fakes.seed(&proxies[0].host, AdminTable::MysqlServers, server_record("legacy.example.com"));

        sync_proxies(&connector, &proxies, &plan(3, &proxies), &ctx())
            .await
            .unwrap();

        let mut shrunk = plan(2, &proxies);
        shrunk.retired_servers = vec![member_host("db", "prod", 2)];
        let failures = sync_proxies(&connector, &proxies, &shrunk, &ctx()).await.unwrap();
        assert!(failures.is_empty());

        let mut expected = vec![
            member_host("db", "prod", 0),
            member_host("db", "prod", 1),
            manual,
            "legacy.example.com".to_string(),
        ];
        expected.sort();
        assert_eq!(fakes.hostnames(&proxies[0].host, AdminTable::MysqlServers), expected);
    }

    #[tokio::test]
    async fn test_undesired_rows_are_left_alone() {
        let fakes = FakeProxies::default();
        let connector: Arc<dyn AdminConnector> = Arc::new(fakes.clone());
        let proxies = proxies(2);

        sync_proxies(&connector, &proxies, &plan(3, &proxies), &ctx())
            .await
            .unwrap();
        // Fewer desired rows, nothing named for removal.
        sync_proxies(&connector, &proxies[..1], &plan(1, &proxies[..1]), &ctx())
            .await
            .unwrap();

        assert_eq!(fakes.hostnames(&proxies[0].host, AdminTable::MysqlServers).len(), 3);
        assert_eq!(fakes.hostnames(&proxies[0].host, AdminTable::ProxySqlServers).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_proxy_times_out_without_spending_deadline() {
        let proxies = proxies(2);
        let fakes = FakeProxies {
            hung: [proxies[1].host.clone()].into_iter().collect(),
            ..Default::default()
        };
        let connector: Arc<dyn AdminConnector> = Arc::new(fakes.clone());
        let ctx = OpContext::with_timeout(Duration::from_secs(60)).with_node_timeout(Duration::from_secs(2));

        let err = sync_proxies(&connector, &proxies, &plan(3, &proxies), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeTimeout { ref host, .. } if *host == proxies[1].host));
        assert!(ctx.check().is_ok());
        // The reachable proxy was fully synced before the hung one.
        assert_eq!(fakes.hostnames(&proxies[0].host, AdminTable::MysqlServers).len(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_proxy_aborts() {
        let proxies = proxies(2);
        let fakes = FakeProxies {
            down: [proxies[1].host.clone()].into_iter().collect(),
            ..Default::default()
        };
        let connector: Arc<dyn AdminConnector> = Arc::new(fakes.clone());

        let err = sync_proxies(&connector, &proxies, &plan(3, &proxies), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { ref host, .. } if *host == proxies[1].host));
    }

    #[tokio::test]
    async fn test_row_failures_are_reported_per_proxy() {
        let proxies = proxies(2);
        let fakes = FakeProxies {
            rejected_host: Some(member_host("db", "prod", 2)),
            ..Default::default()
        };
        let connector: Arc<dyn AdminConnector> = Arc::new(fakes.clone());

        let failures = sync_proxies(&connector, &proxies, &plan(3, &proxies), &ctx())
            .await
            .unwrap();

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].proxy, proxies[0].host);
        assert_eq!(failures[1].proxy, proxies[1].host);
        assert!(failures.iter().all(|f| f.table() == "mysql_servers"));
        assert_eq!(fakes.hostnames(&proxies[0].host, AdminTable::MysqlServers).len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_context_touches_nothing() {
        let fakes = FakeProxies::default();
        let connector: Arc<dyn AdminConnector> = Arc::new(fakes.clone());
        let proxies = proxies(1);
        let ctx = ctx();
        ctx.cancel();

        let err = sync_proxies(&connector, &proxies, &plan(1, &proxies), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OperationCancelled));
        assert!(fakes.stores.lock().unwrap().is_empty());
    }
}
