//! Shared runtime application state (HTTP handlers)

use polyquery_types::runtime::StatsSnapshot;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::auth::UserDirectory;
use crate::executor::QueryExecutor;
use crate::registry::ConnectionRegistry;

/// Process wide counters, created when the runtime starts
#[derive(Debug)]
pub struct Stats {
    started_at: Instant,
    total_requests: u64,
    total_queries: u64,
    failed_queries: u64,
    denied_requests: u64,
    queries_by_connection: BTreeMap<String, u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: 0,
            total_queries: 0,
            failed_queries: 0,
            denied_requests: 0,
            queries_by_connection: BTreeMap::new(),
        }
    }

    pub fn record_request(&mut self) {
        self.total_requests += 1;
    }

    pub fn record_denied(&mut self) {
        self.denied_requests += 1;
    }

    pub fn record_query(&mut self, connection: &str, succeeded: bool) {
        self.total_queries += 1;
        if !succeeded {
            self.failed_queries += 1;
        }
        *self
            .queries_by_connection
            .entry(connection.to_string())
            .or_insert(0) += 1;
    }

    pub fn snapshot(&self, connections: usize) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests,
            total_queries: self.total_queries,
            failed_queries: self.failed_queries,
            denied_requests: self.denied_requests,
            uptime_secs: self.started_at.elapsed().as_secs(),
            connections,
            queries_by_connection: self.queries_by_connection.clone(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedStats = Arc<Mutex<Stats>>;

/// Non-secret facts about the running deployment
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub port: u16,
    pub request_timeout: Duration,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<QueryExecutor>,
    pub registry: Arc<ConnectionRegistry>,
    pub users: Arc<UserDirectory>,
    pub stats: SharedStats,
    pub info: Arc<ServerInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counters() {
        let mut stats = Stats::new();
        stats.record_request();
        stats.record_request();
        stats.record_denied();
        stats.record_query("pg_prod", true);
        stats.record_query("pg_prod", false);
        stats.record_query("docs", true);

        let snapshot = stats.snapshot(2);
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.denied_requests, 1);
        assert_eq!(snapshot.total_queries, 3);
        assert_eq!(snapshot.failed_queries, 1);
        assert_eq!(snapshot.connections, 2);
        assert_eq!(snapshot.queries_by_connection["pg_prod"], 2);
    }
}
