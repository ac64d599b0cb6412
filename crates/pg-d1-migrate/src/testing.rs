//! Test doubles for the source and the destination transport.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::{SourceRow, SqlValue};
use crate::destination::{QueryResult, QueryTransport};
use crate::error::{MigrateError, Result};
use crate::profile::TableProfile;
use crate::source::{RowSource, TableStats};

/// `camera_locations` rows with the given ids.
pub fn camera_rows(ids: impl IntoIterator<Item = i64>) -> Vec<SourceRow> {
    ids.into_iter()
        .map(|id| {
            let updated = NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|d| d.and_hms_opt(8, 30, 0))
                .map(SqlValue::Timestamp)
                .unwrap_or(SqlValue::Null);
            SourceRow::new(
                id,
                vec![
                    SqlValue::Int(id),
                    SqlValue::Text(format!("CAM-{:03}", id)),
                    SqlValue::from("Pacific Mwy"),
                    SqlValue::Float(-27.47),
                    SqlValue::Float(153.02),
                    updated,
                ],
            )
        })
        .collect()
}

/// In-memory source table.
pub struct MemorySource {
    rows: BTreeMap<i64, SourceRow>,
    passing_pings: usize,
    failing_pings: usize,
    pings: Mutex<Vec<tokio::time::Instant>>,
    fail_reconnect: bool,
    reconnects: AtomicUsize,
    fetches: Mutex<Vec<(i64, i64)>>,
}

impl MemorySource {
    pub fn new(rows: Vec<SourceRow>) -> Self {
        Self {
            rows: rows.into_iter().map(|r| (r.id(), r)).collect(),
            passing_pings: 0,
            failing_pings: 0,
            pings: Mutex::new(Vec::new()),
            fail_reconnect: false,
            reconnects: AtomicUsize::new(0),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Make the first `n` pings fail.
    pub fn with_failing_pings(self, n: usize) -> Self {
        self.with_failing_pings_after(0, n)
    }

    /// Let `skip` pings succeed, then fail the next `n`.
    pub fn with_failing_pings_after(mut self, skip: usize, n: usize) -> Self {
        self.passing_pings = skip;
        self.failing_pings = n;
        self
    }

    pub fn with_failing_reconnect(mut self) -> Self {
        self.fail_reconnect = true;
        self
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// When each ping happened, in order.
    pub fn ping_times(&self) -> Vec<tokio::time::Instant> {
        self.pings.lock().unwrap().clone()
    }

    /// Ranges fetched so far, in order.
    pub fn fetches(&self) -> Vec<(i64, i64)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowSource for MemorySource {
    async fn table_stats(&self, _profile: TableProfile) -> Result<TableStats> {
        Ok(TableStats {
            count: self.rows.len() as i64,
            min_id: self.rows.keys().next().copied(),
            max_id: self.rows.keys().next_back().copied(),
        })
    }

    async fn query_range(
        &self,
        _profile: TableProfile,
        min_id: i64,
        max_id: i64,
    ) -> Result<Vec<SourceRow>> {
        self.fetches.lock().unwrap().push((min_id, max_id));
        Ok(self
            .rows
            .range(min_id..=max_id)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let nth = {
            let mut pings = self.pings.lock().unwrap();
            pings.push(tokio::time::Instant::now());
            pings.len()
        };
        if nth > self.passing_pings && nth <= self.passing_pings + self.failing_pings {
            return Err(MigrateError::connection("connection reset", "ping"));
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconnect {
            return Err(MigrateError::connection("connection refused", "connect"));
        }
        Ok(())
    }

    fn db_type(&self) -> &'static str {
        "memory"
    }
}

enum Action {
    Fail(String),
    Respond(Vec<Map<String, Value>>),
    Changes(u64),
}

struct Rule {
    pattern: String,
    action: Action,
    skip: usize,
    times: Option<usize>,
    seen: usize,
}

#[derive(Default)]
struct Script {
    rules: Vec<Rule>,
    calls: Vec<(String, Vec<Value>)>,
    inserted: HashMap<String, Vec<Vec<Value>>>,
    /// Created tables and whether each declares a unique `id`. `None` when
    /// every table is assumed to exist.
    schema: Option<HashMap<String, bool>>,
}

/// Destination transport that records every call and answers from rules.
///
/// Unmatched `INSERT INTO "t"` statements succeed and keep their rows, and
/// unmatched `SELECT COUNT(*) AS count FROM "t"` answers with the number of
/// rows kept for `t`. Built with [`ScriptedTransport::with_schema`], it also
/// behaves like an empty database.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport over an empty database. Statements touching a table that was
    /// never created fail with `no such table`, and inserts into a table whose
    /// DDL declares `id` as a key reject ids already present.
    pub fn with_schema() -> Self {
        let transport = Self::default();
        transport.script.lock().unwrap().schema = Some(HashMap::new());
        transport
    }

    fn add_rule(&self, pattern: &str, action: Action, skip: usize, times: Option<usize>) {
        self.script.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            action,
            skip,
            times,
            seen: 0,
        });
    }

    /// Every statement containing `pattern` fails.
    pub fn fail_matching(&self, pattern: &str, message: &str) {
        self.add_rule(pattern, Action::Fail(message.to_string()), 0, None);
    }

    /// Let `skip` matching statements through, then fail the next `times`.
    pub fn fail_matching_after(&self, pattern: &str, skip: usize, times: usize, message: &str) {
        self.add_rule(pattern, Action::Fail(message.to_string()), skip, Some(times));
    }

    /// Answer statements containing `pattern` with `rows` (JSON objects).
    pub fn respond_matching(&self, pattern: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        self.add_rule(pattern, Action::Respond(rows), 0, None);
    }

    /// Report `changes` for statements containing `pattern`.
    pub fn report_changes_matching(&self, pattern: &str, changes: u64) {
        self.add_rule(pattern, Action::Changes(changes), 0, None);
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|(sql, _)| sql).collect()
    }

    /// Ids of rows inserted into `table`, in insert order.
    pub fn inserted_ids(&self, table: &str) -> Vec<i64> {
        self.script
            .lock()
            .unwrap()
            .inserted
            .get(table)
            .map(|rows| rows.iter().filter_map(|r| r[0].as_i64()).collect())
            .unwrap_or_default()
    }

    /// Rows per successful insert into `table`.
    pub fn insert_batch_sizes(&self, table: &str) -> Vec<usize> {
        let prefix = format!("INSERT INTO \"{}\"", table);
        let script = self.script.lock().unwrap();
        script
            .calls
            .iter()
            .filter(|(sql, _)| sql.starts_with(&prefix))
            .map(|(sql, _)| sql.matches("(?").count())
            .collect()
    }
}

/// Table a statement creates, reads or writes.
fn statement_relation(sql: &str) -> Option<String> {
    let keywords: &[&str] = if sql.starts_with("CREATE TABLE") {
        &["EXISTS"]
    } else if sql.starts_with("CREATE INDEX") {
        &["ON"]
    } else {
        &["FROM", "INTO", "UPDATE"]
    };
    let tokens: Vec<&str> = sql.split_whitespace().collect();
    let pos = tokens.iter().position(|t| keywords.contains(t))?;
    let name = tokens.get(pos + 1)?.split('(').next()?.trim_matches('"');
    (!name.is_empty()).then(|| name.to_string())
}

fn declares_unique_id(ddl: &str) -> bool {
    let Some((_, body)) = ddl.split_once('(') else {
        return false;
    };
    body.split(',').map(str::trim).any(|def| {
        let compact = def.replace(' ', "");
        (def.starts_with("id ") && (def.contains("PRIMARY KEY") || def.contains("UNIQUE")))
            || compact.starts_with("PRIMARYKEY(id)")
            || compact.starts_with("UNIQUE(id)")
    })
}

fn quoted_table_after<'a>(sql: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = sql.strip_prefix(prefix)?.strip_prefix('"')?;
    rest.split('"').next()
}

#[async_trait]
impl QueryTransport for ScriptedTransport {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut script = self.script.lock().unwrap();
        script.calls.push((sql.to_string(), params.to_vec()));

        for rule in script.rules.iter_mut() {
            if !sql.contains(&rule.pattern) {
                continue;
            }
            rule.seen += 1;
            if rule.seen <= rule.skip {
                continue;
            }
            if let Some(times) = rule.times {
                if rule.seen > rule.skip + times {
                    continue;
                }
            }
            return match &rule.action {
                Action::Fail(message) => Err(MigrateError::remote(None, message.clone())),
                Action::Respond(rows) => Ok(QueryResult {
                    rows: rows.clone(),
                    ..Default::default()
                }),
                Action::Changes(n) => Ok(QueryResult {
                    changes: Some(*n),
                    ..Default::default()
                }),
            };
        }

        if let Some(schema) = script.schema.as_mut() {
            if let Some(relation) = statement_relation(sql) {
                if sql.starts_with("CREATE TABLE") {
                    let unique_id = declares_unique_id(sql);
                    schema.entry(relation).or_insert(unique_id);
                    return Ok(QueryResult::default());
                }
                if !schema.contains_key(&relation) {
                    return Err(MigrateError::remote(
                        None,
                        format!("no such table: {}: SQLITE_ERROR", relation),
                    ));
                }
            }
        }

        if let Some(table) = quoted_table_after(sql, "INSERT INTO ") {
            let rows = sql.matches("(?").count().max(1);
            let width = params.len() / rows;
            let unique_id = script
                .schema
                .as_ref()
                .and_then(|schema| schema.get(table))
                .copied()
                .unwrap_or(false);
            let entry = script.inserted.entry(table.to_string()).or_default();
            let new_rows: Vec<Vec<Value>> =
                params.chunks(width.max(1)).map(<[Value]>::to_vec).collect();
            if unique_id {
                let mut seen: Vec<&Value> = entry.iter().map(|r| &r[0]).collect();
                for row in &new_rows {
                    if seen.contains(&&row[0]) {
                        return Err(MigrateError::remote(
                            None,
                            format!("UNIQUE constraint failed: {}.id: SQLITE_CONSTRAINT", table),
                        ));
                    }
                    seen.push(&row[0]);
                }
            }
            entry.extend(new_rows);
            return Ok(QueryResult {
                changes: Some(rows as u64),
                ..Default::default()
            });
        }

        if let Some(table) = quoted_table_after(sql, "SELECT COUNT(*) AS count FROM ") {
            let count = script.inserted.get(table).map_or(0, Vec::len);
            let mut row = Map::new();
            row.insert("count".to_string(), Value::from(count as i64));
            return Ok(QueryResult {
                rows: vec![row],
                ..Default::default()
            });
        }

        Ok(QueryResult::default())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
