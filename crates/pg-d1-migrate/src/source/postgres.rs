//! PostgreSQL row source.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Config as PgConfig, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error, info};

use super::{RowSource, SslMode, TableStats};
use crate::config::SourceConfig;
use crate::core::{SourceRow, SqlValue};
use crate::error::{MigrateError, Result};
use crate::profile::{ColumnDef, ColumnKind, TableProfile};

/// Single-connection PostgreSQL source with reconnect.
pub struct PgSource {
    pg_config: PgConfig,
    tls: Option<MakeRustlsConnect>,
    client: Mutex<Option<Client>>,
}

impl PgSource {
    /// Connect to the source described by `config`.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let mut pg_config: PgConfig = config.url.parse().map_err(|e| {
            MigrateError::Config(format!("invalid source.url: {}", e))
        })?;
        pg_config.connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        let source = Self {
            pg_config,
            tls: SslMode::parse(&config.ssl_mode)?.connector(),
            client: Mutex::new(None),
        };

        let client = source.open().await?;
        *source.client.lock().await = Some(client);

        info!(
            "Connected to PostgreSQL source {:?}/{}",
            source.pg_config.get_hosts().first(),
            source.pg_config.get_dbname().unwrap_or_default()
        );
        Ok(source)
    }

    async fn open(&self) -> Result<Client> {
        match &self.tls {
            Some(tls) => {
                let (client, connection) = self
                    .pg_config
                    .connect(tls.clone())
                    .await
                    .map_err(|e| MigrateError::connection(e, "connecting to PostgreSQL source"))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL source connection closed: {}", e);
                    }
                });
                Ok(client)
            }
            None => {
                let (client, connection) = self
                    .pg_config
                    .connect(NoTls)
                    .await
                    .map_err(|e| MigrateError::connection(e, "connecting to PostgreSQL source"))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL source connection closed: {}", e);
                    }
                });
                Ok(client)
            }
        }
    }
}

#[async_trait]
impl RowSource for PgSource {
    async fn table_stats(&self, profile: TableProfile) -> Result<TableStats> {
        let sql = format!(
            "SELECT COUNT(*)::bigint, MIN(id)::bigint, MAX(id)::bigint FROM {}",
            quote_ident(profile.table_name())
        );

        let guard = self.client.lock().await;
        let client = connected(&guard)?;
        let row = client.query_one(sql.as_str(), &[]).await?;

        Ok(TableStats {
            count: row.try_get(0)?,
            min_id: row.try_get(1)?,
            max_id: row.try_get(2)?,
        })
    }

    async fn query_range(
        &self,
        profile: TableProfile,
        min_id: i64,
        max_id: i64,
    ) -> Result<Vec<SourceRow>> {
        let sql = range_query(profile);
        debug!("Source fetch {} [{}, {}]", profile, min_id, max_id);

        let guard = self.client.lock().await;
        let client = connected(&guard)?;
        let rows = client.query(sql.as_str(), &[&min_id, &max_id]).await?;

        rows.iter().map(|row| decode_row(profile, row)).collect()
    }

    async fn ping(&self) -> Result<()> {
        let guard = self.client.lock().await;
        let client = connected(&guard)?;
        if client.is_closed() {
            return Err(MigrateError::connection("connection closed", "source ping"));
        }
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        guard.take();
        *guard = Some(self.open().await?);
        Ok(())
    }

    fn db_type(&self) -> &'static str {
        "postgres"
    }
}

fn connected(client: &Option<Client>) -> Result<&Client> {
    client
        .as_ref()
        .ok_or_else(|| MigrateError::connection("not connected", "PostgreSQL source"))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `SELECT <profile columns> FROM t WHERE id BETWEEN $1 AND $2 ORDER BY id`.
fn range_query(profile: TableProfile) -> String {
    let columns = profile
        .column_names()
        .into_iter()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {} FROM {} WHERE id BETWEEN $1::bigint AND $2::bigint ORDER BY id ASC",
        columns,
        quote_ident(profile.table_name())
    )
}

fn decode_row(profile: TableProfile, row: &Row) -> Result<SourceRow> {
    let values = profile
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| decode_value(row, idx, column))
        .collect::<Result<Vec<_>>>()?;

    let id = match values.first() {
        Some(SqlValue::Int(id)) => *id,
        other => {
            return Err(MigrateError::Transform {
                column: "id".to_string(),
                message: format!("expected an integer id, got {:?}", other),
            })
        }
    };

    Ok(SourceRow::new(id, values))
}

/// Decode one column by its PostgreSQL type, steered by the profile's column kind.
fn decode_value(row: &Row, idx: usize, column: &ColumnDef) -> Result<SqlValue> {
    let pg_type = row.columns()[idx].type_();
    let decode_err = |e: tokio_postgres::Error| MigrateError::Transform {
        column: column.name.to_string(),
        message: format!("cannot decode {} value: {}", pg_type, e),
    };

    let value: SqlValue = match *pg_type {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map_err(decode_err)?.into(),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(decode_err)?
            .map(i64::from)
            .into(),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(decode_err)?
            .map(i64::from)
            .into(),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map_err(decode_err)?.into(),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(decode_err)?
            .map(f64::from)
            .into(),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map_err(decode_err)?.into(),
        Type::NUMERIC => match row.try_get::<_, Option<Decimal>>(idx).map_err(decode_err)? {
            None => SqlValue::Null,
            Some(d) => decimal_value(column, d)?,
        },
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(idx).map_err(decode_err)?.into()
        }
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(decode_err)?
            .map_or(SqlValue::Null, SqlValue::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<FixedOffset>>>(idx)
            .map_err(decode_err)?
            .map_or(SqlValue::Null, SqlValue::TimestampTz),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map_err(decode_err)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(SqlValue::Null, SqlValue::Timestamp),
        _ => {
            return Err(MigrateError::Transform {
                column: column.name.to_string(),
                message: format!("unsupported source type {}", pg_type),
            })
        }
    };

    Ok(value)
}

fn decimal_value(column: &ColumnDef, d: Decimal) -> Result<SqlValue> {
    let converted = match column.kind {
        ColumnKind::Integer if d.fract().is_zero() => d.to_i64().map(SqlValue::Int),
        ColumnKind::Text => Some(SqlValue::Text(d.to_string())),
        _ => d.to_f64().map(SqlValue::Float),
    };
    converted.ok_or_else(|| MigrateError::Transform {
        column: column.name.to_string(),
        message: format!("numeric value {} out of range", d),
    })
}
