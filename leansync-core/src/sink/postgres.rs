//! Postgres sink via sqlx.
//!
//! Each write opens one connection on a private current-thread runtime,
//! replaces the table inside a transaction and closes the connection on every
//! path.

use super::{quote_ident, SinkError, SinkWriter};
use crate::convert::LeanBar;
use reqwest::Url;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, warn};

/// Rows per INSERT; 6 binds each keeps well under the 65535 parameter cap.
const INSERT_BATCH: usize = 1_000;

/// Connection details for the relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub scheme: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
}

impl SinkConfig {
    /// `<scheme>://<user>:<password>@<host>[:port]/<database>`, with user and
    /// password percent-encoded.
    pub fn url(&self) -> Result<String, SinkError> {
        self.render(&self.password)
    }

    /// Same as [`url`](Self::url) with the password masked, for logs.
    pub fn redacted(&self) -> String {
        let mask = if self.password.is_empty() { "" } else { "***" };
        self.render(mask)
            .unwrap_or_else(|_| format!("{}://{}@{}/{}", self.scheme, self.user, self.host, self.database))
    }

    fn render(&self, password: &str) -> Result<String, SinkError> {
        if !matches!(self.scheme.as_str(), "postgres" | "postgresql") {
            return Err(SinkError::UnsupportedScheme(self.scheme.clone()));
        }
        let authority = match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        };
        let invalid = |what: &str| SinkError::Connect {
            target: format!("{}://{}/{}", self.scheme, authority, self.database),
            message: format!("invalid {what} in connection URL"),
        };
        let mut url = Url::parse(&format!("{}://{}/{}", self.scheme, authority, self.database))
            .map_err(|_| invalid("host or database"))?;
        if !self.user.is_empty() {
            url.set_username(&self.user).map_err(|_| invalid("user"))?;
        }
        if !password.is_empty() {
            url.set_password(Some(password)).map_err(|_| invalid("password"))?;
        }
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresSink {
    config: SinkConfig,
}

impl PostgresSink {
    /// Rejects unsupported schemes up front.
    pub fn new(config: SinkConfig) -> Result<Self, SinkError> {
        config.url()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    async fn write_async(&self, table: &str, bars: &[Row<'_>]) -> Result<(), SinkError> {
        let url = self.config.url()?;
        let endpoint = self.config.redacted();

        let mut conn = PgConnection::connect(&url).await.map_err(|e| SinkError::Connect {
            target: endpoint.clone(),
            message: e.to_string(),
        })?;
        debug!(db = %endpoint, %table, "connected to relational store");

        let result = replace_table(&mut conn, table, bars).await;

        if let Err(e) = conn.close().await {
            warn!(db = %endpoint, error = %e, "failed to close relational connection cleanly");
        }

        result.map_err(|e| SinkError::Write {
            table: table.to_string(),
            message: e.to_string(),
        })
    }
}

impl SinkWriter for PostgresSink {
    fn name(&self) -> &str {
        "postgres"
    }

    fn write(&self, ticker: &str, schema: &str, bars: &[LeanBar]) -> Result<usize, SinkError> {
        let table = format!("{}.{}", quote_ident(schema)?, quote_ident(ticker)?);
        let rows = to_rows(&table, bars)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SinkError::Runtime(e.to_string()))?;
        runtime.block_on(self.write_async(&table, &rows))?;

        Ok(rows.len())
    }
}

/// Bar with every integer column in Postgres' signed BIGINT range.
struct Row<'a> {
    date: &'a str,
    open: i64,
    high: i64,
    low: i64,
    close: i64,
    volume: i64,
}

fn to_rows<'a>(table: &str, bars: &'a [LeanBar]) -> Result<Vec<Row<'a>>, SinkError> {
    bars.iter()
        .map(|bar| {
            let volume = i64::try_from(bar.volume).map_err(|_| SinkError::Write {
                table: table.to_string(),
                message: format!("volume {} at {} exceeds BIGINT", bar.volume, bar.date),
            })?;
            Ok(Row {
                date: &bar.date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume,
            })
        })
        .collect()
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE {table} (\
         date TEXT NOT NULL, \
         open BIGINT NOT NULL, \
         high BIGINT NOT NULL, \
         low BIGINT NOT NULL, \
         close BIGINT NOT NULL, \
         volume BIGINT NOT NULL)"
    )
}

async fn replace_table(conn: &mut PgConnection, table: &str, rows: &[Row<'_>]) -> Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;

    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&create_table_sql(table)).execute(&mut *tx).await?;

    for chunk in rows.chunks(INSERT_BATCH) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {table} (date, open, high, low, close, volume) "));
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.date)
                .push_bind(row.open)
                .push_bind(row.high)
                .push_bind(row.low)
                .push_bind(row.close)
                .push_bind(row.volume);
        });
        builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await
}
