pub mod models;

use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser;
use tiberius::{Client, ColumnData, FromSql, Row};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::errors::Error;
use models::{ConnectionDescriptor, TableColumn};

/// Longest value shown to the model before truncation.
const MAX_STRING_LENGTH: usize = 100;
const SAMPLE_ROWS: usize = 3;

/// Read-only view of a relational database, as the agent's tools see it.
#[async_trait]
pub trait SqlDatabase: Send + Sync {
    fn dialect(&self) -> &str;

    async fn usable_table_names(&self) -> anyhow::Result<Vec<String>>;

    /// Column listing plus a few sample rows for each named table.
    async fn table_info(&self, tables: &[String]) -> anyhow::Result<String>;

    /// Execute a read-only statement and render its rows for the model.
    async fn run(&self, query: &str) -> anyhow::Result<String>;
}

type TdsClient = Client<Compat<TcpStream>>;

/// A single SQL Server connection.
pub struct Database {
    client: Mutex<TdsClient>,
    descriptor: ConnectionDescriptor,
}

impl Database {
    pub async fn connect(descriptor: ConnectionDescriptor) -> Result<Self, Error> {
        let config = descriptor.tds_config();
        let connect_failed = |e: &dyn Display| {
            let cause = descriptor.redact(&e.to_string());
            tracing::error!("An error occurred while connecting to the database: {}", cause);
            Error::connection(
                "Failed to connect to the database. Please check your database configuration.",
                anyhow::anyhow!(cause),
            )
        };

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| connect_failed(&e))?;
        tcp.set_nodelay(true).map_err(|e| connect_failed(&e))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| connect_failed(&e))?;

        tracing::info!("Connected to {}", descriptor);
        Ok(Self {
            client: Mutex::new(client),
            descriptor,
        })
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    async fn columns(&self, table: &str) -> anyhow::Result<Vec<TableColumn>> {
        let mut client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, CHARACTER_MAXIMUM_LENGTH \
                 FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = @P1 ORDER BY ORDINAL_POSITION",
                &[&table],
            )
            .await?
            .into_first_result()
            .await?;

        Ok(rows
            .iter()
            .map(|row| TableColumn {
                name: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                data_type: row.get::<&str, _>(1).unwrap_or_default().to_string(),
                nullable: row.get::<&str, _>(2) == Some("YES"),
                max_length: row.get::<i32, _>(3),
            })
            .collect())
    }

    async fn sample_rows(&self, table: &str) -> anyhow::Result<(Vec<String>, Vec<Vec<String>>)> {
        let sql = format!("SELECT TOP {} * FROM {}", SAMPLE_ROWS, quote_identifier(table));
        let mut client = self.client.lock().await;
        let rows = client.simple_query(sql).await?.into_first_result().await?;

        let headers = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let values = rows.iter().map(|r| render_row(r, false)).collect();
        Ok((headers, values))
    }
}

#[async_trait]
impl SqlDatabase for Database {
    fn dialect(&self) -> &str {
        "mssql"
    }

    async fn usable_table_names(&self) -> anyhow::Result<Vec<String>> {
        let mut client = self.client.lock().await;
        let rows = client
            .simple_query(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
            )
            .await?
            .into_first_result()
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get::<&str, _>(0).map(str::to_string))
            .collect())
    }

    async fn table_info(&self, tables: &[String]) -> anyhow::Result<String> {
        let known = self.usable_table_names().await?;
        let missing: Vec<&String> = tables.iter().filter(|t| !known.contains(t)).collect();
        if !missing.is_empty() {
            anyhow::bail!("table_names {:?} not found in database", missing);
        }

        let mut sections = Vec::with_capacity(tables.len());
        for table in tables {
            let columns = self.columns(table).await?;
            let (headers, rows) = self.sample_rows(table).await?;
            sections.push(format!(
                "{}\n\n{}",
                models::render_create_table(table, &columns),
                models::render_sample_rows(table, &headers, &rows)
            ));
        }
        Ok(sections.join("\n\n"))
    }

    async fn run(&self, query: &str) -> anyhow::Result<String> {
        ensure_read_only(query)?;

        let mut client = self.client.lock().await;
        let rows = client.simple_query(query).await?.into_first_result().await?;
        let rendered: Vec<Vec<String>> = rows.iter().map(|r| render_row(r, true)).collect();
        Ok(models::render_result_rows(&rendered))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Refuse anything but a single read-only query. The statement has to
/// parse as T-SQL; batches, DDL, DML and `SELECT ... INTO` are rejected.
pub fn ensure_read_only(sql: &str) -> anyhow::Result<()> {
    let statements = Parser::parse_sql(&MsSqlDialect {}, sql)
        .map_err(|e| anyhow::anyhow!("only SELECT statements are allowed, could not parse query: {}", e))?;

    match statements.as_slice() {
        [] => anyhow::bail!("empty statement"),
        [Statement::Query(query)] if is_plain_read(query) => Ok(()),
        [Statement::Query(_)] => {
            anyhow::bail!("only SELECT statements are allowed, SELECT ... INTO writes a table")
        }
        [other] => anyhow::bail!("only SELECT statements are allowed, got {}", other),
        many => anyhow::bail!(
            "only SELECT statements are allowed, got a batch of {} statements",
            many.len()
        ),
    }
}

fn is_plain_read(query: &Query) -> bool {
    let ctes_read = query
        .with
        .as_ref()
        .map_or(true, |with| with.cte_tables.iter().all(|cte| is_plain_read(&cte.query)));
    ctes_read && is_plain_read_body(&query.body)
}

fn is_plain_read_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_plain_read(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_plain_read_body(left) && is_plain_read_body(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}

fn render_row(row: &Row, quoted: bool) -> Vec<String> {
    row.cells().map(|(_, data)| render_cell(data, quoted)).collect()
}

fn render_cell(data: &ColumnData<'static>, quoted: bool) -> String {
    let text = |s: &str| -> String {
        let s = truncate(s);
        if quoted {
            format!("'{}'", s.replace('\'', "\\'"))
        } else {
            s
        }
    };
    let rendered = match data {
        ColumnData::U8(v) => v.map(|v| v.to_string()),
        ColumnData::I16(v) => v.map(|v| v.to_string()),
        ColumnData::I32(v) => v.map(|v| v.to_string()),
        ColumnData::I64(v) => v.map(|v| v.to_string()),
        ColumnData::F32(v) => v.map(|v| v.to_string()),
        ColumnData::F64(v) => v.map(|v| v.to_string()),
        ColumnData::Bit(v) => v.map(|b| if b { "True" } else { "False" }.to_string()),
        ColumnData::Numeric(v) => v.map(|n| n.to_string()),
        ColumnData::String(v) => v.as_ref().map(|s| text(s)),
        ColumnData::Guid(v) => v.map(|g| text(&g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| format!("<{} bytes>", b.len())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            temporal::<NaiveDateTime>(data).map(|t| text(&t))
        }
        ColumnData::Date(_) => temporal::<NaiveDate>(data).map(|t| text(&t)),
        ColumnData::Time(_) => temporal::<NaiveTime>(data).map(|t| text(&t)),
        ColumnData::DateTimeOffset(_) => {
            temporal::<DateTime<FixedOffset>>(data).map(|t| text(&t))
        }
        other => Some(text(&format!("{:?}", other))),
    };
    rendered.unwrap_or_else(|| "None".to_string())
}

fn temporal<'a, T>(data: &'a ColumnData<'static>) -> Option<String>
where
    T: FromSql<'a> + Display,
{
    T::from_sql(data).ok().flatten().map(|t| t.to_string())
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_STRING_LENGTH {
        let head: String = s.chars().take(MAX_STRING_LENGTH).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn plain_selects_and_ctes_are_allowed() {
        assert!(ensure_read_only("SELECT COUNT(*) FROM users").is_ok());
        assert!(ensure_read_only("  select top 5 name from products order by rating desc").is_ok());
        assert!(ensure_read_only("WITH t AS (SELECT 1 AS x) SELECT x FROM t").is_ok());
    }

    #[test]
    fn writes_are_refused() {
        assert!(ensure_read_only("DELETE FROM users").is_err());
        assert!(ensure_read_only("UPDATE users SET name = 'x'").is_err());
        assert!(ensure_read_only("DROP TABLE users").is_err());
        assert!(ensure_read_only("SELECT * INTO backup FROM users").is_err());
        assert!(ensure_read_only("").is_err());
    }

    #[test]
    fn batches_are_refused_whatever_follows_the_select() {
        for batch in [
            "SELECT 1; DROP TABLE users",
            "SELECT 1; KILL 52",
            "SELECT 1; UPDATETEXT t.c @ptr 0 NULL 'x'",
            "SELECT 1; DISABLE TRIGGER ALL ON DATABASE",
            "SELECT 1; RECONFIGURE",
            "SELECT 1; SELECT 2",
        ] {
            let err = ensure_read_only(batch).unwrap_err();
            assert!(
                err.to_string().starts_with("only SELECT statements are allowed"),
                "{}: {}",
                batch,
                err
            );
        }
    }

    #[test]
    fn set_operations_and_subqueries_are_reads() {
        assert!(ensure_read_only("SELECT id FROM orders UNION ALL SELECT id FROM users").is_ok());
        assert!(ensure_read_only(
            "SELECT name FROM users WHERE id IN (SELECT user_id FROM orders);"
        )
        .is_ok());
    }

    #[test]
    fn keywords_inside_literals_identifiers_and_comments_are_ignored() {
        assert!(ensure_read_only("SELECT [delete] FROM audit WHERE action = 'DROP TABLE'").is_ok());
        assert!(ensure_read_only("SELECT \"update\" FROM t -- delete later").is_ok());
        assert!(ensure_read_only("SELECT 1 /* insert here */ FROM t WHERE n = 'it''s'").is_ok());
    }

    #[test]
    fn cells_render_python_style() {
        assert_eq!(render_cell(&ColumnData::I32(Some(7)), true), "7");
        assert_eq!(render_cell(&ColumnData::I32(None), true), "None");
        assert_eq!(render_cell(&ColumnData::Bit(Some(true)), true), "True");
        assert_eq!(
            render_cell(&ColumnData::String(Some(Cow::Borrowed("TX"))), true),
            "'TX'"
        );
        assert_eq!(
            render_cell(&ColumnData::String(Some(Cow::Borrowed("TX"))), false),
            "TX"
        );
    }

    #[test]
    fn long_strings_are_truncated() {
        let long = "x".repeat(150);
        let rendered = render_cell(&ColumnData::String(Some(Cow::Owned(long))), false);
        assert_eq!(rendered.len(), MAX_STRING_LENGTH + 3);
        assert!(rendered.ends_with("..."));
    }

    #[tokio::test]
    async fn failed_connect_keeps_credentials_out_of_the_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut descriptor = ConnectionDescriptor::from_config(&crate::config::tests::test_config());
        descriptor.host = "127.0.0.1".to_string();
        descriptor.port = port;

        let err = match Database::connect(descriptor).await {
            Ok(_) => panic!("connected to a closed port"),
            Err(e) => e,
        };

        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(
            err.to_string(),
            "Failed to connect to the database. Please check your database configuration."
        );
        let logged = format!("{:#}", anyhow::Error::new(err));
        assert!(!logged.contains("hunter2"));
        assert!(!logged.contains("reader@"));
    }

    #[test]
    fn identifiers_are_bracket_quoted() {
        assert_eq!(quote_identifier("orders"), "[orders]");
        assert_eq!(quote_identifier("odd]name"), "[odd]]name]");
    }
}
