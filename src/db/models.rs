use std::fmt;

use tiberius::{AuthMethod, Config, EncryptionLevel};

use crate::config::AppConfig;

pub const SQL_SERVER_PORT: u16 = 1433;
pub const DRIVER_NAME: &str = "mssql+tds";
pub const ODBC_DRIVER: &str = "ODBC Driver 17 for SQL Server";

/// Everything needed to reach the target database. The password never
/// appears in `Debug` or `Display` output.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    pub driver: &'static str,
    pub host: String,
    pub port: u16,
    /// `<user>@<server>`, the login form Azure SQL expects
    pub username: String,
    password: String,
    pub database: String,
    pub odbc_driver: &'static str,
    pub trust_cert: bool,
}

impl ConnectionDescriptor {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            driver: DRIVER_NAME,
            host: config.sql_server_name.clone(),
            port: SQL_SERVER_PORT,
            username: format!("{}@{}", config.sql_server_username, config.sql_server_name),
            password: config.sql_server_password.clone(),
            database: config.sql_server_database.clone(),
            odbc_driver: ODBC_DRIVER,
            trust_cert: config.sql_server_trust_cert,
        }
    }

    pub fn tds_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.authentication(AuthMethod::sql_server(&self.username, &self.password));
        config.encryption(EncryptionLevel::Required);
        if self.trust_cert {
            config.trust_cert();
        }
        config
    }

    /// Strip the login and password out of a driver message before it is
    /// logged or wrapped.
    pub fn redact(&self, message: &str) -> String {
        let mut out = message.to_string();
        for secret in [self.password.as_str(), self.username.as_str()] {
            if !secret.is_empty() {
                out = out.replace(secret, "***");
            }
        }
        out
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://***@{}:{}/{}?driver={}",
            self.driver,
            self.host,
            self.port,
            self.database,
            self.odbc_driver.replace(' ', "+")
        )
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("odbc_driver", &self.odbc_driver)
            .finish()
    }
}

/// One row of `INFORMATION_SCHEMA.COLUMNS`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// `-1` means `MAX`
    pub max_length: Option<i32>,
}

impl TableColumn {
    fn ddl(&self) -> String {
        let mut ty = self.data_type.to_uppercase();
        match self.max_length {
            Some(-1) => ty.push_str("(max)"),
            Some(n) if n > 0 => ty.push_str(&format!("({})", n)),
            _ => {}
        }
        let null = if self.nullable { "NULL" } else { "NOT NULL" };
        format!("\t[{}] {} {}", self.name, ty, null)
    }
}

/// `CREATE TABLE` rendering of a column listing, as shown to the model.
pub fn render_create_table(table: &str, columns: &[TableColumn]) -> String {
    let body: Vec<String> = columns.iter().map(TableColumn::ddl).collect();
    format!("CREATE TABLE [{}] (\n{}\n)", table, body.join(", \n"))
}

/// Sample rows block appended after each table's DDL.
pub fn render_sample_rows(table: &str, headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = format!("/*\n{} rows from {} table:\n{}", rows.len(), table, headers.join("\t"));
    for row in rows {
        out.push('\n');
        out.push_str(&row.join("\t"));
    }
    out.push_str("\n*/");
    out
}

/// Query results as a list of tuples: `[(1, 'a'), (2, None)]`. No rows
/// renders as an empty string.
pub fn render_result_rows(rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            if row.len() == 1 {
                format!("({},)", row[0])
            } else {
                format!("({})", row.join(", "))
            }
        })
        .collect();
    format!("[{}]", tuples.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    #[test]
    fn descriptor_uses_fixed_port_and_server_qualified_login() {
        let descriptor = ConnectionDescriptor::from_config(&test_config());
        assert_eq!(descriptor.port, 1433);
        assert_eq!(descriptor.username, "reader@db.example.net");
        assert_eq!(descriptor.odbc_driver, "ODBC Driver 17 for SQL Server");
        assert_eq!(
            descriptor.to_string(),
            "mssql+tds://***@db.example.net:1433/sales?driver=ODBC+Driver+17+for+SQL+Server"
        );
    }

    #[test]
    fn password_never_rendered() {
        let descriptor = ConnectionDescriptor::from_config(&test_config());
        assert!(!descriptor.to_string().contains("hunter2"));
        assert!(!format!("{:?}", descriptor).contains("hunter2"));
    }

    #[test]
    fn redact_masks_login_and_password() {
        let descriptor = ConnectionDescriptor::from_config(&test_config());
        let msg = descriptor.redact("Login failed for user 'reader@db.example.net' using hunter2");
        assert_eq!(msg, "Login failed for user '***' using ***");
    }

    #[test]
    fn create_table_rendering() {
        let columns = vec![
            TableColumn {
                name: "id".to_string(),
                data_type: "int".to_string(),
                nullable: false,
                max_length: None,
            },
            TableColumn {
                name: "name".to_string(),
                data_type: "nvarchar".to_string(),
                nullable: true,
                max_length: Some(50),
            },
            TableColumn {
                name: "notes".to_string(),
                data_type: "nvarchar".to_string(),
                nullable: true,
                max_length: Some(-1),
            },
        ];
        assert_eq!(
            render_create_table("users", &columns),
            "CREATE TABLE [users] (\n\t[id] INT NOT NULL, \n\t[name] NVARCHAR(50) NULL, \n\t[notes] NVARCHAR(max) NULL\n)"
        );
    }

    #[test]
    fn sample_rows_rendering() {
        let headers = vec!["id".to_string(), "name".to_string()];
        let rows = vec![vec!["1".to_string(), "Ann".to_string()]];
        assert_eq!(
            render_sample_rows("users", &headers, &rows),
            "/*\n1 rows from users table:\nid\tname\n1\tAnn\n*/"
        );
    }

    #[test]
    fn result_rows_render_as_tuples() {
        assert_eq!(render_result_rows(&[]), "");
        assert_eq!(render_result_rows(&[vec!["42".to_string()]]), "[(42,)]");
        assert_eq!(
            render_result_rows(&[
                vec!["1".to_string(), "'a'".to_string()],
                vec!["2".to_string(), "None".to_string()],
            ]),
            "[(1, 'a'), (2, None)]"
        );
    }
}
