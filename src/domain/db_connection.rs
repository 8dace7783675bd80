use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Database engines the service can talk to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DbKind {
    #[serde(alias = "postgres")]
    Postgresql,
    Sqlite,
}

impl DbKind {
    /// Dialect name used when instructing the generator.
    pub fn dialect(&self) -> &'static str {
        match self {
            DbKind::Postgresql => "PostgreSQL",
            DbKind::Sqlite => "SQLite",
        }
    }
}

fn default_port() -> u16 {
    5432
}

/// Connection parameters supplied by the caller for one pipeline run.
///
/// For SQLite `database` is the path of the database file and the network
/// fields are ignored.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Validate)]
pub struct ConnectionDescriptor {
    #[serde(alias = "db_type")]
    pub engine: DbKind,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[validate(length(min = 1, message = "database name is required"))]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl ConnectionDescriptor {
    pub fn postgres(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            engine: DbKind::Postgresql,
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            engine: DbKind::Sqlite,
            host: String::new(),
            port: 0,
            database: path.into(),
            username: String::new(),
            password: String::new(),
        }
    }

    /// Human-readable target for logs; never includes credentials.
    pub fn display_target(&self) -> String {
        match self.engine {
            DbKind::Postgresql => format!("{}:{}/{}", self.host, self.port, self.database),
            DbKind::Sqlite => format!("sqlite:{}", self.database),
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
