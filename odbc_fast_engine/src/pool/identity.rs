use crate::error::{EngineError, Result};

/// Pool key derived from a connection string: `(driver, host, port, user)`.
/// Database is deliberately excluded so connections that differ only by
/// database share a pool. Components are normalized to lowercase because
/// ODBC treats them case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolIdentity {
    driver: String,
    host: String,
    port: String,
    user: String,
}

impl PoolIdentity {
    pub fn parse(conn_string: &str) -> Result<Self> {
        let trimmed = conn_string.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidIdentity(
                "connection string is empty".to_string(),
            ));
        }

        let mut driver = String::new();
        let mut host = String::new();
        let mut port = String::new();
        let mut user = String::new();

        for part in trimmed.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value
                .trim()
                .trim_matches(|c| c == '{' || c == '}')
                .to_lowercase();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "driver" => driver = value,
                "server" | "host" | "hostname" => host = value,
                "port" => port = value,
                "uid" | "user" | "username" => user = value,
                _ => {}
            }
        }

        if driver.is_empty() && host.is_empty() && port.is_empty() && user.is_empty() {
            // DSN-style strings carry no key/value components; the whole
            // string is the identity then.
            host = trimmed.to_lowercase();
        }

        Ok(Self {
            driver,
            host,
            port,
            user,
        })
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Display for PoolIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.driver, self.host, self.port, self.user
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_connection_string() {
        let id = PoolIdentity::parse(
            "Driver={SQL Server};Server=localhost;Port=1433;Database=myDb;UID=sa;PWD=secret;",
        )
        .unwrap();
        assert_eq!(id.to_string(), "sql server:localhost:1433:sa");
    }

    #[test]
    fn test_database_excluded_from_identity() {
        let a = PoolIdentity::parse("Server=host;Database=db1;UID=u;PWD=p").unwrap();
        let b = PoolIdentity::parse("Server=host;Database=db2;UID=u;PWD=p").unwrap();
        assert_eq!(a, b);
        assert!(!a.to_string().contains("db1"));
    }

    #[test]
    fn test_identity_is_case_insensitive() {
        let a = PoolIdentity::parse("SERVER=DbHost;UID=Admin;Driver={PostgreSQL}").unwrap();
        let b = PoolIdentity::parse("server=dbhost;uid=admin;driver={postgresql}").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_host_key_aliases() {
        let a = PoolIdentity::parse("Host=box;UID=u").unwrap();
        let b = PoolIdentity::parse("Hostname=box;UID=u").unwrap();
        let c = PoolIdentity::parse("Server=box;UID=u").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_dsn_style_falls_back_to_whole_string() {
        let a = PoolIdentity::parse("mem://a").unwrap();
        let b = PoolIdentity::parse("mem://b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.host(), "mem://a");
    }

    #[test]
    fn test_empty_string_is_invalid() {
        assert!(matches!(
            PoolIdentity::parse("   "),
            Err(EngineError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_password_never_part_of_identity() {
        let id = PoolIdentity::parse("Server=h;UID=u;PWD=hunter2").unwrap();
        assert!(!id.to_string().contains("hunter2"));
    }
}
