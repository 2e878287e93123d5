/// Per-driver capability switches, keyed by the driver named in the
/// connection string. This is the whole dialect-dispatch surface: no SQL
/// rewriting happens in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCapabilities {
    pub driver_name: &'static str,
    pub supports_cancel: bool,
    pub supports_prepared_statements: bool,
    /// Hint for stream chunk sizing; requests above it are clamped.
    pub max_chunk_rows: u32,
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self {
            driver_name: "generic",
            supports_cancel: true,
            supports_prepared_statements: true,
            max_chunk_rows: 65_536,
        }
    }
}

impl DriverCapabilities {
    pub fn detect(conn_string: &str) -> Self {
        let lowered = conn_string.to_lowercase();
        if lowered.contains("sql server")
            || lowered.contains("mssql")
            || lowered.contains("driver={odbc driver")
        {
            return Self {
                driver_name: "sqlserver",
                max_chunk_rows: 10_000,
                ..Self::default()
            };
        }
        if lowered.contains("postgres") {
            return Self {
                driver_name: "postgres",
                ..Self::default()
            };
        }
        if lowered.contains("mysql") || lowered.contains("mariadb") {
            return Self {
                driver_name: "mysql",
                ..Self::default()
            };
        }
        if lowered.contains("oracle") {
            return Self {
                driver_name: "oracle",
                max_chunk_rows: 10_000,
                ..Self::default()
            };
        }
        if lowered.contains("sqlite") {
            // The SQLite ODBC driver has no usable SQLCancel.
            return Self {
                driver_name: "sqlite",
                supports_cancel: false,
                ..Self::default()
            };
        }
        Self::default()
    }
}
