//! Guards for the DSN-driven end-to-end suite. Tests call `e2e_dsn()` and
//! return early when no database is configured, so the suite is green on
//! machines without an ODBC setup.

use odbc_fast_engine::test_helpers;

fn parse_env_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Connection string for end-to-end tests, or `None` when they should be
/// skipped. Requires both `ENABLE_E2E_TESTS` and `ODBC_FAST_TEST_DSN`.
pub fn e2e_dsn() -> Option<String> {
    let _ = env_logger::builder().is_test(true).try_init();
    test_helpers::load_dotenv();

    let enabled = std::env::var("ENABLE_E2E_TESTS")
        .ok()
        .as_deref()
        .and_then(parse_env_bool)
        == Some(true);
    if !enabled {
        return None;
    }
    test_helpers::test_dsn()
}

/// Skip helper keeping the skip message uniform across the suite.
#[macro_export]
macro_rules! require_dsn {
    () => {
        match $crate::helpers::e2e::e2e_dsn() {
            Some(dsn) => dsn,
            None => {
                eprintln!("skipping: ENABLE_E2E_TESTS / ODBC_FAST_TEST_DSN not configured");
                return;
            }
        }
    };
}
