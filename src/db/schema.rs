/// Schema for the local database.
///
/// Everything lives in a single key-value table partitioned by namespace:
/// `cache` for TTL cache entries, `pending` for the recovery queue and
/// `session` for the signed-in session.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);

CREATE INDEX IF NOT EXISTS idx_kv_namespace ON kv(namespace);
"#;
