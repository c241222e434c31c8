pub const SCHEMA: &str = r#"
-- seen_items: one row per fingerprint ever decided on. The primary key is
-- the claim; rows are append-only.
CREATE TABLE IF NOT EXISTS seen_items (
    fingerprint TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('sent', 'rejected')),
    subscriber_count INTEGER NOT NULL DEFAULT 0,
    relevance_score INTEGER,
    credibility_score INTEGER,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_seen_items_status ON seen_items(status);

CREATE TRIGGER IF NOT EXISTS seen_items_no_update
BEFORE UPDATE ON seen_items
BEGIN
    SELECT RAISE(ABORT, 'seen_items is append-only');
END;

CREATE TRIGGER IF NOT EXISTS seen_items_no_delete
BEFORE DELETE ON seen_items
BEGIN
    SELECT RAISE(ABORT, 'seen_items is append-only');
END;

-- subscribers table
CREATE TABLE IF NOT EXISTS subscribers (
    chat_id INTEGER PRIMARY KEY NOT NULL,
    username TEXT,
    first_name TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    joined_at TEXT NOT NULL DEFAULT (datetime('now')),
    unsubscribed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_subscribers_is_active ON subscribers(is_active);

-- delivery_log table (per-subscriber outcome of each broadcast)
CREATE TABLE IF NOT EXISTS delivery_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    chat_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    error TEXT,
    logged_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_delivery_log_fingerprint ON delivery_log(fingerprint);
"#;
