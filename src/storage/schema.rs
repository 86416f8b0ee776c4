//! Database schema definitions

/// SQL to create the entities table
pub const CREATE_ENTITIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    canonical_name TEXT NOT NULL CHECK (length(trim(canonical_name)) > 0),
    type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    confidence_score REAL NOT NULL CHECK (confidence_score BETWEEN 0.0 AND 1.0),
    source TEXT NOT NULL DEFAULT '',
    aliases TEXT NOT NULL DEFAULT '[]',
    embedding_ref TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the relations table
pub const CREATE_RELATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relations (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL REFERENCES entities(id),
    predicate TEXT NOT NULL,
    object_id TEXT NOT NULL REFERENCES entities(id),
    confidence_score REAL NOT NULL CHECK (confidence_score BETWEEN 0.0 AND 1.0),
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
)
"#;

/// SQL to create the news_events table
pub const CREATE_NEWS_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS news_events (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    publish_time TEXT,
    content_hash TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name)",
    "CREATE INDEX IF NOT EXISTS idx_entities_canonical ON entities(canonical_name)",
    "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(type)",
    "CREATE INDEX IF NOT EXISTS idx_entities_updated ON entities(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_relations_subject ON relations(subject_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_object ON relations(object_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_predicate ON relations(predicate)",
    "CREATE INDEX IF NOT EXISTS idx_news_created ON news_events(created_at)",
];

/// All relational schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_ENTITIES_TABLE,
        CREATE_RELATIONS_TABLE,
        CREATE_NEWS_EVENTS_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}

/// SQL to create the vector records table (lives in the vector database)
pub const CREATE_VECTORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vectors (
    id TEXT PRIMARY KEY,
    content_type TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
)
"#;

/// Collection settings; the dimension is fixed once written
pub const CREATE_COLLECTION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS collection (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// All vector schema creation statements
pub fn vector_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_VECTORS_TABLE,
        CREATE_COLLECTION_TABLE,
        "CREATE INDEX IF NOT EXISTS idx_vectors_type ON vectors(content_type)",
    ]
}
