//! SQLite schema definition

/// SQL schema for the corpus database
pub const SCHEMA_SQL: &str = r#"
-- Sermons: root of a transcript
CREATE TABLE IF NOT EXISTS sermons (
    id INTEGER PRIMARY KEY,
    uid TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    date TEXT,
    source_hash TEXT,
    ingested_at TEXT NOT NULL
);

-- Sections: ordered subdivisions of a sermon
CREATE TABLE IF NOT EXISTS sections (
    id INTEGER PRIMARY KEY,
    uid TEXT NOT NULL UNIQUE,
    sermon_uid TEXT NOT NULL,
    number TEXT,
    order_index INTEGER NOT NULL
);

-- Paragraphs: the unit an operator selects
CREATE TABLE IF NOT EXISTS paragraphs (
    id INTEGER PRIMARY KEY,
    uid TEXT NOT NULL UNIQUE,
    section_uid TEXT NOT NULL,
    sermon_uid TEXT NOT NULL,
    order_index INTEGER NOT NULL
);

-- Blocks: leaf text units, optionally carrying an embedding (little-endian f32)
CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY,
    uid TEXT NOT NULL UNIQUE,
    paragraph_uid TEXT NOT NULL,
    section_uid TEXT NOT NULL,
    sermon_uid TEXT NOT NULL,
    text TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'normal',
    order_index INTEGER NOT NULL,
    indented INTEGER NOT NULL DEFAULT 0,
    italic_segments TEXT,
    embedding BLOB
);

-- Resumption ledger for the embedding job
CREATE TABLE IF NOT EXISTS embedding_progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_uid TEXT NOT NULL UNIQUE,
    processed_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'completed'
);

-- Blocks whose remote vector predates their current text
CREATE TABLE IF NOT EXISTS vector_resync (
    block_uid TEXT PRIMARY KEY,
    marked_at TEXT NOT NULL
);

-- Paragraph text projection: each paragraph's blocks joined in order
CREATE TABLE IF NOT EXISTS paragraphs_text (
    id INTEGER PRIMARY KEY,
    uid TEXT NOT NULL UNIQUE,
    section_uid TEXT NOT NULL,
    sermon_uid TEXT NOT NULL,
    order_index INTEGER NOT NULL,
    text TEXT NOT NULL
);

-- Sliding windows of 2-3 consecutive same-section paragraphs
CREATE TABLE IF NOT EXISTS paragraph_windows (
    id INTEGER PRIMARY KEY,
    uid TEXT NOT NULL UNIQUE,
    paragraph_uids TEXT NOT NULL,
    section_uid TEXT NOT NULL,
    sermon_uid TEXT NOT NULL,
    window_size INTEGER NOT NULL,
    start_order_index INTEGER NOT NULL,
    text TEXT NOT NULL
);

-- Full-text indexes (external content). unicode61 without porter: terms match
-- whole tokens only, case and diacritics folded.
CREATE VIRTUAL TABLE IF NOT EXISTS blocks_fts USING fts5(
    text,
    content='blocks',
    content_rowid='id',
    tokenize='unicode61 remove_diacritics 2'
);

CREATE VIRTUAL TABLE IF NOT EXISTS paragraphs_fts USING fts5(
    text,
    content='paragraphs_text',
    content_rowid='id',
    tokenize='unicode61 remove_diacritics 2'
);

CREATE VIRTUAL TABLE IF NOT EXISTS paragraph_windows_fts USING fts5(
    text,
    content='paragraph_windows',
    content_rowid='id',
    tokenize='unicode61 remove_diacritics 2'
);

-- Block text index
CREATE TRIGGER IF NOT EXISTS blocks_fts_ai AFTER INSERT ON blocks BEGIN
    INSERT INTO blocks_fts(rowid, text) VALUES (new.id, new.text);
END;

CREATE TRIGGER IF NOT EXISTS blocks_fts_ad AFTER DELETE ON blocks BEGIN
    INSERT INTO blocks_fts(blocks_fts, rowid, text) VALUES ('delete', old.id, old.text);
END;

CREATE TRIGGER IF NOT EXISTS blocks_fts_au AFTER UPDATE OF text ON blocks BEGIN
    INSERT INTO blocks_fts(blocks_fts, rowid, text) VALUES ('delete', old.id, old.text);
    INSERT INTO blocks_fts(rowid, text) VALUES (new.id, new.text);
END;

-- Paragraph projection: recomputed from scratch for the touched paragraph(s)
CREATE TRIGGER IF NOT EXISTS blocks_paragraph_ai AFTER INSERT ON blocks BEGIN
    DELETE FROM paragraphs_text WHERE uid = new.paragraph_uid;
    INSERT INTO paragraphs_text (uid, section_uid, sermon_uid, order_index, text)
    SELECT p.uid, p.section_uid, p.sermon_uid, p.order_index,
           (SELECT group_concat(t.text, ' ') FROM
               (SELECT b.text FROM blocks b WHERE b.paragraph_uid = p.uid ORDER BY b.order_index, b.id) t)
    FROM paragraphs p
    WHERE p.uid = new.paragraph_uid
      AND EXISTS (SELECT 1 FROM blocks b WHERE b.paragraph_uid = p.uid);
END;

CREATE TRIGGER IF NOT EXISTS blocks_paragraph_ad AFTER DELETE ON blocks BEGIN
    DELETE FROM paragraphs_text WHERE uid = old.paragraph_uid;
    INSERT INTO paragraphs_text (uid, section_uid, sermon_uid, order_index, text)
    SELECT p.uid, p.section_uid, p.sermon_uid, p.order_index,
           (SELECT group_concat(t.text, ' ') FROM
               (SELECT b.text FROM blocks b WHERE b.paragraph_uid = p.uid ORDER BY b.order_index, b.id) t)
    FROM paragraphs p
    WHERE p.uid = old.paragraph_uid
      AND EXISTS (SELECT 1 FROM blocks b WHERE b.paragraph_uid = p.uid);
END;

CREATE TRIGGER IF NOT EXISTS blocks_paragraph_au
AFTER UPDATE OF text, paragraph_uid, order_index ON blocks BEGIN
    DELETE FROM paragraphs_text WHERE uid IN (old.paragraph_uid, new.paragraph_uid);
    INSERT INTO paragraphs_text (uid, section_uid, sermon_uid, order_index, text)
    SELECT p.uid, p.section_uid, p.sermon_uid, p.order_index,
           (SELECT group_concat(t.text, ' ') FROM
               (SELECT b.text FROM blocks b WHERE b.paragraph_uid = p.uid ORDER BY b.order_index, b.id) t)
    FROM paragraphs p
    WHERE p.uid IN (old.paragraph_uid, new.paragraph_uid)
      AND EXISTS (SELECT 1 FROM blocks b WHERE b.paragraph_uid = p.uid);
END;

CREATE TRIGGER IF NOT EXISTS paragraphs_ad AFTER DELETE ON paragraphs BEGIN
    DELETE FROM paragraphs_text WHERE uid = old.uid;
END;

-- Paragraph projection index
CREATE TRIGGER IF NOT EXISTS paragraphs_text_ai AFTER INSERT ON paragraphs_text BEGIN
    INSERT INTO paragraphs_fts(rowid, text) VALUES (new.id, new.text);
END;

CREATE TRIGGER IF NOT EXISTS paragraphs_text_ad AFTER DELETE ON paragraphs_text BEGIN
    INSERT INTO paragraphs_fts(paragraphs_fts, rowid, text) VALUES ('delete', old.id, old.text);
END;

CREATE TRIGGER IF NOT EXISTS paragraphs_text_au AFTER UPDATE ON paragraphs_text BEGIN
    INSERT INTO paragraphs_fts(paragraphs_fts, rowid, text) VALUES ('delete', old.id, old.text);
    INSERT INTO paragraphs_fts(rowid, text) VALUES (new.id, new.text);
END;

-- Window index
CREATE TRIGGER IF NOT EXISTS paragraph_windows_ai AFTER INSERT ON paragraph_windows BEGIN
    INSERT INTO paragraph_windows_fts(rowid, text) VALUES (new.id, new.text);
END;

CREATE TRIGGER IF NOT EXISTS paragraph_windows_ad AFTER DELETE ON paragraph_windows BEGIN
    INSERT INTO paragraph_windows_fts(paragraph_windows_fts, rowid, text)
    VALUES ('delete', old.id, old.text);
END;

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_sermons_date ON sermons(date);
CREATE INDEX IF NOT EXISTS idx_sections_sermon ON sections(sermon_uid, order_index);
CREATE INDEX IF NOT EXISTS idx_paragraphs_section ON paragraphs(section_uid, order_index);
CREATE INDEX IF NOT EXISTS idx_paragraphs_sermon ON paragraphs(sermon_uid);
CREATE INDEX IF NOT EXISTS idx_blocks_paragraph ON blocks(paragraph_uid, order_index);
CREATE INDEX IF NOT EXISTS idx_blocks_sermon ON blocks(sermon_uid);
CREATE INDEX IF NOT EXISTS idx_blocks_unembedded ON blocks(id) WHERE embedding IS NULL;
CREATE INDEX IF NOT EXISTS idx_paragraphs_text_sermon ON paragraphs_text(sermon_uid);
CREATE INDEX IF NOT EXISTS idx_windows_sermon ON paragraph_windows(sermon_uid);
"#;
