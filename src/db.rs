use crate::entities::{Company, Person, Status};
use crate::error::{FetchError, PersistenceError, StatusLookupError};
use crate::shaping::{deserialize_lenient_value, normalize_name, parse_timestamp, parse_value};
use crate::source::DealSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Joined reference to a named entity (`status: { name }` in the record shape)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
}

impl NamedRef {
    pub fn new(name: impl Into<String>) -> Self {
        NamedRef { name: name.into() }
    }
}

/// Deal record as delivered by the deal source, with joined names.
/// Every field except `id` may be missing; see `shaping` for how views treat holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,

    /// Short display code shown on Kanban cards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_code: Option<String>,

    #[serde(default, deserialize_with = "deserialize_lenient_value")]
    pub value: Option<f64>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Presence means the deal is closed
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: Option<NamedRef>,

    #[serde(default)]
    pub company: Option<NamedRef>,

    #[serde(default)]
    pub person: Option<NamedRef>,
}

impl Deal {
    /// Bare deal with only an identity; every other field missing.
    pub fn new(id: impl Into<String>) -> Self {
        Deal {
            id: id.into(),
            deal_code: None,
            value: None,
            created_at: None,
            closed_at: None,
            status: None,
            company: None,
            person: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Card title: the deal code when present, the id otherwise
    pub fn title(&self) -> &str {
        self.deal_code.as_deref().unwrap_or(&self.id)
    }
}

/// Event for audit trail (every status change is recorded)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Reference tables (name → id)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS deal_statuses (
            id TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS companies (
            id TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS persons (
            id TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Deals Table
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS deals (
            id TEXT PRIMARY KEY,
            deal_code TEXT,
            value REAL,
            created_at TEXT,
            closed_at TEXT,
            status_id TEXT REFERENCES deal_statuses(id),
            company_id TEXT REFERENCES companies(id),
            person_id TEXT REFERENCES persons(id)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_deals_status ON deals(status_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_deals_created_at ON deals(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// One CSV row. Blank cells mean "missing".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DealImportRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub deal_code: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub closed_at: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub person: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped_existing: usize,
    pub statuses_created: usize,
    pub companies_created: usize,
    pub persons_created: usize,
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<DealImportRow>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: DealImportRow = result.context("Failed to deserialize deal row")?;
        rows.push(row);
    }

    Ok(rows)
}

fn blank_to_none(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Reference tables the importer is allowed to create rows in
#[derive(Debug, Clone, Copy)]
enum RefTable {
    Statuses,
    Companies,
    Persons,
}

impl RefTable {
    fn name(&self) -> &'static str {
        match self {
            RefTable::Statuses => "deal_statuses",
            RefTable::Companies => "companies",
            RefTable::Persons => "persons",
        }
    }
}

/// Find a reference row by name, creating it when absent. Returns (id, created).
fn get_or_create(tx: &Transaction, table: RefTable, name: &str) -> Result<(String, bool)> {
    let existing: Option<String> = tx
        .query_row(
            &format!("SELECT id FROM {} WHERE name = ?1", table.name()),
            [name],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok((id, false));
    }

    let id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        &format!("INSERT INTO {} (id, name) VALUES (?1, ?2)", table.name()),
        params![id, name],
    )?;
    Ok((id, true))
}

/// Import deal rows. Deals whose id already exists are skipped, so importing
/// the same file twice is harmless.
pub fn import_deals(conn: &mut Connection, rows: &[DealImportRow]) -> Result<ImportSummary> {
    let tx = conn.transaction()?;
    let mut summary = ImportSummary::default();

    for row in rows {
        let deal_id = blank_to_none(&row.id)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM deals WHERE id = ?1)",
            [&deal_id],
            |r| r.get(0),
        )?;
        if exists {
            summary.skipped_existing += 1;
            continue;
        }

        let mut resolve = |table: RefTable, raw: &str| -> Result<Option<String>> {
            match blank_to_none(raw) {
                Some(name) => {
                    let (id, created) = get_or_create(&tx, table, name)?;
                    if created {
                        match table {
                            RefTable::Statuses => summary.statuses_created += 1,
                            RefTable::Companies => summary.companies_created += 1,
                            RefTable::Persons => summary.persons_created += 1,
                        }
                    }
                    Ok(Some(id))
                }
                None => Ok(None),
            }
        };

        let status_id = resolve(RefTable::Statuses, &row.status)?;
        let company_id = resolve(RefTable::Companies, &row.company)?;
        let person_id = resolve(RefTable::Persons, &row.person)?;

        let value = parse_value(&row.value);
        let created_at = parse_timestamp(&row.created_at).map(|dt| dt.to_rfc3339());
        let closed_at = parse_timestamp(&row.closed_at).map(|dt| dt.to_rfc3339());

        tx.execute(
            "INSERT INTO deals (
                id, deal_code, value, created_at, closed_at, status_id, company_id, person_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                deal_id,
                blank_to_none(&row.deal_code),
                value,
                created_at,
                closed_at,
                status_id,
                company_id,
                person_id,
            ],
        )?;

        let event = Event::new(
            "deal_imported",
            "deal",
            &deal_id,
            serde_json::json!({
                "status": blank_to_none(&row.status),
                "value": value,
            }),
            "csv_importer",
        );
        insert_event(&tx, &event)?;

        summary.inserted += 1;
    }

    tx.commit()?;

    tracing::info!(
        inserted = summary.inserted,
        skipped = summary.skipped_existing,
        "deal import committed"
    );

    Ok(summary)
}

// ============================================================================
// QUERIES
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Numeric cells are values, text cells go through `parse_value`, anything
/// else is missing.
fn lenient_value(cell: ValueRef<'_>) -> Option<f64> {
    match cell {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f).filter(|v| v.is_finite()),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().and_then(parse_value),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

/// Only text cells can hold a timestamp; unparseable or non-text cells are missing.
fn lenient_timestamp(cell: ValueRef<'_>) -> Option<DateTime<Utc>> {
    match cell {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().and_then(parse_timestamp),
        _ => None,
    }
}

/// Any scalar cell rendered as text; NULL, blank and binary cells are missing.
fn lenient_text(cell: ValueRef<'_>) -> Option<String> {
    match cell {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .ok()
            .filter(|text| !text.is_empty())
            .map(str::to_string),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

/// All deals with joined status/company/person names, in insertion order.
///
/// Cells of the wrong storage class are data-shape holes, not errors; only a
/// row without a usable id is skipped.
pub fn get_all_deals(conn: &Connection) -> rusqlite::Result<Vec<Deal>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.deal_code, d.value, d.created_at, d.closed_at,
                s.name, c.name, p.name
         FROM deals d
         LEFT JOIN deal_statuses s ON s.id = d.status_id
         LEFT JOIN companies c ON c.id = d.company_id
         LEFT JOIN persons p ON p.id = d.person_id
         ORDER BY d.rowid",
    )?;

    let rows = stmt
        .query_map([], |row| {
            let id = lenient_text(row.get_ref(0)?);
            id.map(|id| Ok(Deal {
                id,
                deal_code: lenient_text(row.get_ref(1)?),
                value: lenient_value(row.get_ref(2)?),
                created_at: lenient_timestamp(row.get_ref(3)?),
                closed_at: lenient_timestamp(row.get_ref(4)?),
                status: lenient_text(row.get_ref(5)?).map(NamedRef::new),
                company: lenient_text(row.get_ref(6)?).map(NamedRef::new),
                person: lenient_text(row.get_ref(7)?).map(NamedRef::new),
            }))
            .transpose()
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let total = rows.len();
    let deals: Vec<Deal> = rows.into_iter().flatten().collect();
    if deals.len() < total {
        tracing::warn!(skipped = total - deals.len(), "deal rows without an id skipped");
    }

    Ok(deals)
}

/// Status lookup by name. An exact match wins; otherwise names are compared
/// after `normalize_name`, which is how Kanban columns are keyed.
pub fn get_status_id_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<String>> {
    let exact: Option<String> = conn
        .query_row(
            "SELECT id FROM deal_statuses WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    if exact.is_some() {
        return Ok(exact);
    }

    let wanted = normalize_name(name);
    Ok(list_statuses(conn)?
        .into_iter()
        .find(|status| normalize_name(&status.name) == wanted)
        .map(|status| status.id))
}

pub fn list_statuses(conn: &Connection) -> rusqlite::Result<Vec<Status>> {
    let mut stmt = conn.prepare("SELECT id, name FROM deal_statuses ORDER BY rowid")?;
    let statuses = stmt
        .query_map([], |row| Ok(Status::new(row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(statuses)
}

pub fn list_companies(conn: &Connection) -> rusqlite::Result<Vec<Company>> {
    let mut stmt = conn.prepare("SELECT id, name FROM companies ORDER BY rowid")?;
    let companies = stmt
        .query_map([], |row| Ok(Company::new(row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(companies)
}

pub fn list_persons(conn: &Connection) -> rusqlite::Result<Vec<Person>> {
    let mut stmt = conn.prepare("SELECT id, name FROM persons ORDER BY rowid")?;
    let persons = stmt
        .query_map([], |row| Ok(Person::new(row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(persons)
}

/// Point one deal at a new status. The update and its audit event commit
/// together or not at all.
pub fn update_deal_status(
    conn: &mut Connection,
    deal_id: &str,
    status_id: &str,
    actor: &str,
) -> std::result::Result<(), PersistenceError> {
    let tx = conn.transaction()?;

    let previous: Option<Option<String>> = tx
        .query_row("SELECT status_id FROM deals WHERE id = ?1", [deal_id], |row| {
            row.get(0)
        })
        .optional()?;

    let previous = match previous {
        Some(previous) => previous,
        None => return Err(PersistenceError::DealNotFound(deal_id.to_string())),
    };

    tx.execute(
        "UPDATE deals SET status_id = ?1 WHERE id = ?2",
        params![status_id, deal_id],
    )?;

    let event = Event::new(
        "deal_status_changed",
        "deal",
        deal_id,
        serde_json::json!({
            "from_status_id": previous,
            "to_status_id": status_id,
        }),
        actor,
    );
    insert_event(&tx, &event).map_err(|e| PersistenceError::Storage(e.to_string()))?;

    tx.commit()?;
    Ok(())
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM deals", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// SQLITE DEAL SOURCE
// ============================================================================

/// Deal Record Source backed by one SQLite connection.
#[derive(Clone)]
pub struct SqliteDealStore {
    conn: Arc<Mutex<Connection>>,
    actor: String,
}

impl SqliteDealStore {
    /// Open (and initialise) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteDealStore {
            conn: Arc::new(Mutex::new(conn)),
            actor: "kanban_board".to_string(),
        }
    }

    /// Actor name recorded on status-change events.
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    fn lock(&self) -> std::result::Result<MutexGuard<'_, Connection>, String> {
        self.conn
            .lock()
            .map_err(|_| "database connection lock poisoned".to_string())
    }

    pub fn import(&self, rows: &[DealImportRow]) -> Result<ImportSummary> {
        let mut conn = self.lock().map_err(anyhow::Error::msg)?;
        import_deals(&mut conn, rows)
    }

    pub fn companies(&self) -> Result<Vec<Company>> {
        let conn = self.lock().map_err(anyhow::Error::msg)?;
        Ok(list_companies(&conn)?)
    }

    pub fn statuses(&self) -> Result<Vec<Status>> {
        let conn = self.lock().map_err(anyhow::Error::msg)?;
        Ok(list_statuses(&conn)?)
    }

    pub fn persons(&self) -> Result<Vec<Person>> {
        let conn = self.lock().map_err(anyhow::Error::msg)?;
        Ok(list_persons(&conn)?)
    }

    pub fn events_for_deal(&self, deal_id: &str) -> Result<Vec<Event>> {
        let conn = self.lock().map_err(anyhow::Error::msg)?;
        get_events_for_entity(&conn, "deal", deal_id)
    }

    fn fetch_blocking(&self) -> std::result::Result<Vec<Deal>, FetchError> {
        let conn = self.lock().map_err(FetchError::Storage)?;
        Ok(get_all_deals(&conn)?)
    }

    fn lookup_blocking(&self, name: &str) -> std::result::Result<Option<String>, StatusLookupError> {
        let conn = self.lock().map_err(StatusLookupError::Storage)?;
        Ok(get_status_id_by_name(&conn, name)?)
    }

    fn update_blocking(&self, deal_id: &str, status_id: &str) -> std::result::Result<(), PersistenceError> {
        let mut conn = self.lock().map_err(PersistenceError::Storage)?;
        update_deal_status(&mut conn, deal_id, status_id, &self.actor)
    }
}

#[async_trait]
impl DealSource for SqliteDealStore {
    async fn fetch_deals(&self) -> std::result::Result<Vec<Deal>, FetchError> {
        self.fetch_blocking()
    }

    async fn lookup_status_id_by_name(
        &self,
        name: &str,
    ) -> std::result::Result<Option<String>, StatusLookupError> {
        self.lookup_blocking(name)
    }

    async fn update_deal_status(
        &self,
        deal_id: &str,
        status_id: &str,
    ) -> std::result::Result<(), PersistenceError> {
        self.update_blocking(deal_id, status_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper function to create import rows with the fields tests care about
    fn create_test_row(
        id: &str,
        value: &str,
        created_at: &str,
        status: &str,
        company: &str,
        person: &str,
    ) -> DealImportRow {
        DealImportRow {
            id: id.to_string(),
            deal_code: format!("DEAL-{}", id),
            value: value.to_string(),
            created_at: created_at.to_string(),
            closed_at: String::new(),
            status: status.to_string(),
            company: company.to_string(),
            person: person.to_string(),
        }
    }

    fn seeded_connection() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let rows = vec![
            create_test_row("D1", "100", "2024-01-05", "Open", "Acme", "Ana"),
            create_test_row("D2", "200", "2024-02-05", "Open", "Globex", ""),
            create_test_row("D3", "", "", "", "", ""),
        ];
        import_deals(&mut conn, &rows).unwrap();
        conn
    }

    #[test]
    fn test_import_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let rows = vec![
            create_test_row("D1", "100", "2024-01-05", "Open", "Acme", "Ana"),
            create_test_row("D2", "$2,000", "2024-02-05", "Won", "Acme", "Ben"),
        ];

        let first = import_deals(&mut conn, &rows).unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.statuses_created, 2);
        assert_eq!(first.companies_created, 1);
        assert_eq!(first.persons_created, 2);

        let second = import_deals(&mut conn, &rows).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped_existing, 2);
        assert_eq!(verify_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_import_generates_missing_ids() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let rows = vec![create_test_row("", "10", "", "Open", "", "")];
        let summary = import_deals(&mut conn, &rows).unwrap();
        assert_eq!(summary.inserted, 1);

        let deals = get_all_deals(&conn).unwrap();
        assert_eq!(deals.len(), 1);
        assert!(uuid::Uuid::parse_str(&deals[0].id).is_ok());
    }

    #[test]
    fn test_get_all_deals_joins_names_and_keeps_holes() {
        let conn = seeded_connection();
        let deals = get_all_deals(&conn).unwrap();

        assert_eq!(deals.len(), 3);
        assert_eq!(deals[0].id, "D1");
        assert_eq!(deals[0].value, Some(100.0));
        assert_eq!(deals[0].status, Some(NamedRef::new("Open")));
        assert_eq!(deals[0].company, Some(NamedRef::new("Acme")));
        assert_eq!(deals[0].person, Some(NamedRef::new("Ana")));
        assert!(deals[0].created_at.is_some());

        assert_eq!(deals[1].person, None);

        let bare = &deals[2];
        assert_eq!(bare.value, None);
        assert_eq!(bare.status, None);
        assert_eq!(bare.created_at, None);
    }

    #[test]
    fn test_status_lookup() {
        let conn = seeded_connection();
        assert!(get_status_id_by_name(&conn, "Open").unwrap().is_some());
        assert_eq!(get_status_id_by_name(&conn, "Won").unwrap(), None);
        assert_eq!(get_status_id_by_name(&conn, "open").unwrap(), None);
    }

    #[test]
    fn test_status_lookup_matches_padded_names() {
        let conn = seeded_connection();
        conn.execute(
            "INSERT INTO deal_statuses (id, name) VALUES ('won-id', 'Won ')",
            [],
        )
        .unwrap();

        assert_eq!(get_status_id_by_name(&conn, "Won").unwrap(), Some("won-id".to_string()));
        assert_eq!(get_status_id_by_name(&conn, "Won ").unwrap(), Some("won-id".to_string()));
        assert_eq!(get_status_id_by_name(&conn, "won").unwrap(), None);
    }

    #[test]
    fn test_get_all_deals_tolerates_mistyped_cells() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO deals (id, value, created_at) VALUES ('D1', 'n/a', 42);
             INSERT INTO deals (id, value, created_at) VALUES ('D2', 100, '2024-01-05');
             INSERT INTO deals (id, value, closed_at) VALUES ('D3', '$1,250', X'00FF');
             INSERT INTO deals (id, value) VALUES (NULL, 999);",
        )
        .unwrap();

        let deals = get_all_deals(&conn).unwrap();
        let ids: Vec<&str> = deals.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["D1", "D2", "D3"]);

        assert_eq!(deals[0].value, None);
        assert_eq!(deals[0].created_at, None);
        assert_eq!(deals[1].value, Some(100.0));
        assert!(deals[1].created_at.is_some());
        assert_eq!(deals[2].value, Some(1250.0));
        assert_eq!(deals[2].closed_at, None);

        assert_eq!(crate::aggregation::total_value(&deals), 1350.0);
    }

    #[test]
    fn test_update_deal_status_records_event() {
        let mut conn = seeded_connection();
        conn.execute(
            "INSERT INTO deal_statuses (id, name) VALUES ('won-id', 'Won')",
            [],
        )
        .unwrap();

        update_deal_status(&mut conn, "D1", "won-id", "test_actor").unwrap();

        let deals = get_all_deals(&conn).unwrap();
        assert_eq!(deals[0].status, Some(NamedRef::new("Won")));

        let events = get_events_for_entity(&conn, "deal", "D1").unwrap();
        assert_eq!(events[0].event_type, "deal_status_changed");
        assert_eq!(events[0].actor, "test_actor");
        assert_eq!(events[0].data["to_status_id"], "won-id");
    }

    #[test]
    fn test_update_unknown_deal_fails_without_side_effects() {
        let mut conn = seeded_connection();
        let status_id = get_status_id_by_name(&conn, "Open").unwrap().unwrap();

        let err = update_deal_status(&mut conn, "missing", &status_id, "test").unwrap_err();
        assert_eq!(err, PersistenceError::DealNotFound("missing".to_string()));
        assert!(get_events_for_entity(&conn, "deal", "missing").unwrap().is_empty());
    }

    #[test]
    fn test_update_with_unknown_status_id_rolls_back() {
        let mut conn = seeded_connection();

        let err = update_deal_status(&mut conn, "D1", "no-such-status", "test").unwrap_err();
        assert!(matches!(err, PersistenceError::Storage(_)));

        let deals = get_all_deals(&conn).unwrap();
        assert_eq!(deals[0].status, Some(NamedRef::new("Open")));
        let changes: Vec<Event> = get_events_for_entity(&conn, "deal", "D1")
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == "deal_status_changed")
            .collect();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_reference_listings() {
        let conn = seeded_connection();
        let statuses = list_statuses(&conn).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "Open");

        let companies = list_companies(&conn).unwrap();
        let names: Vec<&str> = companies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Globex"]);

        assert_eq!(list_persons(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_load_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deals.csv");
        std::fs::write(
            &path,
            "id,deal_code,value,created_at,closed_at,status,company,person\n\
             D1,ACME-1,1200,2024-01-10,,Open,Acme,Ana\n\
             D2,,,,,,,\n",
        )
        .unwrap();

        let rows = load_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].deal_code, "ACME-1");
        assert_eq!(rows[1].status, "");
    }

    #[tokio::test]
    async fn test_store_as_deal_source() {
        let store = SqliteDealStore::from_connection(seeded_connection());

        let deals = store.fetch_deals().await.unwrap();
        assert_eq!(deals.len(), 3);

        let open_id = store.lookup_status_id_by_name("Open").await.unwrap();
        assert!(open_id.is_some());
        assert_eq!(store.lookup_status_id_by_name("Won").await.unwrap(), None);

        store
            .update_deal_status("D3", open_id.as_deref().unwrap())
            .await
            .unwrap();
        let deals = store.fetch_deals().await.unwrap();
        assert_eq!(deals[2].status, Some(NamedRef::new("Open")));
        assert_eq!(store.events_for_deal("D3").unwrap()[0].actor, "kanban_board");
    }
}
