//! Credential store
//!
//! Implements the protocol client's storage traits (`SignalStore`,
//! `AppSyncStore`, `ProtocolStore`, `DeviceStore`) over a single SQLite file at
//! `<data_dir>/auth/session.db`. The bundle is opaque to the gateway apart from
//! two questions it needs answered: "is a device paired?" and "who is it?".

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use wacore::appstate::hash::HashState;
use wacore::appstate::processor::AppStateMutationMAC;
use wacore::store::error::{db_err, Result, StoreError};
use wacore::store::traits::{
    AppStateSyncKey, AppSyncStore, DeviceListRecord, DeviceStore, LidPnMappingEntry, ProtocolStore,
    SignalStore,
};
use wacore::store::Device;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Only one device per store; every row is keyed by it.
const DEVICE_ID: i32 = 1;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS wa_device (
        id INTEGER PRIMARY KEY,
        data BLOB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS wa_identities (
        address TEXT NOT NULL, device_id INTEGER NOT NULL, key BLOB NOT NULL,
        PRIMARY KEY (address, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_sessions (
        address TEXT NOT NULL, device_id INTEGER NOT NULL, record BLOB NOT NULL,
        PRIMARY KEY (address, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_prekeys (
        id INTEGER NOT NULL, device_id INTEGER NOT NULL, record BLOB NOT NULL,
        uploaded INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (id, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_signed_prekeys (
        id INTEGER NOT NULL, device_id INTEGER NOT NULL, record BLOB NOT NULL,
        PRIMARY KEY (id, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_sender_keys (
        address TEXT NOT NULL, device_id INTEGER NOT NULL, record BLOB NOT NULL,
        PRIMARY KEY (address, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_app_state_keys (
        key_id BLOB NOT NULL, device_id INTEGER NOT NULL, data TEXT NOT NULL,
        PRIMARY KEY (key_id, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_app_state_versions (
        name TEXT NOT NULL, device_id INTEGER NOT NULL, data TEXT NOT NULL,
        PRIMARY KEY (name, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_app_state_mutation_macs (
        name TEXT NOT NULL, version INTEGER NOT NULL, index_mac BLOB NOT NULL,
        value_mac BLOB NOT NULL, device_id INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_mutation_macs_lookup
        ON wa_app_state_mutation_macs (name, index_mac, device_id)",
    "CREATE TABLE IF NOT EXISTS wa_skdm_recipients (
        group_jid TEXT NOT NULL, device_jid TEXT NOT NULL, device_id INTEGER NOT NULL,
        PRIMARY KEY (group_jid, device_jid, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_lid_pn_mapping (
        lid TEXT NOT NULL, phone_number TEXT NOT NULL,
        created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL,
        learning_source TEXT NOT NULL DEFAULT '', device_id INTEGER NOT NULL,
        PRIMARY KEY (lid, device_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_lid_pn_phone
        ON wa_lid_pn_mapping (phone_number, device_id)",
    "CREATE TABLE IF NOT EXISTS wa_base_keys (
        address TEXT NOT NULL, message_id TEXT NOT NULL, base_key BLOB NOT NULL,
        device_id INTEGER NOT NULL,
        PRIMARY KEY (address, message_id, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_device_registry (
        user TEXT NOT NULL, device_id INTEGER NOT NULL, data TEXT NOT NULL,
        PRIMARY KEY (user, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_sender_key_forget (
        group_jid TEXT NOT NULL, participant TEXT NOT NULL, device_id INTEGER NOT NULL,
        PRIMARY KEY (group_jid, participant, device_id)
    )",
];

/// Every table holding credential material, in wipe order.
const TABLES: &[&str] = &[
    "wa_device",
    "wa_identities",
    "wa_sessions",
    "wa_prekeys",
    "wa_signed_prekeys",
    "wa_sender_keys",
    "wa_app_state_keys",
    "wa_app_state_versions",
    "wa_app_state_mutation_macs",
    "wa_skdm_recipients",
    "wa_lid_pn_mapping",
    "wa_base_keys",
    "wa_device_registry",
    "wa_sender_key_forget",
];

const LID_COLUMNS: &str = "lid, phone_number, created_at, updated_at, learning_source";

/// The account a paired device belongs to, as reported by `/session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairedUser {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// SQLite-backed credential bundle for the protocol client.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (or create) the store file, creating parent directories as needed.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection(e.to_string()))?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::connect(opts, 4).await
    }

    /// Private in-memory store. A single connection, since every SQLite
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::connect(opts, 1).await
    }

    async fn connect(opts: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        for stmt in SCHEMA {
            store.execute(sqlx::query(stmt)).await?;
        }
        Ok(store)
    }

    /// Delete the on-disk credential directory. Used before a store is opened
    /// (`RESET_SESSION`, `wagate reset`); a missing directory is not an error.
    pub fn remove_dir(auth_dir: &Path) -> std::io::Result<()> {
        match std::fs::remove_dir_all(auth_dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Drop every stored credential while the store stays open. The next
    /// connection starts unpaired and issues a QR.
    pub async fn wipe(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for table in TABLES {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// A device record exists and decodes.
    pub async fn is_paired(&self) -> Result<bool> {
        Ok(self.decode_device().await?.is_some())
    }

    /// Account of the stored device, once pairing assigned it a phone JID.
    pub async fn paired_user(&self) -> Result<Option<PairedUser>> {
        let Some(device) = self.decode_device().await? else {
            return Ok(None);
        };
        Ok(device.pn.as_ref().map(|jid| PairedUser {
            id: jid.to_string(),
            name: Some(device.push_name.clone()).filter(|n| !n.is_empty()),
        }))
    }

    async fn decode_device(&self) -> Result<Option<Device>> {
        let data = self
            .bytes(sqlx::query("SELECT data FROM wa_device WHERE id = ?").bind(DEVICE_ID), "data")
            .await?;
        Ok(data.and_then(|d| rmp_serde::from_slice::<Device>(&d).ok()))
    }

    async fn execute(&self, query: SqliteQuery<'_>) -> Result<()> {
        query.execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    async fn fetch_optional(&self, query: SqliteQuery<'_>) -> Result<Option<SqliteRow>> {
        query.fetch_optional(&self.pool).await.map_err(db_err)
    }

    async fn fetch_all(&self, query: SqliteQuery<'_>) -> Result<Vec<SqliteRow>> {
        query.fetch_all(&self.pool).await.map_err(db_err)
    }

    async fn bytes(&self, query: SqliteQuery<'_>, column: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.fetch_optional(query).await?.map(|r| r.get(column)))
    }

    async fn json<T: DeserializeOwned>(&self, query: SqliteQuery<'_>) -> Result<Option<T>> {
        match self.fetch_optional(query).await? {
            Some(row) => {
                let text: String = row.get("data");
                serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            }
            None => Ok(None),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn lid_entry(row: &SqliteRow) -> LidPnMappingEntry {
    LidPnMappingEntry {
        lid: row.get("lid"),
        phone_number: row.get("phone_number"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        learning_source: row.get("learning_source"),
    }
}

#[async_trait]
impl SignalStore for SessionStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        self.execute(
            sqlx::query(
                "INSERT INTO wa_identities (address, device_id, key) VALUES (?, ?, ?)
                 ON CONFLICT(address, device_id) DO UPDATE SET key = excluded.key",
            )
            .bind(address)
            .bind(DEVICE_ID)
            .bind(key.to_vec()),
        )
        .await
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.bytes(
            sqlx::query("SELECT key FROM wa_identities WHERE address = ? AND device_id = ?")
                .bind(address)
                .bind(DEVICE_ID),
            "key",
        )
        .await
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        self.execute(
            sqlx::query("DELETE FROM wa_identities WHERE address = ? AND device_id = ?")
                .bind(address)
                .bind(DEVICE_ID),
        )
        .await
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.bytes(
            sqlx::query("SELECT record FROM wa_sessions WHERE address = ? AND device_id = ?")
                .bind(address)
                .bind(DEVICE_ID),
            "record",
        )
        .await
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        self.execute(
            sqlx::query(
                "INSERT INTO wa_sessions (address, device_id, record) VALUES (?, ?, ?)
                 ON CONFLICT(address, device_id) DO UPDATE SET record = excluded.record",
            )
            .bind(address)
            .bind(DEVICE_ID)
            .bind(session),
        )
        .await
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        self.execute(
            sqlx::query("DELETE FROM wa_sessions WHERE address = ? AND device_id = ?")
                .bind(address)
                .bind(DEVICE_ID),
        )
        .await
    }

    async fn store_prekey(&self, id: u32, record: &[u8], uploaded: bool) -> Result<()> {
        self.execute(
            sqlx::query(
                "INSERT INTO wa_prekeys (id, device_id, record, uploaded) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id, device_id) DO UPDATE
                 SET record = excluded.record, uploaded = excluded.uploaded",
            )
            .bind(id)
            .bind(DEVICE_ID)
            .bind(record)
            .bind(uploaded),
        )
        .await
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.bytes(
            sqlx::query("SELECT record FROM wa_prekeys WHERE id = ? AND device_id = ?")
                .bind(id)
                .bind(DEVICE_ID),
            "record",
        )
        .await
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        self.execute(
            sqlx::query("DELETE FROM wa_prekeys WHERE id = ? AND device_id = ?")
                .bind(id)
                .bind(DEVICE_ID),
        )
        .await
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        self.execute(
            sqlx::query(
                "INSERT INTO wa_signed_prekeys (id, device_id, record) VALUES (?, ?, ?)
                 ON CONFLICT(id, device_id) DO UPDATE SET record = excluded.record",
            )
            .bind(id)
            .bind(DEVICE_ID)
            .bind(record),
        )
        .await
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.bytes(
            sqlx::query("SELECT record FROM wa_signed_prekeys WHERE id = ? AND device_id = ?")
                .bind(id)
                .bind(DEVICE_ID),
            "record",
        )
        .await
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        let rows = self
            .fetch_all(
                sqlx::query("SELECT id, record FROM wa_signed_prekeys WHERE device_id = ?")
                    .bind(DEVICE_ID),
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<i64, _>("id") as u32, r.get("record")))
            .collect())
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        self.execute(
            sqlx::query("DELETE FROM wa_signed_prekeys WHERE id = ? AND device_id = ?")
                .bind(id)
                .bind(DEVICE_ID),
        )
        .await
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        self.execute(
            sqlx::query(
                "INSERT INTO wa_sender_keys (address, device_id, record) VALUES (?, ?, ?)
                 ON CONFLICT(address, device_id) DO UPDATE SET record = excluded.record",
            )
            .bind(address)
            .bind(DEVICE_ID)
            .bind(record),
        )
        .await
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.bytes(
            sqlx::query("SELECT record FROM wa_sender_keys WHERE address = ? AND device_id = ?")
                .bind(address)
                .bind(DEVICE_ID),
            "record",
        )
        .await
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        self.execute(
            sqlx::query("DELETE FROM wa_sender_keys WHERE address = ? AND device_id = ?")
                .bind(address)
                .bind(DEVICE_ID),
        )
        .await
    }
}

#[async_trait]
impl AppSyncStore for SessionStore {
    async fn get_sync_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>> {
        self.json(
            sqlx::query("SELECT data FROM wa_app_state_keys WHERE key_id = ? AND device_id = ?")
                .bind(key_id)
                .bind(DEVICE_ID),
        )
        .await
    }

    async fn set_sync_key(&self, key_id: &[u8], key: AppStateSyncKey) -> Result<()> {
        let json = to_json(&key)?;
        self.execute(
            sqlx::query(
                "INSERT INTO wa_app_state_keys (key_id, device_id, data) VALUES (?, ?, ?)
                 ON CONFLICT(key_id, device_id) DO UPDATE SET data = excluded.data",
            )
            .bind(key_id)
            .bind(DEVICE_ID)
            .bind(json),
        )
        .await
    }

    async fn get_version(&self, name: &str) -> Result<HashState> {
        let state = self
            .json(
                sqlx::query(
                    "SELECT data FROM wa_app_state_versions WHERE name = ? AND device_id = ?",
                )
                .bind(name)
                .bind(DEVICE_ID),
            )
            .await?;
        Ok(state.unwrap_or_default())
    }

    async fn set_version(&self, name: &str, state: HashState) -> Result<()> {
        let json = to_json(&state)?;
        self.execute(
            sqlx::query(
                "INSERT INTO wa_app_state_versions (name, device_id, data) VALUES (?, ?, ?)
                 ON CONFLICT(name, device_id) DO UPDATE SET data = excluded.data",
            )
            .bind(name)
            .bind(DEVICE_ID)
            .bind(json),
        )
        .await
    }

    async fn put_mutation_macs(
        &self,
        name: &str,
        version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for m in mutations {
            sqlx::query(
                "INSERT INTO wa_app_state_mutation_macs
                 (name, version, index_mac, value_mac, device_id) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(name)
            .bind(version as i64)
            .bind(&m.index_mac)
            .bind(&m.value_mac)
            .bind(DEVICE_ID)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }

    async fn get_mutation_mac(&self, name: &str, index_mac: &[u8]) -> Result<Option<Vec<u8>>> {
        self.bytes(
            sqlx::query(
                "SELECT value_mac FROM wa_app_state_mutation_macs
                 WHERE name = ? AND index_mac = ? AND device_id = ?",
            )
            .bind(name)
            .bind(index_mac)
            .bind(DEVICE_ID),
            "value_mac",
        )
        .await
    }

    async fn delete_mutation_macs(&self, name: &str, index_macs: &[Vec<u8>]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for mac in index_macs {
            sqlx::query(
                "DELETE FROM wa_app_state_mutation_macs
                 WHERE name = ? AND index_mac = ? AND device_id = ?",
            )
            .bind(name)
            .bind(mac.as_slice())
            .bind(DEVICE_ID)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }
}

#[async_trait]
impl ProtocolStore for SessionStore {
    async fn get_skdm_recipients(&self, group_jid: &str) -> Result<Vec<String>> {
        let rows = self
            .fetch_all(
                sqlx::query(
                    "SELECT device_jid FROM wa_skdm_recipients WHERE group_jid = ? AND device_id = ?",
                )
                .bind(group_jid)
                .bind(DEVICE_ID),
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("device_jid")).collect())
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[String]) -> Result<()> {
        for jid in device_jids {
            self.execute(
                sqlx::query(
                    "INSERT OR IGNORE INTO wa_skdm_recipients (group_jid, device_jid, device_id)
                     VALUES (?, ?, ?)",
                )
                .bind(group_jid)
                .bind(jid)
                .bind(DEVICE_ID),
            )
            .await?;
        }
        Ok(())
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> Result<()> {
        self.execute(
            sqlx::query("DELETE FROM wa_skdm_recipients WHERE group_jid = ? AND device_id = ?")
                .bind(group_jid)
                .bind(DEVICE_ID),
        )
        .await
    }

    async fn get_lid_mapping(&self, lid: &str) -> Result<Option<LidPnMappingEntry>> {
        let sql = format!("SELECT {LID_COLUMNS} FROM wa_lid_pn_mapping WHERE lid = ? AND device_id = ?");
        let row = self
            .fetch_optional(sqlx::query(&sql).bind(lid).bind(DEVICE_ID))
            .await?;
        Ok(row.as_ref().map(lid_entry))
    }

    async fn get_pn_mapping(&self, phone: &str) -> Result<Option<LidPnMappingEntry>> {
        let sql = format!(
            "SELECT {LID_COLUMNS} FROM wa_lid_pn_mapping WHERE phone_number = ? AND device_id = ?"
        );
        let row = self
            .fetch_optional(sqlx::query(&sql).bind(phone).bind(DEVICE_ID))
            .await?;
        Ok(row.as_ref().map(lid_entry))
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> Result<()> {
        self.execute(
            sqlx::query(
                "INSERT INTO wa_lid_pn_mapping
                 (lid, phone_number, created_at, updated_at, learning_source, device_id)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(lid, device_id) DO UPDATE SET
                    phone_number = excluded.phone_number,
                    updated_at = excluded.updated_at,
                    learning_source = excluded.learning_source",
            )
            .bind(&entry.lid)
            .bind(&entry.phone_number)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .bind(&entry.learning_source)
            .bind(DEVICE_ID),
        )
        .await
    }

    async fn get_all_lid_mappings(&self) -> Result<Vec<LidPnMappingEntry>> {
        let sql = format!("SELECT {LID_COLUMNS} FROM wa_lid_pn_mapping WHERE device_id = ?");
        let rows = self.fetch_all(sqlx::query(&sql).bind(DEVICE_ID)).await?;
        Ok(rows.iter().map(lid_entry).collect())
    }

    async fn save_base_key(&self, address: &str, message_id: &str, base_key: &[u8]) -> Result<()> {
        self.execute(
            sqlx::query(
                "INSERT INTO wa_base_keys (address, message_id, base_key, device_id)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(address, message_id, device_id)
                 DO UPDATE SET base_key = excluded.base_key",
            )
            .bind(address)
            .bind(message_id)
            .bind(base_key)
            .bind(DEVICE_ID),
        )
        .await
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> Result<bool> {
        let stored = self
            .bytes(
                sqlx::query(
                    "SELECT base_key FROM wa_base_keys
                     WHERE address = ? AND message_id = ? AND device_id = ?",
                )
                .bind(address)
                .bind(message_id)
                .bind(DEVICE_ID),
                "base_key",
            )
            .await?;
        Ok(stored.is_some_and(|k| k == current_base_key))
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> Result<()> {
        self.execute(
            sqlx::query(
                "DELETE FROM wa_base_keys WHERE address = ? AND message_id = ? AND device_id = ?",
            )
            .bind(address)
            .bind(message_id)
            .bind(DEVICE_ID),
        )
        .await
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> Result<()> {
        let json = to_json(&record)?;
        self.execute(
            sqlx::query(
                "INSERT INTO wa_device_registry (user, device_id, data) VALUES (?, ?, ?)
                 ON CONFLICT(user, device_id) DO UPDATE SET data = excluded.data",
            )
            .bind(record.user.clone())
            .bind(DEVICE_ID)
            .bind(json),
        )
        .await
    }

    async fn get_devices(&self, user: &str) -> Result<Option<DeviceListRecord>> {
        self.json(
            sqlx::query("SELECT data FROM wa_device_registry WHERE user = ? AND device_id = ?")
                .bind(user)
                .bind(DEVICE_ID),
        )
        .await
    }

    async fn mark_forget_sender_key(&self, group_jid: &str, participant: &str) -> Result<()> {
        self.execute(
            sqlx::query(
                "INSERT OR IGNORE INTO wa_sender_key_forget (group_jid, participant, device_id)
                 VALUES (?, ?, ?)",
            )
            .bind(group_jid)
            .bind(participant)
            .bind(DEVICE_ID),
        )
        .await
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let participants: Vec<String> = sqlx::query(
            "SELECT participant FROM wa_sender_key_forget WHERE group_jid = ? AND device_id = ?",
        )
        .bind(group_jid)
        .bind(DEVICE_ID)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?
        .iter()
        .map(|r| r.get("participant"))
        .collect();

        sqlx::query("DELETE FROM wa_sender_key_forget WHERE group_jid = ? AND device_id = ?")
            .bind(group_jid)
            .bind(DEVICE_ID)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(participants)
    }
}

#[async_trait]
impl DeviceStore for SessionStore {
    async fn save(&self, device: &Device) -> Result<()> {
        let bytes =
            rmp_serde::to_vec(device).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.execute(
            sqlx::query(
                "INSERT INTO wa_device (id, data) VALUES (?, ?)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            )
            .bind(DEVICE_ID)
            .bind(bytes),
        )
        .await
    }

    async fn load(&self) -> Result<Option<Device>> {
        let Some(data) = self
            .bytes(sqlx::query("SELECT data FROM wa_device WHERE id = ?").bind(DEVICE_ID), "data")
            .await?
        else {
            return Ok(None);
        };
        match rmp_serde::from_slice(&data) {
            Ok(device) => Ok(Some(device)),
            Err(e) => {
                // An undecodable record can never authenticate; drop it so the
                // client falls back to QR pairing.
                tracing::warn!("WhatsApp: discarding unreadable device record ({}), re-pair required", e);
                self.execute(sqlx::query("DELETE FROM wa_device WHERE id = ?").bind(DEVICE_ID))
                    .await?;
                Ok(None)
            }
        }
    }

    async fn exists(&self) -> Result<bool> {
        let row = self
            .fetch_optional(sqlx::query("SELECT 1 FROM wa_device WHERE id = ?").bind(DEVICE_ID))
            .await?;
        Ok(row.is_some())
    }

    async fn create(&self) -> Result<i32> {
        Ok(DEVICE_ID)
    }
}
