use crate::model::{Action, ExchangeKv};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub const HISTORY_LIMIT: usize = 25;

const GLOBAL_QUEUE_KEY: &str = "";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueScope {
    #[default]
    PerClient,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub value: String,
    pub ts_unix_ms: u64,
}

#[derive(Debug, Default)]
struct ExchangeEntry {
    current: String,
    history: VecDeque<HistoryEntry>,
}

#[derive(Debug, Default)]
struct ClientTable {
    values: HashMap<i32, ExchangeEntry>,
    connected: bool,
    last_seen_unix_ms: Option<u64>,
}

// No method holds the value lock and the queue lock at once.
#[derive(Debug, Default)]
pub struct ExchangeStore {
    clients: RwLock<HashMap<String, ClientTable>>,
    queues: Mutex<HashMap<String, VecDeque<Action>>>,
    scope: QueueScope,
}

impl ExchangeStore {
    pub fn new(scope: QueueScope) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            scope,
        }
    }

    pub fn scope(&self) -> QueueScope {
        self.scope
    }

    pub fn set_value(&self, client: &str, index: i32, value: &str) {
        let ts_unix_ms = now_unix_ms();
        let mut clients = self.clients_mut();
        let entry = clients
            .entry(client.to_string())
            .or_default()
            .values
            .entry(index)
            .or_default();
        entry.current = value.to_string();
        entry.history.push_back(HistoryEntry {
            value: value.to_string(),
            ts_unix_ms,
        });
        while entry.history.len() > HISTORY_LIMIT {
            entry.history.pop_front();
        }
    }

    pub fn get_value(&self, client: &str, index: i32) -> Option<String> {
        self.clients()
            .get(client)
            .and_then(|table| table.values.get(&index))
            .map(|entry| entry.current.clone())
    }

    // Unknown indices are omitted, not zero-filled.
    pub fn get_all(&self, client: &str, indices: &[i32]) -> Vec<ExchangeKv> {
        let clients = self.clients();
        let Some(table) = clients.get(client) else {
            return Vec::new();
        };
        indices
            .iter()
            .filter_map(|index| {
                table
                    .values
                    .get(index)
                    .map(|entry| ExchangeKv::new(*index, entry.current.clone()))
            })
            .collect()
    }

    pub fn history(&self, client: &str, index: i32) -> Vec<HistoryEntry> {
        self.clients()
            .get(client)
            .and_then(|table| table.values.get(&index))
            .map(|entry| entry.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn enqueue_action(&self, client: &str, action: Action) {
        let key = self.queue_key(client).to_string();
        self.queues().entry(key).or_default().push_back(action);
    }

    pub fn list_pending_actions(&self, client: &str) -> Vec<Action> {
        self.queues()
            .get(self.queue_key(client))
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn acknowledge_action(&self, client: &str, guid: &str) -> bool {
        let mut queues = self.queues();
        let Some(queue) = queues.get_mut(self.queue_key(client)) else {
            return false;
        };
        match queue.iter().position(|action| action.guid == guid) {
            Some(pos) => {
                queue.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn set_connected(&self, client: &str, connected: bool) {
        let ts = now_unix_ms();
        let mut clients = self.clients_mut();
        let table = clients.entry(client.to_string()).or_default();
        table.connected = connected;
        table.last_seen_unix_ms = Some(ts);
    }

    pub fn is_connected(&self, client: &str) -> bool {
        self.clients()
            .get(client)
            .map(|table| table.connected)
            .unwrap_or(false)
    }

    pub fn last_seen_unix_ms(&self, client: &str) -> Option<u64> {
        self.clients()
            .get(client)
            .and_then(|table| table.last_seen_unix_ms)
    }

    fn queue_key<'a>(&self, client: &'a str) -> &'a str {
        match self.scope {
            QueueScope::PerClient => client,
            QueueScope::Global => GLOBAL_QUEUE_KEY,
        }
    }

    // A worker that panicked while holding a lock must not wedge every other
    // connection, so poisoned guards are taken over as-is.
    fn clients(&self) -> RwLockReadGuard<'_, HashMap<String, ClientTable>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn clients_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, ClientTable>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Action>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
