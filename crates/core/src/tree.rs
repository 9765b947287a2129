use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{load_connections, save_connections, ConnectionConfig, StateStore, StoreError};
use crate::connection::{Connection, SessionStatus, SharedConnection};
use crate::driver::Driver;
use crate::error::DbError;
use crate::node::{NodeKey, SessionRef, TreeNode};
use crate::notice::{Notice, NoticeLevel};

pub const FAILED_TO_CONNECT: &str = "Failed to connect";
const EVENT_CAPACITY: usize = 64;

/// Which part of the tree a host should re-request children for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeScope {
    Whole,
    Node(NodeKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    Changed(ChangeScope),
    Notice(Notice),
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unknown connection `{0}`")]
    UnknownConnection(String),
}

struct Entry<D: Driver> {
    config: ConnectionConfig,
    connection: SharedConnection<D>,
    status: SessionStatus,
}

impl<D: Driver> Entry<D> {
    fn new(connection: Connection<D>) -> Self {
        Self {
            config: connection.config().clone(),
            status: connection.status(),
            connection: connection.into_shared(),
        }
    }

    fn node(&self) -> TreeNode<D> {
        TreeNode::connection(
            SessionRef::new(self.config.id.clone(), &self.connection),
            &self.config,
            self.status.is_connected(),
        )
    }
}

/// Registry of connections and the lazy children state machine behind the
/// navigation tree. Every registry mutation is written through to `store`.
pub struct TreeSupplier<D: Driver, S: StateStore> {
    driver: Arc<D>,
    store: S,
    registry: RwLock<Vec<Entry<D>>>,
    loading: AtomicBool,
    events: broadcast::Sender<TreeEvent>,
}

impl<D: Driver, S: StateStore> TreeSupplier<D, S> {
    pub fn new(driver: Arc<D>, store: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            driver,
            store,
            registry: RwLock::new(Vec::new()),
            loading: AtomicBool::new(false),
            events,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Builds a dormant connection bound to this supplier's driver.
    #[must_use]
    pub fn new_connection(&self, config: ConnectionConfig) -> Connection<D> {
        Connection::new(Arc::clone(&self.driver), config)
    }

    pub fn changed(&self, scope: ChangeScope) {
        // No subscribers is not an error.
        let _ = self.events.send(TreeEvent::Changed(scope));
    }

    pub fn refresh(&self, node: Option<&TreeNode<D>>) {
        self.changed(node.map_or(ChangeScope::Whole, |node| ChangeScope::Node(node.key())));
    }

    pub fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!(message = %notice.message, "notice"),
            NoticeLevel::Warning => warn!(message = %notice.message, "notice"),
            NoticeLevel::Error => error!(message = %notice.message, "notice"),
        }
        let _ = self.events.send(TreeEvent::Notice(notice));
    }

    /// Loads the persisted connection list and installs one dormant
    /// connection per entry. Nothing is connected here.
    pub async fn initialize(&self) -> Result<usize, TreeError> {
        self.loading.store(true, Ordering::SeqCst);
        self.changed(ChangeScope::Whole);

        let loaded = load_connections(&self.store);
        let result = match loaded {
            Ok(configs) => {
                let mut registry = self.registry.write().await;
                *registry = configs
                    .into_iter()
                    .map(|config| Entry::new(self.new_connection(config)))
                    .collect();
                info!(connections = registry.len(), "loaded saved connections");
                Ok(registry.len())
            }
            Err(error) => {
                warn!(%error, "failed to load saved connections");
                self.notify(Notice::error("Failed to load saved connections"));
                Err(error.into())
            }
        };

        self.loading.store(false, Ordering::SeqCst);
        self.changed(ChangeScope::Whole);
        result
    }

    pub async fn configs(&self) -> Vec<ConnectionConfig> {
        self.registry
            .read()
            .await
            .iter()
            .map(|entry| entry.config.clone())
            .collect()
    }

    pub async fn connection(&self, id: &str) -> Option<SharedConnection<D>> {
        self.registry
            .read()
            .await
            .iter()
            .find(|entry| entry.config.id == id)
            .map(|entry| Arc::clone(&entry.connection))
    }

    fn persist(&self, registry: &[Entry<D>]) -> Result<(), StoreError> {
        let configs: Vec<ConnectionConfig> =
            registry.iter().map(|entry| entry.config.clone()).collect();
        save_connections(&self.store, &configs)
    }

    /// Registers `connection` (connected or not) at the end of the list.
    pub async fn add_connection(&self, connection: Connection<D>) -> Result<(), TreeError> {
        let mut registry = self.registry.write().await;
        registry.push(Entry::new(connection));
        if let Err(error) = self.persist(&registry) {
            let rejected = registry.pop();
            drop(registry);
            if let Some(entry) = rejected {
                entry.connection.lock().await.disconnect().await;
            }
            return Err(error.into());
        }

        if let Some(entry) = registry.last() {
            info!(connection = %entry.config.name, "connection added");
        }
        drop(registry);
        self.changed(ChangeScope::Whole);
        Ok(())
    }

    /// Replaces the stored config for `config.id`. The previous session is
    /// closed and a dormant one takes its place.
    pub async fn update_connection(&self, config: ConnectionConfig) -> Result<(), TreeError> {
        let mut registry = self.registry.write().await;
        let index = registry
            .iter()
            .position(|entry| entry.config.id == config.id)
            .ok_or_else(|| TreeError::UnknownConnection(config.id.clone()))?;

        let name = config.name.clone();
        let previous = std::mem::replace(
            &mut registry[index],
            Entry::new(self.new_connection(config)),
        );
        if let Err(error) = self.persist(&registry) {
            registry[index] = previous;
            return Err(error.into());
        }
        drop(registry);

        previous.connection.lock().await.disconnect().await;
        info!(connection = %name, "connection updated");
        self.changed(ChangeScope::Whole);
        Ok(())
    }

    /// Returns `false` without touching storage when `id` is unknown.
    pub async fn delete_connection(&self, id: &str) -> Result<bool, TreeError> {
        let mut registry = self.registry.write().await;
        let Some(index) = registry.iter().position(|entry| entry.config.id == id) else {
            debug!(id, "delete ignored, connection not registered");
            return Ok(false);
        };

        let removed = registry.remove(index);
        if let Err(error) = self.persist(&registry) {
            registry.insert(index, removed);
            return Err(error.into());
        }
        drop(registry);

        removed.connection.lock().await.disconnect().await;
        info!(connection = %removed.config.name, "connection deleted");
        self.changed(ChangeScope::Whole);
        Ok(true)
    }

    /// Children of `node`, or the root connection list for `None`.
    /// Expanding a disconnected connection node connects it.
    pub async fn children(&self, node: Option<&TreeNode<D>>) -> Vec<TreeNode<D>> {
        if self.is_loading() {
            return vec![TreeNode::Loading];
        }

        match node {
            None => self
                .registry
                .read()
                .await
                .iter()
                .map(Entry::node)
                .collect(),
            Some(node) => match node {
                TreeNode::Connection { session, label, .. } => {
                    self.connection_children(session, label, node.key()).await
                }
                TreeNode::Database { session, name, .. } => {
                    self.database_children(session, name, node.key()).await
                }
                TreeNode::Table { .. } | TreeNode::Error { .. } | TreeNode::Loading => Vec::new(),
            },
        }
    }

    async fn connection_children(
        &self,
        session: &SessionRef<D>,
        label: &str,
        parent: NodeKey,
    ) -> Vec<TreeNode<D>> {
        let Some(connection) = session.upgrade() else {
            debug!(connection = label, "expand ignored, connection no longer registered");
            return Vec::new();
        };

        let mut guard = connection.lock().await;
        let listed: Result<Vec<String>, DbError> = async {
            if !guard.is_connected() {
                info!(connection = label, "connecting on expand");
                guard.connect().await?;
                self.changed(ChangeScope::Whole);
            }
            guard.list_databases().await
        }
        .await;
        drop(guard);

        match listed {
            Ok(databases) => databases
                .into_iter()
                .map(|name| TreeNode::database(session.clone(), name, parent.clone()))
                .collect(),
            Err(error) => {
                self.notify(Notice::error(format!("Failed to connect: {error}")));
                self.changed(ChangeScope::Whole);
                vec![TreeNode::error(
                    Some(session.connection_id().to_string()),
                    FAILED_TO_CONNECT,
                    Some(parent),
                )]
            }
        }
    }

    async fn database_children(
        &self,
        session: &SessionRef<D>,
        database: &str,
        parent: NodeKey,
    ) -> Vec<TreeNode<D>> {
        let Some(connection) = session.upgrade() else {
            return Vec::new();
        };

        let listed = connection.lock().await.list_tables(database).await;
        match listed {
            Ok(tables) => tables
                .into_iter()
                .map(|name| TreeNode::table(session.clone(), database, name, parent.clone()))
                .collect(),
            Err(error) => {
                self.notify(Notice::error(format!("Failed to get tables: {error}")));
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast::Receiver;

    use super::{ChangeScope, TreeEvent, TreeSupplier, FAILED_TO_CONNECT};
    use crate::config::{save_connections, ConnectionConfig};
    use crate::node::{NodeKind, TreeNode};
    use crate::notice::NoticeLevel;
    use crate::testing::{FakeDriver, RecordingStore};

    type Supplier = TreeSupplier<FakeDriver, Arc<RecordingStore>>;

    fn localhost() -> ConnectionConfig {
        let mut config = ConnectionConfig::new("localhost", "localhost", "root");
        config.password = Some(String::new());
        config
    }

    fn supplier(driver: &FakeDriver) -> (Supplier, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        let supplier = TreeSupplier::new(Arc::new(driver.clone()), Arc::clone(&store));
        (supplier, store)
    }

    fn drain(events: &mut Receiver<TreeEvent>) -> Vec<TreeEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn notices(events: &[TreeEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                TreeEvent::Notice(notice) if notice.level == NoticeLevel::Error => {
                    Some(notice.message.clone())
                }
                _ => None,
            })
            .collect()
    }

    async fn add_dormant(supplier: &Supplier, config: ConnectionConfig) -> TreeNode<FakeDriver> {
        supplier
            .add_connection(supplier.new_connection(config.clone()))
            .await
            .expect("add should persist");
        supplier
            .children(None)
            .await
            .into_iter()
            .find(|node| node.connection_id() == Some(config.id.as_str()))
            .expect("connection node should be listed")
    }

    #[tokio::test]
    async fn initialize_builds_dormant_connections_in_saved_order() {
        let driver = FakeDriver::default();
        let (supplier, store) = supplier(&driver);
        let saved = vec![localhost(), ConnectionConfig::new("staging", "10.0.0.4", "app")];
        save_connections(&store, &saved).expect("seed state");

        let count = supplier.initialize().await.expect("initialize should load");
        assert_eq!(count, 2);
        assert!(!supplier.is_loading());

        let roots = supplier.children(None).await;
        let labels: Vec<&str> = roots.iter().map(TreeNode::label).collect();
        assert_eq!(labels, ["localhost", "staging"]);
        assert!(roots
            .iter()
            .all(|node| matches!(node, TreeNode::Connection { connected: false, .. })));
        assert_eq!(driver.connect_calls(), 0);
    }

    #[tokio::test]
    async fn expanding_a_connection_connects_and_lists_databases() {
        let driver = FakeDriver::with_databases(&[("information_schema", &[]), ("app_db", &["users"])]);
        let (supplier, _store) = supplier(&driver);
        let node = add_dormant(&supplier, localhost()).await;
        let mut events = supplier.subscribe();

        let children = supplier.children(Some(&node)).await;

        let labels: Vec<&str> = children.iter().map(TreeNode::label).collect();
        assert_eq!(labels, ["information_schema", "app_db"]);
        assert!(children.iter().all(|child| child.kind() == NodeKind::Database));
        assert_eq!(children[1].parent(), Some(&node.key()));
        assert_eq!(
            drain(&mut events),
            [TreeEvent::Changed(ChangeScope::Whole)]
        );

        let roots = supplier.children(None).await;
        match &roots[0] {
            TreeNode::Connection {
                connected, address, ..
            } => {
                assert!(*connected);
                assert_eq!(address, "root@localhost:3306");
            }
            other => panic!("unexpected root node: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_failure_yields_single_error_node() {
        let driver = FakeDriver::default();
        driver.server().fail_connect = Some("Can't connect to MySQL server".to_string());
        let (supplier, _store) = supplier(&driver);
        let node = add_dormant(&supplier, localhost()).await;
        let mut events = supplier.subscribe();

        let children = supplier.children(Some(&node)).await;

        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind(), NodeKind::Error);
        assert_eq!(children[0].label(), FAILED_TO_CONNECT);
        assert_eq!(children[0].parent(), Some(&node.key()));

        let events = drain(&mut events);
        assert_eq!(
            notices(&events),
            ["Failed to connect: Can't connect to MySQL server"]
        );
        assert!(events.contains(&TreeEvent::Changed(ChangeScope::Whole)));

        let connection = supplier
            .connection(node.connection_id().expect("connection id"))
            .await
            .expect("connection registered");
        assert!(!connection.lock().await.is_connected());
    }

    #[tokio::test]
    async fn error_node_lasts_one_listing_and_next_expand_retries() {
        let driver = FakeDriver::with_databases(&[("app_db", &[])]);
        driver.server().fail_connect = Some("Can't connect to MySQL server".to_string());
        let (supplier, _store) = supplier(&driver);
        let node = add_dormant(&supplier, localhost()).await;

        let first = supplier.children(Some(&node)).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind(), NodeKind::Error);

        driver.server().fail_connect = None;
        let second = supplier.children(Some(&node)).await;

        let labels: Vec<&str> = second.iter().map(TreeNode::label).collect();
        assert_eq!(labels, ["app_db"]);
        assert_eq!(second[0].kind(), NodeKind::Database);
        assert_eq!(driver.connect_calls(), 2);
    }

    #[tokio::test]
    async fn table_listing_failure_is_an_empty_list_with_notice() {
        let driver = FakeDriver::with_databases(&[("app_db", &["users"])]);
        let (supplier, _store) = supplier(&driver);
        let node = add_dormant(&supplier, localhost()).await;
        let databases = supplier.children(Some(&node)).await;
        driver.fail_statement("SHOW TABLES FROM `app_db`", "SELECT command denied");
        let mut events = supplier.subscribe();

        let tables = supplier.children(Some(&databases[0])).await;

        assert!(tables.is_empty());
        assert_eq!(
            notices(&drain(&mut events)),
            ["Failed to get tables: SELECT command denied"]
        );
    }

    #[tokio::test]
    async fn database_children_are_tables_with_parent_key() {
        let driver = FakeDriver::with_databases(&[("app_db", &["users", "orders"])]);
        let (supplier, _store) = supplier(&driver);
        let node = add_dormant(&supplier, localhost()).await;
        let databases = supplier.children(Some(&node)).await;

        let tables = supplier.children(Some(&databases[0])).await;

        let labels: Vec<&str> = tables.iter().map(TreeNode::label).collect();
        assert_eq!(labels, ["users", "orders"]);
        assert_eq!(tables[0].database_name(), Some("app_db"));
        assert_eq!(tables[0].parent(), Some(&databases[0].key()));
        assert!(supplier.children(Some(&tables[0])).await.is_empty());
    }

    #[tokio::test]
    async fn leaves_have_no_children() {
        let driver = FakeDriver::default();
        let (supplier, _store) = supplier(&driver);

        let error = TreeNode::error(None, FAILED_TO_CONNECT, None);
        assert!(supplier.children(Some(&error)).await.is_empty());
        assert!(supplier.children(Some(&TreeNode::Loading)).await.is_empty());
    }

    #[tokio::test]
    async fn deleting_unknown_id_changes_nothing() {
        let driver = FakeDriver::default();
        let (supplier, store) = supplier(&driver);
        add_dormant(&supplier, localhost()).await;
        let writes = store.writes();

        let removed = supplier
            .delete_connection("no-such-id")
            .await
            .expect("delete should not fail");

        assert!(!removed);
        assert_eq!(store.writes(), writes);
        assert_eq!(supplier.configs().await.len(), 1);
    }

    #[tokio::test]
    async fn deleting_persists_then_disconnects() {
        let driver = FakeDriver::with_databases(&[("app_db", &[])]);
        let (supplier, store) = supplier(&driver);
        let config = localhost();
        let node = add_dormant(&supplier, config.clone()).await;
        supplier.children(Some(&node)).await;

        let removed = supplier
            .delete_connection(&config.id)
            .await
            .expect("delete should persist");

        assert!(removed);
        assert!(store.persisted().is_empty());
        assert!(supplier.children(None).await.is_empty());
        assert_eq!(driver.close_calls(), 1);
        assert!(node.session().and_then(|session| session.upgrade()).is_none());
    }

    #[tokio::test]
    async fn failed_write_rolls_back_registry() {
        let driver = FakeDriver::default();
        let (supplier, store) = supplier(&driver);
        let config = localhost();
        add_dormant(&supplier, config.clone()).await;
        store.fail_writes(true);

        supplier
            .add_connection(supplier.new_connection(ConnectionConfig::new("other", "h", "u")))
            .await
            .expect_err("add should surface the write failure");
        supplier
            .delete_connection(&config.id)
            .await
            .expect_err("delete should surface the write failure");

        assert_eq!(supplier.configs().await, vec![config.clone()]);
        assert_eq!(store.persisted(), vec![config]);
    }

    #[tokio::test]
    async fn failed_add_closes_the_rejected_session() {
        let driver = FakeDriver::default();
        let (supplier, store) = supplier(&driver);
        let mut connection = supplier.new_connection(localhost());
        connection.connect().await.expect("connect should succeed");
        store.fail_writes(true);

        supplier
            .add_connection(connection)
            .await
            .expect_err("add should surface the write failure");

        assert!(supplier.configs().await.is_empty());
        assert_eq!(driver.close_calls(), 1);
    }

    #[tokio::test]
    async fn editing_replaces_config_and_closes_old_session() {
        let driver = FakeDriver::with_databases(&[("app_db", &[])]);
        let (supplier, store) = supplier(&driver);
        let config = localhost();
        let node = add_dormant(&supplier, config.clone()).await;
        supplier.children(Some(&node)).await;

        let mut edited = config.clone();
        edited.port = 3307;
        supplier
            .update_connection(edited.clone())
            .await
            .expect("edit should persist");

        assert_eq!(store.persisted(), vec![edited.clone()]);
        assert_eq!(driver.close_calls(), 1);
        let connection = supplier
            .connection(&edited.id)
            .await
            .expect("edited connection registered");
        let connection = connection.lock().await;
        assert!(!connection.is_connected());
        assert_eq!(connection.config().port, 3307);
    }

    #[tokio::test]
    async fn editing_unknown_connection_fails() {
        let driver = FakeDriver::default();
        let (supplier, store) = supplier(&driver);

        supplier
            .update_connection(localhost())
            .await
            .expect_err("unknown id should fail");
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn refresh_targets_the_given_node() {
        let driver = FakeDriver::default();
        let (supplier, _store) = supplier(&driver);
        let node = add_dormant(&supplier, localhost()).await;
        let mut events = supplier.subscribe();

        supplier.refresh(Some(&node));
        supplier.refresh(None);

        assert_eq!(
            drain(&mut events),
            [
                TreeEvent::Changed(ChangeScope::Node(node.key())),
                TreeEvent::Changed(ChangeScope::Whole),
            ]
        );
    }
}
