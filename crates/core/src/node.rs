use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, SharedConnection};
use crate::driver::Driver;

pub const LOADING_LABEL: &str = "Loading...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Connection,
    Database,
    Table,
    Error,
    Loading,
}

impl NodeKind {
    #[must_use]
    pub fn is_expandable(self) -> bool {
        matches!(self, Self::Connection | Self::Database)
    }
}

/// Identity of a node across rebuilds. Two nodes built from separate
/// listings compare equal when their keys do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub connection_id: Option<String>,
    pub kind: NodeKind,
    pub label: String,
    pub database: Option<String>,
}

impl NodeKey {
    #[must_use]
    pub fn connection(config: &ConnectionConfig) -> Self {
        Self {
            connection_id: Some(config.id.clone()),
            kind: NodeKind::Connection,
            label: config.name.clone(),
            database: None,
        }
    }

    #[must_use]
    pub fn database(connection_id: &str, name: &str) -> Self {
        Self {
            connection_id: Some(connection_id.to_string()),
            kind: NodeKind::Database,
            label: name.to_string(),
            database: Some(name.to_string()),
        }
    }
}

/// Non-owning handle to a registered connection.
pub struct SessionRef<D: Driver> {
    connection_id: String,
    connection: Weak<Mutex<Connection<D>>>,
}

impl<D: Driver> SessionRef<D> {
    #[must_use]
    pub fn new(connection_id: impl Into<String>, connection: &SharedConnection<D>) -> Self {
        Self {
            connection_id: connection_id.into(),
            connection: Arc::downgrade(connection),
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// `None` once the connection has been removed from the registry.
    #[must_use]
    pub fn upgrade(&self) -> Option<SharedConnection<D>> {
        self.connection.upgrade()
    }
}

impl<D: Driver> Clone for SessionRef<D> {
    fn clone(&self) -> Self {
        Self {
            connection_id: self.connection_id.clone(),
            connection: Weak::clone(&self.connection),
        }
    }
}

impl<D: Driver> fmt::Debug for SessionRef<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRef")
            .field("connection_id", &self.connection_id)
            .field("alive", &(self.connection.strong_count() > 0))
            .finish()
    }
}

pub enum TreeNode<D: Driver> {
    Connection {
        session: SessionRef<D>,
        label: String,
        connected: bool,
        address: String,
    },
    Database {
        session: SessionRef<D>,
        name: String,
        parent: NodeKey,
    },
    Table {
        session: SessionRef<D>,
        database: String,
        name: String,
        parent: NodeKey,
    },
    Error {
        connection_id: Option<String>,
        message: String,
        parent: Option<NodeKey>,
    },
    Loading,
}

impl<D: Driver> TreeNode<D> {
    #[must_use]
    pub fn connection(session: SessionRef<D>, config: &ConnectionConfig, connected: bool) -> Self {
        Self::Connection {
            session,
            label: config.name.clone(),
            connected,
            address: config.address(),
        }
    }

    #[must_use]
    pub fn database(session: SessionRef<D>, name: impl Into<String>, parent: NodeKey) -> Self {
        Self::Database {
            session,
            name: name.into(),
            parent,
        }
    }

    #[must_use]
    pub fn table(
        session: SessionRef<D>,
        database: impl Into<String>,
        name: impl Into<String>,
        parent: NodeKey,
    ) -> Self {
        Self::Table {
            session,
            database: database.into(),
            name: name.into(),
            parent,
        }
    }

    #[must_use]
    pub fn error(
        connection_id: Option<String>,
        message: impl Into<String>,
        parent: Option<NodeKey>,
    ) -> Self {
        Self::Error {
            connection_id,
            message: message.into(),
            parent,
        }
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Connection { .. } => NodeKind::Connection,
            Self::Database { .. } => NodeKind::Database,
            Self::Table { .. } => NodeKind::Table,
            Self::Error { .. } => NodeKind::Error,
            Self::Loading => NodeKind::Loading,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Connection { label, .. } => label,
            Self::Database { name, .. } | Self::Table { name, .. } => name,
            Self::Error { message, .. } => message,
            Self::Loading => LOADING_LABEL,
        }
    }

    #[must_use]
    pub fn database_name(&self) -> Option<&str> {
        match self {
            Self::Database { name, .. } => Some(name),
            Self::Table { database, .. } => Some(database),
            _ => None,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&SessionRef<D>> {
        match self {
            Self::Connection { session, .. }
            | Self::Database { session, .. }
            | Self::Table { session, .. } => Some(session),
            Self::Error { .. } | Self::Loading => None,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            Self::Error { connection_id, .. } => connection_id.as_deref(),
            _ => self.session().map(SessionRef::connection_id),
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<&NodeKey> {
        match self {
            Self::Database { parent, .. } | Self::Table { parent, .. } => Some(parent),
            Self::Error { parent, .. } => parent.as_ref(),
            Self::Connection { .. } | Self::Loading => None,
        }
    }

    #[must_use]
    pub fn key(&self) -> NodeKey {
        NodeKey {
            connection_id: self.connection_id().map(str::to_string),
            kind: self.kind(),
            label: self.label().to_string(),
            database: self.database_name().map(str::to_string),
        }
    }

    #[must_use]
    pub fn is_expandable(&self) -> bool {
        self.kind().is_expandable()
    }
}

impl<D: Driver> Clone for TreeNode<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Connection {
                session,
                label,
                connected,
                address,
            } => Self::Connection {
                session: session.clone(),
                label: label.clone(),
                connected: *connected,
                address: address.clone(),
            },
            Self::Database {
                session,
                name,
                parent,
            } => Self::Database {
                session: session.clone(),
                name: name.clone(),
                parent: parent.clone(),
            },
            Self::Table {
                session,
                database,
                name,
                parent,
            } => Self::Table {
                session: session.clone(),
                database: database.clone(),
                name: name.clone(),
                parent: parent.clone(),
            },
            Self::Error {
                connection_id,
                message,
                parent,
            } => Self::Error {
                connection_id: connection_id.clone(),
                message: message.clone(),
                parent: parent.clone(),
            },
            Self::Loading => Self::Loading,
        }
    }
}

impl<D: Driver> fmt::Debug for TreeNode<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("key", &self.key())
            .field("parent", &self.parent())
            .finish()
    }
}
