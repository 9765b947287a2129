pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod node;
pub mod notice;
pub mod settings;
pub mod sql;
pub mod tree;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConnectionConfig, FileStateStore, MemoryStateStore, StateStore, StoreError};
pub use connection::{Connection, QueryResult, SharedConnection};
pub use dispatcher::{
    CommandDispatcher, CommandId, CommandOutcome, CommandOutput, Interaction, PromptRequest,
};
pub use driver::{Driver, DriverError, Row};
pub use error::{DbError, ErrorKind};
pub use node::{NodeKey, NodeKind, TreeNode};
pub use notice::{Notice, NoticeLevel};
pub use tree::{ChangeScope, TreeEvent, TreeSupplier};
