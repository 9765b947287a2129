use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConnectionConfig, StateStore};
use crate::connection::{is_system_schema, ColumnInfo, IndexInfo, QueryResult, SharedConnection, TableInfo};
use crate::driver::Driver;
use crate::error::DbError;
use crate::node::{NodeKey, NodeKind, TreeNode};
use crate::notice::Notice;
use crate::sql;
use crate::tree::{ChangeScope, TreeError, TreeSupplier};
use crate::validation::{first_violation, validate, InputRule};

const PREVIEW_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    AddConnection,
    EditConnection,
    DeleteConnection,
    Refresh,
    Reconnect,
    CreateDatabase,
    DropDatabase,
    RenameDatabase,
    CreateTable,
    RenameTable,
    DuplicateTable,
    TruncateTable,
    DeleteTable,
    ShowCreateTable,
    CopyCreateTable,
    ShowStructure,
    ShowIndexes,
    ShowTableInfo,
    OpenTable,
    ModifyTableEncoding,
    ModifyTableComment,
    ResetAutoIncrement,
    ShowServerVariables,
    ShowProcessList,
    ExecuteQuery,
}

/// Which selected node a command needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandScope {
    Anywhere,
    Connection,
    Database,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDefinition {
    pub id: CommandId,
    pub title: &'static str,
    pub scope: CommandScope,
    pub destructive: bool,
}

const fn command(
    id: CommandId,
    title: &'static str,
    scope: CommandScope,
    destructive: bool,
) -> CommandDefinition {
    CommandDefinition {
        id,
        title,
        scope,
        destructive,
    }
}

const COMMANDS: [CommandDefinition; 25] = [
    command(CommandId::AddConnection, "Add connection", CommandScope::Anywhere, false),
    command(CommandId::EditConnection, "Edit connection", CommandScope::Connection, false),
    command(CommandId::DeleteConnection, "Delete connection", CommandScope::Connection, true),
    command(CommandId::Refresh, "Refresh", CommandScope::Anywhere, false),
    command(CommandId::Reconnect, "Reconnect", CommandScope::Connection, false),
    command(CommandId::CreateDatabase, "Create database", CommandScope::Connection, false),
    command(CommandId::DropDatabase, "Drop database", CommandScope::Database, true),
    command(CommandId::RenameDatabase, "Rename database", CommandScope::Database, true),
    command(CommandId::CreateTable, "Create table", CommandScope::Database, false),
    command(CommandId::RenameTable, "Rename table", CommandScope::Table, false),
    command(CommandId::DuplicateTable, "Duplicate table", CommandScope::Table, false),
    command(CommandId::TruncateTable, "Truncate table", CommandScope::Table, true),
    command(CommandId::DeleteTable, "Delete table", CommandScope::Table, true),
    command(CommandId::ShowCreateTable, "Show create table", CommandScope::Table, false),
    command(CommandId::CopyCreateTable, "Copy create table", CommandScope::Table, false),
    command(CommandId::ShowStructure, "Show structure", CommandScope::Table, false),
    command(CommandId::ShowIndexes, "Show indexes", CommandScope::Table, false),
    command(CommandId::ShowTableInfo, "Show table info", CommandScope::Table, false),
    command(CommandId::OpenTable, "Open table", CommandScope::Table, false),
    command(CommandId::ModifyTableEncoding, "Modify encoding", CommandScope::Table, false),
    command(CommandId::ModifyTableComment, "Modify comment", CommandScope::Table, false),
    command(CommandId::ResetAutoIncrement, "Reset auto increment", CommandScope::Table, false),
    command(CommandId::ShowServerVariables, "Server variables", CommandScope::Connection, false),
    command(CommandId::ShowProcessList, "Process list", CommandScope::Connection, false),
    command(CommandId::ExecuteQuery, "Execute query", CommandScope::Database, false),
];

impl CommandScope {
    /// Database commands also apply from a table node, connection commands
    /// from anything below a connection.
    #[must_use]
    pub fn accepts(self, kind: Option<NodeKind>) -> bool {
        match self {
            Self::Anywhere => true,
            Self::Connection => matches!(
                kind,
                Some(NodeKind::Connection | NodeKind::Database | NodeKind::Table | NodeKind::Error)
            ),
            Self::Database => matches!(kind, Some(NodeKind::Database | NodeKind::Table)),
            Self::Table => kind == Some(NodeKind::Table),
        }
    }
}

#[must_use]
pub fn find_command(id: CommandId) -> Option<CommandDefinition> {
    COMMANDS.iter().copied().find(|definition| definition.id == id)
}

#[must_use]
pub fn commands_for(kind: Option<NodeKind>) -> Vec<CommandDefinition> {
    COMMANDS
        .iter()
        .copied()
        .filter(|definition| definition.scope.accepts(kind))
        .collect()
}

/// One free-text question put to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub prompt: String,
    pub value: String,
    pub password: bool,
    pub rules: Vec<InputRule>,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            value: String::new(),
            password: false,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    #[must_use]
    pub fn masked(mut self) -> Self {
        self.password = true;
        self
    }

    #[must_use]
    pub fn with_rules(mut self, rules: Vec<InputRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Inline message a host should show for `input`, if any.
    #[must_use]
    pub fn violation(&self, input: &str) -> Option<String> {
        first_violation(&self.rules, input)
    }
}

/// Host side of a command: confirmations, prompts, notices and clipboard.
#[async_trait]
pub trait Interaction: Send {
    async fn confirm(&mut self, message: &str) -> bool;
    /// `None` when the user dismisses the prompt.
    async fn prompt(&mut self, request: &PromptRequest) -> Option<String>;
    fn notify(&mut self, notice: Notice);
    fn copy_to_clipboard(&mut self, text: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView {
    pub database: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub default_query: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Text { title: String, body: String },
    Grid { title: String, result: QueryResult },
    Structure { title: String, columns: Vec<ColumnInfo> },
    Indexes { title: String, indexes: Vec<IndexInfo> },
    Info { title: String, info: TableInfo },
    TableView(TableView),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed,
    Cancelled,
    Output(CommandOutput),
    Failed(String),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("select a {0} first")]
    MissingTarget(&'static str),
    #[error("connection is no longer registered")]
    ConnectionGone,
    #[error("failed to copy to clipboard: {0}")]
    Clipboard(String),
}

struct DatabaseTarget<D: Driver> {
    connection_id: String,
    connection: SharedConnection<D>,
    database: String,
}

struct TableTarget<D: Driver> {
    connection_id: String,
    connection: SharedConnection<D>,
    database: String,
    table: String,
}

impl<D: Driver> TableTarget<D> {
    fn database_key(&self) -> NodeKey {
        NodeKey::database(&self.connection_id, &self.database)
    }

    fn qualified(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

/// Turns user commands on a selected node into supplier and connection
/// calls. Failures become a notice and [`CommandOutcome::Failed`].
pub struct CommandDispatcher<D: Driver, S: StateStore> {
    supplier: Arc<TreeSupplier<D, S>>,
}

impl<D: Driver, S: StateStore> CommandDispatcher<D, S> {
    #[must_use]
    pub fn new(supplier: Arc<TreeSupplier<D, S>>) -> Self {
        Self { supplier }
    }

    #[must_use]
    pub fn supplier(&self) -> &Arc<TreeSupplier<D, S>> {
        &self.supplier
    }

    pub async fn execute(
        &self,
        id: CommandId,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> CommandOutcome {
        let title = find_command(id).map_or("Command", |definition| definition.title);
        match self.run(id, target, ui).await {
            Ok(outcome) => outcome,
            Err(error) => self.fail(title, &error, ui),
        }
    }

    fn fail(&self, title: &str, error: &CommandError, ui: &mut dyn Interaction) -> CommandOutcome {
        let message = format!("{title} failed: {error}");
        warn!(command = title, %error, "command failed");
        ui.notify(Notice::error(message.clone()));
        CommandOutcome::Failed(message)
    }

    async fn run(
        &self,
        id: CommandId,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        match id {
            CommandId::AddConnection => self.add_connection(ui).await,
            CommandId::EditConnection => self.edit_connection(target, ui).await,
            CommandId::DeleteConnection => self.delete_connection(target, ui).await,
            CommandId::Refresh => {
                self.supplier.changed(refresh_scope(target));
                Ok(CommandOutcome::Completed)
            }
            CommandId::Reconnect => self.reconnect(target, ui).await,
            CommandId::CreateDatabase => self.create_database(target, ui).await,
            CommandId::DropDatabase => self.drop_database(target, ui).await,
            CommandId::RenameDatabase => self.rename_database(target, ui).await,
            CommandId::CreateTable => self.create_table(target, ui).await,
            CommandId::RenameTable => self.rename_table(target, ui).await,
            CommandId::DuplicateTable => self.duplicate_table(target, ui).await,
            CommandId::TruncateTable => self.truncate_table(target, ui).await,
            CommandId::DeleteTable => self.delete_table(target, ui).await,
            CommandId::ShowCreateTable => {
                let target = table_target(target)?;
                let body = target
                    .connection
                    .lock()
                    .await
                    .create_table_syntax(&target.database, &target.table)
                    .await?;
                Ok(CommandOutcome::Output(CommandOutput::Text {
                    title: target.qualified(),
                    body,
                }))
            }
            CommandId::CopyCreateTable => {
                let target = table_target(target)?;
                let syntax = target
                    .connection
                    .lock()
                    .await
                    .create_table_syntax(&target.database, &target.table)
                    .await?;
                ui.copy_to_clipboard(&syntax)
                    .map_err(CommandError::Clipboard)?;
                ui.notify(Notice::info(format!(
                    "Copied CREATE TABLE for `{}` to clipboard",
                    target.table
                )));
                Ok(CommandOutcome::Completed)
            }
            CommandId::ShowStructure => {
                let target = table_target(target)?;
                let columns = target
                    .connection
                    .lock()
                    .await
                    .table_structure(&target.database, &target.table)
                    .await?;
                Ok(CommandOutcome::Output(CommandOutput::Structure {
                    title: target.qualified(),
                    columns,
                }))
            }
            CommandId::ShowIndexes => {
                let target = table_target(target)?;
                let indexes = target
                    .connection
                    .lock()
                    .await
                    .table_indexes(&target.database, &target.table)
                    .await?;
                Ok(CommandOutcome::Output(CommandOutput::Indexes {
                    title: target.qualified(),
                    indexes,
                }))
            }
            CommandId::ShowTableInfo => {
                let target = table_target(target)?;
                let info = target
                    .connection
                    .lock()
                    .await
                    .table_info(&target.database, &target.table)
                    .await?;
                Ok(CommandOutcome::Output(CommandOutput::Info {
                    title: target.qualified(),
                    info,
                }))
            }
            CommandId::OpenTable => self.open_table(target).await,
            CommandId::ModifyTableEncoding => self.modify_table_encoding(target, ui).await,
            CommandId::ModifyTableComment => self.modify_table_comment(target, ui).await,
            CommandId::ResetAutoIncrement => self.reset_auto_increment(target, ui).await,
            CommandId::ShowServerVariables => {
                let (_, connection) = self.connection_target(target).await?;
                let mut session = connection.lock().await;
                let result = session.server_variables().await?;
                Ok(CommandOutcome::Output(CommandOutput::Grid {
                    title: format!("{} variables", session.config().name),
                    result,
                }))
            }
            CommandId::ShowProcessList => {
                let (_, connection) = self.connection_target(target).await?;
                let mut session = connection.lock().await;
                let result = session.process_list().await?;
                Ok(CommandOutcome::Output(CommandOutput::Grid {
                    title: format!("{} processes", session.config().name),
                    result,
                }))
            }
            CommandId::ExecuteQuery => {
                let default_query = match target {
                    Some(TreeNode::Table { name, .. }) => sql::preview_select(name, PREVIEW_LIMIT),
                    _ => String::new(),
                };
                let Some(statement) = ask(
                    ui,
                    PromptRequest::new("SQL")
                        .with_value(default_query)
                        .with_rules(vec![InputRule::Required]),
                )
                .await?
                else {
                    return Ok(CommandOutcome::Cancelled);
                };
                self.run_query(&statement, target).await
            }
        }
    }

    async fn run_query(
        &self,
        statement: &str,
        target: Option<&TreeNode<D>>,
    ) -> Result<CommandOutcome, CommandError> {
        validate(&[InputRule::Required], statement)?;
        let target = database_target(target)?;
        let result = target
            .connection
            .lock()
            .await
            .execute_query_in(&target.database, statement)
            .await?;
        Ok(CommandOutcome::Output(CommandOutput::Grid {
            title: target.database,
            result,
        }))
    }

    /// Resolves the connection behind any node, including error nodes,
    /// which only carry the connection id.
    async fn connection_target(
        &self,
        target: Option<&TreeNode<D>>,
    ) -> Result<(String, SharedConnection<D>), CommandError> {
        let node = target.ok_or(CommandError::MissingTarget("connection"))?;
        if let Some(session) = node.session() {
            let connection = session.upgrade().ok_or(CommandError::ConnectionGone)?;
            return Ok((session.connection_id().to_string(), connection));
        }

        let id = node
            .connection_id()
            .ok_or(CommandError::MissingTarget("connection"))?;
        let connection = self
            .supplier
            .connection(id)
            .await
            .ok_or(CommandError::ConnectionGone)?;
        Ok((id.to_string(), connection))
    }

    async fn connection_prompts(
        ui: &mut dyn Interaction,
        current: &ConnectionConfig,
    ) -> Result<Option<ConnectionConfig>, CommandError> {
        let Some(name) = ask(
            ui,
            PromptRequest::new("Connection name")
                .with_value(current.name.clone())
                .with_rules(vec![InputRule::Required]),
        )
        .await?
        else {
            return Ok(None);
        };
        let Some(host) = ask(
            ui,
            PromptRequest::new("Host")
                .with_value(current.host.clone())
                .with_rules(vec![InputRule::Required]),
        )
        .await?
        else {
            return Ok(None);
        };
        let Some(port) = ask(
            ui,
            PromptRequest::new("Port")
                .with_value(current.port.to_string())
                .with_rules(vec![InputRule::Port]),
        )
        .await?
        else {
            return Ok(None);
        };
        let Some(user) = ask(
            ui,
            PromptRequest::new("Username")
                .with_value(current.user.clone())
                .with_rules(vec![InputRule::Required]),
        )
        .await?
        else {
            return Ok(None);
        };
        let Some(password) = ui
            .prompt(
                &PromptRequest::new("Password (optional)")
                    .with_value(current.password.clone().unwrap_or_default())
                    .masked(),
            )
            .await
        else {
            return Ok(None);
        };

        let port = port
            .parse()
            .map_err(|_| DbError::validation("port must be a number between 1 and 65535"))?;
        Ok(Some(ConnectionConfig {
            id: current.id.clone(),
            name,
            host,
            port,
            user,
            password: Some(password),
        }))
    }

    async fn add_connection(&self, ui: &mut dyn Interaction) -> Result<CommandOutcome, CommandError> {
        let template = ConnectionConfig::new("", "localhost", "root");
        let Some(config) = Self::connection_prompts(ui, &template).await? else {
            return Ok(CommandOutcome::Cancelled);
        };

        let name = config.name.clone();
        let mut connection = self.supplier.new_connection(config);
        connection.connect().await?;
        self.supplier.add_connection(connection).await?;
        ui.notify(Notice::info(format!("Successfully connected to {name}")));
        Ok(CommandOutcome::Completed)
    }

    async fn edit_connection(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let (id, _) = self.connection_target(target).await?;
        let current = self
            .supplier
            .configs()
            .await
            .into_iter()
            .find(|config| config.id == id)
            .ok_or(CommandError::ConnectionGone)?;
        let Some(edited) = Self::connection_prompts(ui, &current).await? else {
            return Ok(CommandOutcome::Cancelled);
        };

        let name = edited.name.clone();
        self.supplier.update_connection(edited).await?;
        ui.notify(Notice::info(format!("Connection {name} updated")));
        Ok(CommandOutcome::Completed)
    }

    async fn delete_connection(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let (id, connection) = self.connection_target(target).await?;
        let name = connection.lock().await.config().name.clone();
        if !ui
            .confirm(&format!("Delete connection `{name}`?"))
            .await
        {
            return Ok(CommandOutcome::Cancelled);
        }
        drop(connection);

        self.supplier.delete_connection(&id).await?;
        ui.notify(Notice::info(format!("Connection {name} deleted")));
        Ok(CommandOutcome::Completed)
    }

    async fn reconnect(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let (_, connection) = self.connection_target(target).await?;
        let mut session = connection.lock().await;
        let outcome = session.reconnect().await;
        self.supplier.changed(ChangeScope::Whole);
        outcome?;
        info!(connection = %session.config().name, "reconnected");
        ui.notify(Notice::info(format!("Reconnected to {}", session.config().name)));
        Ok(CommandOutcome::Completed)
    }

    async fn create_database(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let (_, connection) = self.connection_target(target).await?;
        let Some(name) = ask(
            ui,
            PromptRequest::new("Database name").with_rules(vec![InputRule::Required]),
        )
        .await?
        else {
            return Ok(CommandOutcome::Cancelled);
        };

        let mut session = connection.lock().await;
        session.create_database(&name).await?;
        self.supplier
            .changed(ChangeScope::Node(NodeKey::connection(session.config())));
        ui.notify(Notice::info(format!("Database `{name}` created")));
        Ok(CommandOutcome::Completed)
    }

    async fn drop_database(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = database_target(target)?;
        if is_system_schema(&target.database) {
            return Err(DbError::validation(format!(
                "`{}` is a protected system schema",
                target.database
            ))
            .into());
        }
        if !ui
            .confirm(&format!(
                "Drop database `{}`? This cannot be undone.",
                target.database
            ))
            .await
        {
            return Ok(CommandOutcome::Cancelled);
        }

        let mut session = target.connection.lock().await;
        session.drop_database(&target.database).await?;
        self.supplier
            .changed(ChangeScope::Node(NodeKey::connection(session.config())));
        ui.notify(Notice::info(format!("Database `{}` dropped", target.database)));
        Ok(CommandOutcome::Completed)
    }

    async fn rename_database(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = database_target(target)?;
        if is_system_schema(&target.database) {
            return Err(DbError::validation(format!(
                "`{}` is a protected system schema",
                target.database
            ))
            .into());
        }
        let Some(new_name) = ask(
            ui,
            PromptRequest::new("New database name")
                .with_value(target.database.clone())
                .with_rules(vec![
                    InputRule::Required,
                    InputRule::DiffersFrom(target.database.clone()),
                ]),
        )
        .await?
        else {
            return Ok(CommandOutcome::Cancelled);
        };
        if !ui
            .confirm(&format!(
                "Rename database `{}` to `{new_name}`? Tables are moved one at a time and a failure is not rolled back.",
                target.database
            ))
            .await
        {
            return Ok(CommandOutcome::Cancelled);
        }

        let mut session = target.connection.lock().await;
        let renamed = session.rename_database(&target.database, &new_name).await;
        // A partial move still changes the server, so refresh either way.
        self.supplier
            .changed(ChangeScope::Node(NodeKey::connection(session.config())));
        renamed?;
        ui.notify(Notice::info(format!(
            "Database `{}` renamed to `{new_name}`",
            target.database
        )));
        Ok(CommandOutcome::Completed)
    }

    async fn create_table(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = database_target(target)?;
        let Some(table) = ask(
            ui,
            PromptRequest::new("Table name").with_rules(vec![InputRule::Required]),
        )
        .await?
        else {
            return Ok(CommandOutcome::Cancelled);
        };

        target
            .connection
            .lock()
            .await
            .create_table(&target.database, &table)
            .await?;
        self.supplier.changed(ChangeScope::Node(NodeKey::database(
            &target.connection_id,
            &target.database,
        )));
        ui.notify(Notice::info(format!("Table `{table}` created")));
        Ok(CommandOutcome::Completed)
    }

    async fn rename_table(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = table_target(target)?;
        let Some(new_name) = ask(
            ui,
            PromptRequest::new("New table name")
                .with_value(target.table.clone())
                .with_rules(vec![
                    InputRule::Required,
                    InputRule::DiffersFrom(target.table.clone()),
                ]),
        )
        .await?
        else {
            return Ok(CommandOutcome::Cancelled);
        };

        target
            .connection
            .lock()
            .await
            .rename_table(&target.database, &target.table, &new_name)
            .await?;
        self.supplier.changed(ChangeScope::Node(target.database_key()));
        ui.notify(Notice::info(format!(
            "Table `{}` renamed to `{new_name}`",
            target.table
        )));
        Ok(CommandOutcome::Completed)
    }

    async fn duplicate_table(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = table_target(target)?;
        let Some(new_name) = ask(
            ui,
            PromptRequest::new("Name for the copy")
                .with_value(format!("{}_copy", target.table))
                .with_rules(vec![
                    InputRule::Required,
                    InputRule::DiffersFrom(target.table.clone()),
                ]),
        )
        .await?
        else {
            return Ok(CommandOutcome::Cancelled);
        };

        target
            .connection
            .lock()
            .await
            .duplicate_table(&target.database, &target.table, &new_name)
            .await?;
        self.supplier.changed(ChangeScope::Node(target.database_key()));
        ui.notify(Notice::info(format!(
            "Table `{}` duplicated as `{new_name}`",
            target.table
        )));
        Ok(CommandOutcome::Completed)
    }

    async fn truncate_table(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = table_target(target)?;
        if !ui
            .confirm(&format!(
                "Truncate table `{}`? All rows will be removed.",
                target.qualified()
            ))
            .await
        {
            return Ok(CommandOutcome::Cancelled);
        }

        target
            .connection
            .lock()
            .await
            .truncate_table(&target.database, &target.table)
            .await?;
        self.supplier.changed(ChangeScope::Node(target.database_key()));
        ui.notify(Notice::info(format!("Table `{}` truncated", target.table)));
        Ok(CommandOutcome::Completed)
    }

    async fn delete_table(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = table_target(target)?;
        if !ui
            .confirm(&format!(
                "Delete table `{}`? This cannot be undone.",
                target.qualified()
            ))
            .await
        {
            return Ok(CommandOutcome::Cancelled);
        }

        target
            .connection
            .lock()
            .await
            .delete_table(&target.database, &target.table)
            .await?;
        self.supplier.changed(ChangeScope::Node(target.database_key()));
        ui.notify(Notice::info(format!("Table `{}` deleted", target.table)));
        Ok(CommandOutcome::Completed)
    }

    async fn open_table(&self, target: Option<&TreeNode<D>>) -> Result<CommandOutcome, CommandError> {
        let target = table_target(target)?;
        let mut session = target.connection.lock().await;
        let columns = session
            .table_structure(&target.database, &target.table)
            .await?;
        let indexes = session
            .table_indexes(&target.database, &target.table)
            .await?;
        drop(session);

        Ok(CommandOutcome::Output(CommandOutput::TableView(TableView {
            default_query: sql::preview_select(&target.table, PREVIEW_LIMIT),
            database: target.database,
            table: target.table,
            columns,
            indexes,
        })))
    }

    async fn modify_table_encoding(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = table_target(target)?;
        let Some(charset) = ask(
            ui,
            PromptRequest::new("Character set")
                .with_value("utf8mb4")
                .with_rules(vec![InputRule::Required, InputRule::Identifier]),
        )
        .await?
        else {
            return Ok(CommandOutcome::Cancelled);
        };

        target
            .connection
            .lock()
            .await
            .modify_table_encoding(&target.database, &target.table, &charset)
            .await?;
        self.supplier.changed(ChangeScope::Node(target.database_key()));
        ui.notify(Notice::info(format!(
            "Table `{}` converted to {charset}",
            target.table
        )));
        Ok(CommandOutcome::Completed)
    }

    async fn modify_table_comment(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = table_target(target)?;
        let current = target
            .connection
            .lock()
            .await
            .table_info(&target.database, &target.table)
            .await?
            .comment;
        let Some(comment) = ask(ui, PromptRequest::new("Table comment").with_value(current)).await?
        else {
            return Ok(CommandOutcome::Cancelled);
        };

        target
            .connection
            .lock()
            .await
            .modify_table_comment(&target.database, &target.table, &comment)
            .await?;
        self.supplier.changed(ChangeScope::Node(target.database_key()));
        ui.notify(Notice::info(format!("Comment on `{}` updated", target.table)));
        Ok(CommandOutcome::Completed)
    }

    async fn reset_auto_increment(
        &self,
        target: Option<&TreeNode<D>>,
        ui: &mut dyn Interaction,
    ) -> Result<CommandOutcome, CommandError> {
        let target = table_target(target)?;
        let Some(value) = ask(
            ui,
            PromptRequest::new("Next AUTO_INCREMENT value")
                .with_value("1")
                .with_rules(vec![InputRule::Required, InputRule::Numeric]),
        )
        .await?
        else {
            return Ok(CommandOutcome::Cancelled);
        };
        let value: u64 = value
            .parse()
            .map_err(|_| DbError::validation("value must be a number"))?;

        target
            .connection
            .lock()
            .await
            .reset_auto_increment(&target.database, &target.table, value)
            .await?;
        self.supplier.changed(ChangeScope::Node(target.database_key()));
        ui.notify(Notice::info(format!(
            "AUTO_INCREMENT on `{}` set to {value}",
            target.table
        )));
        Ok(CommandOutcome::Completed)
    }
}

/// Prompts, then re-checks the answer against the request's rules.
async fn ask(
    ui: &mut dyn Interaction,
    request: PromptRequest,
) -> Result<Option<String>, CommandError> {
    let Some(answer) = ui.prompt(&request).await else {
        return Ok(None);
    };
    let answer = answer.trim().to_string();
    validate(&request.rules, &answer)?;
    Ok(Some(answer))
}

fn refresh_scope<D: Driver>(target: Option<&TreeNode<D>>) -> ChangeScope {
    match target {
        None | Some(TreeNode::Loading) => ChangeScope::Whole,
        // Retrying an error node means re-expanding its parent.
        Some(TreeNode::Error { parent, .. }) => parent
            .clone()
            .map_or(ChangeScope::Whole, ChangeScope::Node),
        Some(node) => ChangeScope::Node(node.key()),
    }
}

fn database_target<D: Driver>(
    target: Option<&TreeNode<D>>,
) -> Result<DatabaseTarget<D>, CommandError> {
    let node = target.ok_or(CommandError::MissingTarget("database"))?;
    let (Some(session), Some(database)) = (node.session(), node.database_name()) else {
        return Err(CommandError::MissingTarget("database"));
    };
    Ok(DatabaseTarget {
        connection_id: session.connection_id().to_string(),
        connection: session.upgrade().ok_or(CommandError::ConnectionGone)?,
        database: database.to_string(),
    })
}

fn table_target<D: Driver>(target: Option<&TreeNode<D>>) -> Result<TableTarget<D>, CommandError> {
    match target {
        Some(TreeNode::Table {
            session,
            database,
            name,
            ..
        }) => Ok(TableTarget {
            connection_id: session.connection_id().to_string(),
            connection: session.upgrade().ok_or(CommandError::ConnectionGone)?,
            database: database.clone(),
            table: name.clone(),
        }),
        _ => Err(CommandError::MissingTarget("table")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::broadcast::Receiver;

    use super::{
        commands_for, CommandDispatcher, CommandId, CommandOutcome, CommandOutput, Interaction,
        PromptRequest,
    };
    use crate::config::ConnectionConfig;
    use crate::node::{NodeKind, TreeNode};
    use crate::notice::{Notice, NoticeLevel};
    use crate::testing::{row, FakeDriver, RecordingStore};
    use crate::tree::{ChangeScope, TreeEvent, TreeSupplier};

    type Dispatcher = CommandDispatcher<FakeDriver, Arc<RecordingStore>>;

    #[derive(Default)]
    struct ScriptedUi {
        answers: VecDeque<Option<String>>,
        confirm_with: bool,
        confirmations: Vec<String>,
        prompts: Vec<PromptRequest>,
        notices: Vec<Notice>,
        clipboard: Option<String>,
    }

    impl ScriptedUi {
        fn answering(answers: &[&str]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|answer| Some((*answer).to_string()))
                    .collect(),
                confirm_with: true,
                ..Self::default()
            }
        }

        fn declining() -> Self {
            Self::default()
        }

        fn errors(&self) -> Vec<&str> {
            self.notices
                .iter()
                .filter(|notice| notice.level == NoticeLevel::Error)
                .map(|notice| notice.message.as_str())
                .collect()
        }
    }

    #[async_trait]
    impl Interaction for ScriptedUi {
        async fn confirm(&mut self, message: &str) -> bool {
            self.confirmations.push(message.to_string());
            self.confirm_with
        }

        async fn prompt(&mut self, request: &PromptRequest) -> Option<String> {
            self.prompts.push(request.clone());
            self.answers.pop_front().flatten()
        }

        fn notify(&mut self, notice: Notice) {
            self.notices.push(notice);
        }

        fn copy_to_clipboard(&mut self, text: &str) -> Result<(), String> {
            self.clipboard = Some(text.to_string());
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        driver: FakeDriver,
        store: Arc<RecordingStore>,
        connection: TreeNode<FakeDriver>,
        database: TreeNode<FakeDriver>,
        table: TreeNode<FakeDriver>,
    }

    impl Fixture {
        fn supplier(&self) -> &TreeSupplier<FakeDriver, Arc<RecordingStore>> {
            self.dispatcher.supplier()
        }

        fn statements_matching(&self, prefix: &str) -> usize {
            self.driver
                .statements()
                .iter()
                .filter(|statement| statement.starts_with(prefix))
                .count()
        }
    }

    async fn fixture() -> Fixture {
        let driver = FakeDriver::with_databases(&[
            ("information_schema", &["TABLES"]),
            ("app_db", &["users", "orders"]),
        ]);
        let store = Arc::new(RecordingStore::default());
        let supplier = Arc::new(TreeSupplier::new(
            Arc::new(driver.clone()),
            Arc::clone(&store),
        ));
        let mut config = ConnectionConfig::new("localhost", "localhost", "root");
        config.password = Some(String::new());
        supplier
            .add_connection(supplier.new_connection(config))
            .await
            .expect("add should persist");

        let connection = supplier.children(None).await.remove(0);
        let database = supplier
            .children(Some(&connection))
            .await
            .into_iter()
            .find(|node| node.label() == "app_db")
            .expect("app_db listed");
        let table = supplier.children(Some(&database)).await.remove(0);

        Fixture {
            dispatcher: CommandDispatcher::new(supplier),
            driver,
            store,
            connection,
            database,
            table,
        }
    }

    fn drain(events: &mut Receiver<TreeEvent>) -> Vec<TreeEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[tokio::test]
    async fn declined_confirmation_performs_no_mutation() {
        let fixture = fixture().await;
        let mut ui = ScriptedUi::declining();

        for id in [CommandId::TruncateTable, CommandId::DeleteTable] {
            let outcome = fixture
                .dispatcher
                .execute(id, Some(&fixture.table), &mut ui)
                .await;
            assert_eq!(outcome, CommandOutcome::Cancelled);
        }
        let outcome = fixture
            .dispatcher
            .execute(CommandId::DropDatabase, Some(&fixture.database), &mut ui)
            .await;
        assert_eq!(outcome, CommandOutcome::Cancelled);
        let outcome = fixture
            .dispatcher
            .execute(CommandId::DeleteConnection, Some(&fixture.connection), &mut ui)
            .await;
        assert_eq!(outcome, CommandOutcome::Cancelled);

        assert_eq!(ui.confirmations.len(), 4);
        assert_eq!(fixture.statements_matching("TRUNCATE"), 0);
        assert_eq!(fixture.statements_matching("DROP"), 0);
        assert_eq!(fixture.supplier().configs().await.len(), 1);
    }

    #[tokio::test]
    async fn system_schema_drop_fails_before_confirmation() {
        let fixture = fixture().await;
        let schema = fixture
            .supplier()
            .children(Some(&fixture.connection))
            .await
            .remove(0);
        let mut ui = ScriptedUi::answering(&[]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::DropDatabase, Some(&schema), &mut ui)
            .await;

        assert!(matches!(outcome, CommandOutcome::Failed(_)));
        assert!(ui.confirmations.is_empty());
        assert_eq!(fixture.statements_matching("DROP"), 0);
        assert_eq!(
            ui.errors(),
            ["Drop database failed: `information_schema` is a protected system schema"]
        );
    }

    #[tokio::test]
    async fn add_connection_registers_only_after_connecting() {
        let fixture = fixture().await;
        let mut ui = ScriptedUi::answering(&["staging", "10.0.0.4", "3307", "app", "pw"]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::AddConnection, None, &mut ui)
            .await;

        assert_eq!(outcome, CommandOutcome::Completed);
        let persisted = fixture.store.persisted();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[1].name, "staging");
        assert_eq!(persisted[1].port, 3307);
        assert_eq!(persisted[1].password.as_deref(), Some("pw"));
        assert_eq!(ui.prompts[1].value, "localhost");
        assert!(ui.prompts[4].password);
        assert_eq!(
            ui.notices.last().map(|notice| notice.message.as_str()),
            Some("Successfully connected to staging")
        );

        let roots = fixture.supplier().children(None).await;
        assert!(matches!(roots[1], TreeNode::Connection { connected: true, .. }));
    }

    #[tokio::test]
    async fn add_connection_failure_registers_nothing() {
        let fixture = fixture().await;
        fixture.driver.server().fail_connect = Some("Access denied".to_string());
        let writes = fixture.store.writes();
        let mut ui = ScriptedUi::answering(&["broken", "db", "3306", "root", ""]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::AddConnection, None, &mut ui)
            .await;

        assert_eq!(
            outcome,
            CommandOutcome::Failed("Add connection failed: Access denied".to_string())
        );
        assert_eq!(fixture.store.writes(), writes);
        assert_eq!(fixture.supplier().configs().await.len(), 1);
    }

    #[tokio::test]
    async fn dismissed_prompt_cancels_add_connection() {
        let fixture = fixture().await;
        let writes = fixture.store.writes();
        let mut ui = ScriptedUi::answering(&["staging"]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::AddConnection, None, &mut ui)
            .await;

        assert_eq!(outcome, CommandOutcome::Cancelled);
        assert_eq!(fixture.store.writes(), writes);
    }

    #[tokio::test]
    async fn returned_values_are_revalidated() {
        let fixture = fixture().await;
        let mut ui = ScriptedUi::answering(&["users"]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::RenameTable, Some(&fixture.table), &mut ui)
            .await;

        assert_eq!(
            outcome,
            CommandOutcome::Failed("Rename table failed: new value must differ from `users`".to_string())
        );
        assert_eq!(fixture.statements_matching("RENAME"), 0);

        let mut ui = ScriptedUi::answering(&["abc"]);
        let outcome = fixture
            .dispatcher
            .execute(CommandId::ResetAutoIncrement, Some(&fixture.table), &mut ui)
            .await;
        assert!(matches!(outcome, CommandOutcome::Failed(_)));
        assert_eq!(fixture.statements_matching("ALTER"), 0);
    }

    #[tokio::test]
    async fn table_mutations_refresh_the_database_node() {
        let fixture = fixture().await;
        let mut events = fixture.supplier().subscribe();
        let mut ui = ScriptedUi::answering(&["events"]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::CreateTable, Some(&fixture.database), &mut ui)
            .await;

        assert_eq!(outcome, CommandOutcome::Completed);
        assert_eq!(
            drain(&mut events),
            [TreeEvent::Changed(ChangeScope::Node(fixture.database.key()))]
        );
        assert_eq!(
            fixture.driver.tables("app_db"),
            Some(vec![
                "users".to_string(),
                "orders".to_string(),
                "events".to_string()
            ])
        );
    }

    #[tokio::test]
    async fn database_mutations_refresh_the_connection_node() {
        let fixture = fixture().await;
        let mut events = fixture.supplier().subscribe();
        let mut ui = ScriptedUi::answering(&["reporting"]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::CreateDatabase, Some(&fixture.table), &mut ui)
            .await;

        assert_eq!(outcome, CommandOutcome::Completed);
        assert_eq!(
            drain(&mut events),
            [TreeEvent::Changed(ChangeScope::Node(fixture.connection.key()))]
        );
        assert!(fixture.driver.tables("reporting").is_some());
    }

    #[tokio::test]
    async fn destructive_commands_refresh_the_narrowest_node() {
        for id in [
            CommandId::DropDatabase,
            CommandId::DeleteTable,
            CommandId::TruncateTable,
        ] {
            let fixture = fixture().await;
            let (target, expected) = match id {
                CommandId::DropDatabase => (&fixture.database, fixture.connection.key()),
                _ => (&fixture.table, fixture.database.key()),
            };
            let mut events = fixture.supplier().subscribe();
            let mut ui = ScriptedUi::answering(&[]);

            let outcome = fixture.dispatcher.execute(id, Some(target), &mut ui).await;

            assert_eq!(outcome, CommandOutcome::Completed, "{id:?}");
            assert_eq!(ui.confirmations.len(), 1, "{id:?}");
            assert_eq!(
                drain(&mut events),
                [TreeEvent::Changed(ChangeScope::Node(expected))],
                "{id:?}"
            );
        }
    }

    #[tokio::test]
    async fn failed_database_rename_still_refreshes_and_reports() {
        let fixture = fixture().await;
        fixture.driver.fail_statement(
            "RENAME TABLE `app_db`.`orders` TO `app_v2`.`orders`",
            "Error on rename",
        );
        let mut events = fixture.supplier().subscribe();
        let mut ui = ScriptedUi::answering(&["app_v2"]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::RenameDatabase, Some(&fixture.database), &mut ui)
            .await;

        assert_eq!(
            outcome,
            CommandOutcome::Failed("Rename database failed: Error on rename".to_string())
        );
        assert_eq!(
            drain(&mut events),
            [TreeEvent::Changed(ChangeScope::Node(fixture.connection.key()))]
        );
        assert_eq!(fixture.driver.tables("app_v2"), Some(vec!["users".to_string()]));
    }

    #[tokio::test]
    async fn delete_connection_after_confirmation() {
        let fixture = fixture().await;
        let mut ui = ScriptedUi::answering(&[]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::DeleteConnection, Some(&fixture.database), &mut ui)
            .await;

        assert_eq!(outcome, CommandOutcome::Completed);
        assert!(fixture.store.persisted().is_empty());
        assert_eq!(ui.confirmations, ["Delete connection `localhost`?"]);
    }

    #[tokio::test]
    async fn copy_create_table_uses_clipboard() {
        let fixture = fixture().await;
        fixture.driver.respond(
            "SHOW CREATE TABLE `app_db`.`users`",
            vec![row(&[
                ("Table", Some("users")),
                ("Create Table", Some("CREATE TABLE `users` (`id` int)")),
            ])],
        );
        let mut ui = ScriptedUi::answering(&[]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::CopyCreateTable, Some(&fixture.table), &mut ui)
            .await;

        assert_eq!(outcome, CommandOutcome::Completed);
        assert_eq!(ui.clipboard.as_deref(), Some("CREATE TABLE `users` (`id` int)"));
    }

    #[tokio::test]
    async fn open_table_collects_structure_indexes_and_default_query() {
        let fixture = fixture().await;
        let mut ui = ScriptedUi::answering(&[]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::OpenTable, Some(&fixture.table), &mut ui)
            .await;

        let CommandOutcome::Output(CommandOutput::TableView(view)) = outcome else {
            panic!("expected a table view, got {outcome:?}");
        };
        assert_eq!(view.database, "app_db");
        assert_eq!(view.table, "users");
        assert_eq!(view.default_query, "SELECT * FROM `users` LIMIT 10");
    }

    #[tokio::test]
    async fn execute_query_runs_in_the_table_database() {
        let fixture = fixture().await;
        let mut ui = ScriptedUi::answering(&["SELECT DATABASE()"]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::ExecuteQuery, Some(&fixture.table), &mut ui)
            .await;

        let CommandOutcome::Output(CommandOutput::Grid { title, result }) = outcome else {
            panic!("expected a grid, got {outcome:?}");
        };
        assert_eq!(title, "app_db");
        assert_eq!(result.rows[0].value_at(0), Some("app_db"));
    }

    #[tokio::test]
    async fn commands_without_a_target_fail_cleanly() {
        let fixture = fixture().await;
        let mut ui = ScriptedUi::answering(&[]);

        let outcome = fixture
            .dispatcher
            .execute(CommandId::ShowStructure, None, &mut ui)
            .await;

        assert_eq!(
            outcome,
            CommandOutcome::Failed("Show structure failed: select a table first".to_string())
        );
    }

    #[tokio::test]
    async fn refresh_on_error_node_targets_its_parent() {
        let fixture = fixture().await;
        let mut events = fixture.supplier().subscribe();
        let error = TreeNode::error(
            Some("id".to_string()),
            "Failed to connect",
            Some(fixture.connection.key()),
        );
        let mut ui = ScriptedUi::answering(&[]);

        fixture
            .dispatcher
            .execute(CommandId::Refresh, Some(&error), &mut ui)
            .await;

        assert_eq!(
            drain(&mut events),
            [TreeEvent::Changed(ChangeScope::Node(fixture.connection.key()))]
        );
    }

    #[test]
    fn commands_are_scoped_by_node_kind() {
        let for_table = commands_for(Some(NodeKind::Table));
        assert!(for_table.iter().any(|command| command.id == CommandId::OpenTable));
        assert!(for_table.iter().any(|command| command.id == CommandId::CreateDatabase));

        let for_root = commands_for(None);
        assert!(for_root.iter().all(|command| command.id != CommandId::DropDatabase));
        assert!(for_root.iter().any(|command| command.id == CommandId::AddConnection));
    }
}
