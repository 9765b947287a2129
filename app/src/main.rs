use std::error::Error;
use std::fs::{self, OpenOptions};
use std::sync::{Arc, Mutex};

use sqlnav_adapters::MysqlDriver;
use sqlnav_core::settings::Settings;
use sqlnav_core::{CommandDispatcher, Driver, FileStateStore, StateStore, TreeSupplier};
use sqlnav_tui::TuiError;
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// The terminal is in raw mode while the UI runs, so logs go to a file.
fn init_logging(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let path = settings.effective_log_file()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_new(settings.effective_log_filter())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|error| error as Box<dyn Error>)?;
    Ok(())
}

fn run_app<D: Driver, S: StateStore>(
    supplier: Arc<TreeSupplier<D, S>>,
    runtime: &Runtime,
    run_tui: impl FnOnce(&CommandDispatcher<D, S>, &Runtime) -> Result<(), TuiError>,
) -> Result<(), Box<dyn Error>> {
    if let Err(error) = runtime.block_on(supplier.initialize()) {
        warn!(%error, "starting without saved connections");
    }

    let dispatcher = CommandDispatcher::new(supplier);
    run_tui(&dispatcher, runtime)?;
    info!("sqlnav exiting");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let settings = Settings::load_default()?;
    init_logging(&settings)?;

    let runtime = Builder::new_current_thread().enable_all().build()?;
    let store = FileStateStore::open_default()?;
    info!(ui = sqlnav_tui::ui_name(), state = %store.path().display(), "starting sqlnav");

    let supplier = Arc::new(TreeSupplier::new(Arc::new(MysqlDriver), store));
    run_app(supplier, &runtime, sqlnav_tui::run)
}
