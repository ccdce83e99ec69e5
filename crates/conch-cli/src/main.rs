mod config;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use conch_core::filter::Filter;
use conch_core::record::ResultKind;
use conch_ingest::ingestor::{ImportProgress, ImportReport, IngestError, Ingestor, ProgressSink};
use conch_ingest::lock::ImportLock;
use conch_storage::{OpenState, ResultStore, SCHEMA_VERSION};
use config::{config_path, load_config, resolve_log_level, ConchConfig};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conch")]
#[command(about = "Local match-history store", long_about = None)]
struct Cli {
    /// Store database; overrides the config file.
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade the store schema
    Migrate,
    /// Import an export file
    Import {
        file: PathBuf,
        /// Read the file in windows instead of all at once
        #[arg(long)]
        stream: bool,
        #[arg(long, value_enum, default_value_t = ImportFormat::Conch)]
        format: ImportFormat,
    },
    /// Import documents from a Couchbase-Lite database
    ImportCblite {
        db: PathBuf,
        #[arg(long, value_enum)]
        kind: KindArg,
    },
    /// Export every result as json
    Export { file: PathBuf },
    /// List results, newest first
    List {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Print one result's detail
    Show { id: String },
    /// Count results
    Count {
        #[command(flatten)]
        filter: FilterArgs,
        /// Only results played at or after this epoch millisecond
        #[arg(long)]
        since: Option<i64>,
    },
    /// Print the distinct filter values
    Options,
    /// Remove one result
    Remove { id: String },
    /// Delete every result
    Clear,
    /// Drop all tables
    Drop,
}

#[derive(Clone, Copy, ValueEnum)]
enum ImportFormat {
    Conch,
    S3s,
    Salmdroid,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Battle,
    Coop,
}

impl From<KindArg> for ResultKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Battle => ResultKind::Battle,
            KindArg::Coop => ResultKind::Coop,
        }
    }
}

#[derive(Args, Default)]
struct FilterArgs {
    #[arg(long = "player")]
    players: Vec<String>,
    #[arg(long = "mode")]
    modes: Vec<String>,
    #[arg(long = "rule")]
    rules: Vec<String>,
    #[arg(long = "stage")]
    stages: Vec<String>,
    #[arg(long = "weapon")]
    weapons: Vec<String>,
    #[arg(long)]
    invert: bool,
}

impl FilterArgs {
    fn to_filter(&self) -> Option<Filter> {
        let filter = Filter {
            players: self.players.iter().cloned().collect(),
            modes: self.modes.iter().cloned().collect(),
            rules: self.rules.iter().cloned().collect(),
            stages: self.stages.iter().cloned().collect(),
            weapons: self.weapons.iter().cloned().collect(),
            inverted: self.invert,
        };
        (!filter.is_empty()).then_some(filter)
    }
}

struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&mut self, progress: ImportProgress) {
        info!(
            event = "import_progress",
            processed = progress.processed,
            total = progress.total
        );
    }
}

#[derive(Serialize)]
struct ImportSummary<'a> {
    added: usize,
    #[serde(flatten)]
    report: &'a ImportReport,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&config_path())?;
    init_logging(&cli, &config);

    let database = cli.database.clone().unwrap_or_else(|| config.database_path());
    if let Err(err) = run(cli.command, &database, &config) {
        error!(event = "command_failed", error = %format!("{err:#}"));
        return Err(err);
    }
    Ok(())
}

fn init_logging(cli: &Cli, config: &ConchConfig) {
    let level = resolve_log_level(
        cli.debug,
        std::env::var("CONCH_LOG_LEVEL").ok(),
        config.log_level.as_deref(),
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn connect_store(database: &Path, config: &ConchConfig) -> Result<ResultStore> {
    if let Some(parent) = database.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    ResultStore::connect(database, config.store_config())
        .with_context(|| format!("failed to open {}", database.display()))
}

fn open_state(store: &ResultStore) -> Result<OpenState> {
    match store.open() {
        Ok(state) => Ok(state),
        Err(err) if err.is_fatal() => Err(err).context(
            "the store cannot be used; export what you can and recreate it with `conch drop`",
        ),
        Err(err) => Err(err.into()),
    }
}

fn run(command: Commands, database: &Path, config: &ConchConfig) -> Result<()> {
    let store = connect_store(database, config)?;

    // Dropping must work on a store that can no longer be opened.
    if let Commands::Drop = command {
        store.drop_tables()?;
        println!("dropped all tables");
        return Ok(());
    }
    if let Commands::Migrate = command {
        match open_state(&store)? {
            OpenState::Ready => println!("store is at version {SCHEMA_VERSION}"),
            OpenState::NeedsUpgrade { from } => {
                store.migrate().context("migration failed")?;
                println!("migrated store from version {from} to {SCHEMA_VERSION}");
            }
        }
        return Ok(());
    }
    if let OpenState::NeedsUpgrade { from } = open_state(&store)? {
        bail!("store is at version {from}; run `conch migrate` first");
    }

    match command {
        Commands::Migrate | Commands::Drop => {}
        Commands::Import {
            file,
            stream,
            format,
        } => {
            let _lock = acquire_import_lock(database)?;
            let ingestor = Ingestor::new(&store, config.ingest_config());
            let report = match (format, stream) {
                (ImportFormat::Conch, true) => {
                    let reader = BufReader::new(open_file(&file)?);
                    ingestor.import_json_stream_with_progress(reader, &mut LogProgress)?
                }
                (ImportFormat::Conch, false) => {
                    ingestor.import_json_with_progress(&read_file(&file)?, &mut LogProgress)?
                }
                (ImportFormat::S3s, _) => ingestor.import_s3s(&read_file(&file)?)?,
                (ImportFormat::Salmdroid, _) => ingestor.import_salmdroid(&read_file(&file)?)?,
            };
            print_report(&report)?;
        }
        Commands::ImportCblite { db, kind } => {
            let _lock = acquire_import_lock(database)?;
            let ingestor = Ingestor::new(&store, config.ingest_config());
            let report =
                ingestor.import_cblite_with_progress(&db, kind.into(), &mut LogProgress)?;
            print_report(&report)?;
        }
        Commands::Export { file } => {
            let writer = BufWriter::new(
                File::create(&file)
                    .with_context(|| format!("failed to create {}", file.display()))?,
            );
            let summary = store.export_json(writer)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::List {
            offset,
            limit,
            filter,
        } => {
            let results = store.query_detail(offset, limit, filter.to_filter().as_ref())?;
            for result in results {
                let brief = &result.brief;
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    brief.id,
                    brief.time,
                    brief.kind().as_str(),
                    brief.mode,
                    brief.rule,
                    brief.stage
                );
            }
        }
        Commands::Show { id } => match store.query_detail_by_id(&id)? {
            Some(result) => {
                println!("{}", serde_json::to_string_pretty(&result.detail_json()?)?)
            }
            None => bail!("no result with id {id}"),
        },
        Commands::Count { filter, since } => {
            println!("{}", store.count(filter.to_filter().as_ref(), since)?);
        }
        Commands::Options => {
            println!("{}", serde_json::to_string_pretty(&store.distinct_values()?)?);
        }
        Commands::Remove { id } => {
            if !store.remove(&id)? {
                warn!(event = "remove_missing", id = %id);
                bail!("no result with id {id}");
            }
            println!("removed {id}");
        }
        Commands::Clear => {
            store.clear()?;
            println!("cleared all results");
        }
    }

    store.close()?;
    Ok(())
}

fn acquire_import_lock(database: &Path) -> Result<ImportLock> {
    let mut name = database.as_os_str().to_owned();
    name.push(".import.lock");
    let path = PathBuf::from(name);
    match ImportLock::try_acquire(&path)
        .with_context(|| format!("failed to open lock {}", path.display()))?
    {
        Some(lock) => Ok(lock),
        None => Err(IngestError::Busy(path.display().to_string()).into()),
    }
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("failed to open {}", path.display()))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_report(report: &ImportReport) -> Result<()> {
    let summary = ImportSummary {
        added: report.added(),
        report,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
