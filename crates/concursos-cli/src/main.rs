use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use concursos_core::{
    derive_view, filtered_sorted, EditalStatus, InterestStatus, SortDirection, SortField, SortSpec,
    ViewQuery, ViewState,
};
use concursos_csv::{export_csv, export_filename, import_into_store, ImportMode};
use concursos_enrich::{enrich_regions, refine_dates, EnrichError, GeminiService};
use concursos_storage::{ConcursoStore, StorageConfig};
use concursos_web::{AppState, WebConfig};
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "concursos-cli")]
#[command(about = "Track Brazilian public-service exam announcements")]
struct Cli {
    /// Directory holding the persisted store. Defaults to $CONCURSOS_DATA_DIR or ./data.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replace the collection with a CSV sheet.
    Import {
        file: PathBuf,
        /// Keep stored records that are absent from the sheet.
        #[arg(long)]
        keep_missing: bool,
    },
    /// Write the filtered, sorted view as CSV.
    Export {
        /// Output path; `-` writes to stdout. Defaults to the dated export filename.
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Print the filtered, sorted view.
    List {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, default_value_t = concursos_core::PAGE_SIZE)]
        limit: usize,
    },
    /// Mark a record as none, interested or ignored.
    Interest { id: String, status: InterestStatus },
    /// Fill missing region codes through the AI service.
    EnrichRegions,
    /// Normalize free-text dates through the AI service.
    RefineDates,
    /// Run the web UI.
    Serve {
        /// Defaults to $CONCURSOS_WEB_PORT or 8000.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// Case-insensitive text over institution, board and source.
    #[arg(long, default_value = "")]
    text: String,
    #[arg(long, default_value = "")]
    region: String,
    #[arg(long)]
    status: Option<EditalStatus>,
    #[arg(long)]
    sort: Option<SortField>,
    #[arg(long)]
    desc: bool,
}

impl FilterArgs {
    fn query(&self) -> ViewQuery {
        ViewQuery {
            text: self.text.clone(),
            region: self.region.clone(),
            status: self.status.map(|s| s.label().to_string()).unwrap_or_default(),
        }
    }

    fn sort(&self) -> Option<SortSpec> {
        self.sort.map(|field| SortSpec {
            field,
            direction: if self.desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            },
        })
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concursos=info,tower_http=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let data_dir = cli
        .data_dir
        .unwrap_or_else(|| StorageConfig::from_env().data_dir);
    let mut store = ConcursoStore::open_dir(&data_dir);
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Import { file, keep_missing } => {
            let contents =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let mode = if keep_missing {
                ImportMode::KeepMissing
            } else {
                ImportMode::Replace
            };
            let summary = import_into_store(&mut store, contents, mode)
                .with_context(|| format!("importing {}", file.display()))?;
            println!(
                "import complete: imported={} retained={} total={}",
                summary.imported,
                summary.retained,
                store.len()
            );
        }
        Commands::Export { out, filters } => {
            let rows = filtered_sorted(store.records(), &filters.query(), filters.sort(), today);
            let csv = export_csv(&rows)?;
            let out = out.unwrap_or_else(|| PathBuf::from(export_filename(today)));
            if out.as_os_str() == "-" {
                print!("{csv}");
            } else {
                std::fs::write(&out, csv).with_context(|| format!("writing {}", out.display()))?;
                eprintln!("exported {} rows to {}", rows.len(), out.display());
            }
        }
        Commands::List { filters, limit } => {
            let state = ViewState {
                query: filters.query(),
                sort: filters.sort(),
                visible_count: limit,
            };
            let view = derive_view(store.records(), &state, today);
            for row in &view.rows {
                let c = row.record;
                println!(
                    "{:<15} {:<4} {} | {} | fim inscr. {} | prova {} | {}",
                    row.status.label(),
                    c.location,
                    c.institution,
                    c.board,
                    c.registration_end,
                    c.exam_date,
                    c.id
                );
            }
            println!("{} of {} concursos", view.rows.len(), view.total);
        }
        Commands::Interest { id, status } => {
            if store.set_interest(&id, status)? {
                println!("{id}: {status}");
            } else {
                warn!(%id, "no concurso with that id");
            }
        }
        Commands::EnrichRegions => {
            let service = GeminiService::from_env().context("configuring gemini client")?;
            let shared = store.into_shared();
            match enrich_regions(&shared, &service).await {
                Ok(s) => println!(
                    "regions: targets={} classified={} grounded={} unresolved={}",
                    s.targets, s.classified, s.grounded, s.unresolved
                ),
                Err(EnrichError::NothingToDo) => println!("every concurso already has a region"),
                Err(err) => return Err(err).context("region enrichment failed"),
            }
        }
        Commands::RefineDates => {
            let service = GeminiService::from_env().context("configuring gemini client")?;
            let shared = store.into_shared();
            match refine_dates(&shared, &service).await {
                Ok(s) => println!("dates: sent={} applied={}", s.sent, s.applied),
                Err(EnrichError::NothingToDo) => println!("no dates left to refine"),
                Err(err) => return Err(err).context("date refinement failed"),
            }
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| WebConfig::from_env().port);
            let mut state = AppState::new(store.into_shared());
            match GeminiService::from_env() {
                Ok(service) => state = state.with_enrichment(Arc::new(service)),
                Err(err) => warn!(error = %err, "ai enrichment disabled"),
            }
            concursos_web::serve(state, port).await?;
        }
    }

    Ok(())
}
