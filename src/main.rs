use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use labsync::api::{start_webhook_server, ApiContext, WebhookServer};
use labsync::config::{self, AppConfig};
use labsync::models::MatchRequest;
use labsync::pipeline::ingest::{
    BatchEvent, BatchProcessor, ExamStore, HttpExtractionGateway, ResultSynchronizer,
    SqliteExamStore, SyncLockRegistry, UploadFile, UploadOptions, UploadOrchestrator,
};

#[derive(Parser)]
#[command(name = "labsync")]
#[command(about = "Upload lab reports and reconcile extracted biomarker readings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one or more lab reports and wait for extraction
    Upload {
        /// Report files (PDF or image)
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Attach every file to this patient instead of matching by name
        #[arg(long)]
        patient: Option<Uuid>,
        /// Exam date (YYYY-MM-DD)
        #[arg(long)]
        exam_date: Option<NaiveDate>,
        /// Uploader identity recorded on the exam
        #[arg(long, env = "LABSYNC_UPLOADED_BY")]
        uploaded_by: Option<String>,
        /// Also accept completion webhooks while uploading
        #[arg(long)]
        listen: bool,
    },
    /// Run the completion webhook server until interrupted
    Serve,
    /// List stored exams
    Exams,
}

/// Shared components built once per invocation.
struct Services {
    store: SqliteExamStore,
    synchronizer: Arc<ResultSynchronizer>,
}

impl Services {
    fn open(config: &AppConfig) -> anyhow::Result<Self> {
        let store = SqliteExamStore::open(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path.display()))?;
        let shared: Arc<dyn ExamStore> = Arc::new(store.clone());
        let synchronizer = Arc::new(ResultSynchronizer::new(shared, Arc::new(SyncLockRegistry::new())));
        Ok(Self { store, synchronizer })
    }

    fn api_context(&self, config: &AppConfig) -> ApiContext {
        let ctx = ApiContext::new(Arc::new(self.store.clone()), self.synchronizer.clone());
        match &config.webhook_secret {
            Some(secret) => ctx.with_secret(secret.as_str()),
            None => ctx,
        }
    }

    async fn start_webhooks(&self, config: &AppConfig) -> anyhow::Result<WebhookServer> {
        start_webhook_server(self.api_context(config), config.webhook_addr)
            .await
            .with_context(|| format!("binding webhook server on {}", config.webhook_addr))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    tracing::debug!(db = %config.db_path.display(), "{} v{}", config::APP_NAME, config::APP_VERSION);

    let services = Services::open(&config)?;

    match cli.command {
        Commands::Upload {
            files,
            patient,
            exam_date,
            uploaded_by,
            listen,
        } => {
            let options = UploadOptions {
                target_patient: patient,
                exam_date,
                uploaded_by,
            };
            upload(&config, &services, files, options, listen).await
        }
        Commands::Serve => {
            let server = services.start_webhooks(&config).await?;
            println!("Listening for completion webhooks on {}", server.addr());
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            server.stop().await;
            Ok(())
        }
        Commands::Exams => {
            let exams = services.store.list_exams()?;
            if exams.is_empty() {
                println!("No exams found.");
            }
            for exam in exams {
                println!(
                    "{}  {:<10}  {:<32}  biomarkers: {}  patient: {}",
                    exam.id,
                    exam.processing_status.as_str(),
                    exam.storage_file_name,
                    exam.total_biomarkers.map_or("-".to_string(), |n| n.to_string()),
                    exam.patient_name_extracted.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
    }
}

async fn upload(
    config: &AppConfig,
    services: &Services,
    paths: Vec<PathBuf>,
    options: UploadOptions,
    listen: bool,
) -> anyhow::Result<()> {
    let gateway = Arc::new(HttpExtractionGateway::new(
        config.require_proxy_url()?,
        config.api_key.clone(),
        config.http_timeout_secs,
    )?);

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        files.push(UploadFile::from_path(path).await?);
    }

    let server = if listen {
        Some(services.start_webhooks(config).await?)
    } else {
        None
    };

    let store: Arc<dyn ExamStore> = Arc::new(services.store.clone());
    let orchestrator = Arc::new(UploadOrchestrator::new(
        gateway.clone(),
        gateway,
        store,
        services.synchronizer.clone(),
        config.watch.clone(),
    ));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let batch = BatchProcessor::new(orchestrator, Arc::new(services.store.clone())).with_events(tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let items = batch.run(files, &options).await;

    for exam_id in batch.awaiting_match() {
        let Some(request) = items
            .iter()
            .filter_map(|item| item.pending_match.as_ref())
            .find(|request| request.exam_id == exam_id)
        else {
            continue;
        };
        let patient_id = prompt_for_patient(request).await?;
        let item = batch.confirm_match(exam_id, patient_id).await?;
        println!("{}: assigned to patient {}", item.file_name, patient_id);
    }

    drop(batch);
    let _ = printer.await;

    if let Some(server) = server {
        server.stop().await;
    }

    let failed = items.iter().filter(|item| item.error.is_some()).count();
    if failed > 0 {
        bail!("{failed} of {} uploads failed", items.len());
    }
    Ok(())
}

fn print_event(event: &BatchEvent) {
    match event {
        BatchEvent::Queued { items } => println!("Queued {} file(s)", items.len()),
        BatchEvent::ItemUpdated { item } => {
            println!("[{:>3}%] {}: {}", item.progress, item.file_name, item.message);
            if let Some(error) = &item.error {
                eprintln!("       {}: {}", item.file_name, error);
            }
        }
        BatchEvent::MatchRequired { request, .. } => {
            println!(
                "Patient \"{}\" needs confirmation ({} candidates)",
                request.extracted_name,
                request.candidates.len()
            );
        }
        BatchEvent::Finished { summary } => println!(
            "Done: {} completed, {} failed, {} in background, {} awaiting match",
            summary.completed, summary.failed, summary.background, summary.awaiting_match
        ),
    }
}

async fn prompt_for_patient(request: &MatchRequest) -> anyhow::Result<Uuid> {
    println!("Which patient is \"{}\"?", request.extracted_name);
    for (i, candidate) in request.candidates.iter().enumerate() {
        println!(
            "  {}) {} ({:.0}% similar)",
            i + 1,
            candidate.full_name,
            candidate.similarity
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Choice [1-{}]:", request.candidates.len());
        let Some(line) = lines.next_line().await? else {
            bail!("no patient chosen for \"{}\"", request.extracted_name);
        };
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=request.candidates.len()).contains(&n) => {
                return Ok(request.candidates[n - 1].patient_id);
            }
            _ => println!("Enter a number from the list."),
        }
    }
}
