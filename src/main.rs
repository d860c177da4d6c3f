//! shelfsync - Book catalog sync for a blog content API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shelfsync::{
    api::{self, ApiState},
    auth::{CredentialStore, DeviceCodeGrant, GrantFlow, Scope, StaticGrant, Vault},
    config::{default_data_dir, SyncConfig},
    export::{backup_file_name, export_catalog},
    gateway::{blogger::BloggerClient, drive::DriveClient, AssetSession, ContentSession},
    hosting::{check_asset_size, content_type_for, AssetHost},
    reconcile::{validate, ReconcilePolicy, Reconciler},
    search::search_posts,
    shelf::{format_file_size, BookShelf},
    stats::catalog_stats,
};

/// Sync a book catalog with a blog and manage its assets.
#[derive(Parser)]
#[command(name = "shelfsync", about = "Book catalog sync for a blog content API", version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Connection and credential settings shared by every command.
#[derive(Args)]
struct Settings {
    /// Blog whose posts make up the catalog.
    #[arg(long, env = "SHELFSYNC_BLOG_ID", global = true, default_value = "")]
    blog_id: String,

    /// API key sent with content requests.
    #[arg(long, env = "SHELFSYNC_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// OAuth client id for the device sign-in flow.
    #[arg(long, env = "SHELFSYNC_CLIENT_ID", global = true)]
    client_id: Option<String>,

    /// OAuth client secret, if the client type needs one.
    #[arg(long, env = "SHELFSYNC_CLIENT_SECRET", global = true, hide_env_values = true)]
    client_secret: Option<String>,

    /// Pre-issued content token. Skips the sign-in flow.
    #[arg(long, env = "SHELFSYNC_CONTENT_TOKEN", global = true, hide_env_values = true)]
    content_token: Option<String>,

    /// Pre-issued file storage token. Skips the sign-in flow.
    #[arg(long, env = "SHELFSYNC_ASSET_TOKEN", global = true, hide_env_values = true)]
    asset_token: Option<String>,

    /// Directory holding the persisted content credential.
    #[arg(long, env = "SHELFSYNC_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Time limit for each remote call, in seconds.
    #[arg(long, env = "SHELFSYNC_TIMEOUT_SECS", global = true, default_value_t = 30)]
    timeout_secs: u64,

    /// Pause after each successful write during a sync, in milliseconds.
    #[arg(long, env = "SHELFSYNC_WRITE_DELAY_MS", global = true, default_value_t = 500)]
    write_delay_ms: u64,

    /// Slow down further writes after the remote rate limits one.
    #[arg(long, env = "SHELFSYNC_RATE_LIMIT_BACKOFF", global = true)]
    rate_limit_backoff: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API daemon.
    Daemon {
        /// Address to bind the API server.
        #[arg(long, default_value = "127.0.0.1:7879", env = "SHELFSYNC_BIND")]
        bind: String,
    },

    /// Check an import document without contacting the blog.
    Validate {
        /// Import document (JSON).
        file: PathBuf,
    },

    /// Sync the posts of an import document into the blog.
    Import {
        /// Import document (JSON).
        file: PathBuf,

        /// Overwrite posts that already exist.
        #[arg(long)]
        update_existing: bool,

        /// Create new posts as drafts.
        #[arg(long)]
        as_draft: bool,

        /// Also write the report to this file.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Report what would change without writing to the blog.
        #[arg(long)]
        dry_run: bool,
    },

    /// Export blog posts to a JSON document.
    Export {
        /// Only these post ids (comma-separated).
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        /// Output file. Defaults to a dated backup name.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show catalog statistics.
    Stats,

    /// Search posts by title and body.
    Search {
        /// Search text. Lists every post when empty.
        #[arg(default_value = "")]
        query: String,
    },

    /// Host a local file through the blog and print its public URL.
    Host {
        file: PathBuf,

        /// Content type. Guessed from the extension when absent.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Manage book files in the file store.
    Books {
        #[command(subcommand)]
        command: BookCommands,
    },

    /// Sign in to a scope (content or asset).
    Login { scope: Scope },

    /// Sign out of a scope (content or asset).
    Logout { scope: Scope },

    /// Show local configuration and sign-in state.
    Status,
}

#[derive(Subcommand)]
enum BookCommands {
    /// List book files.
    List,

    /// Upload a book file.
    Upload {
        file: PathBuf,

        /// Folder id to upload into.
        #[arg(long)]
        folder: Option<String>,
    },

    /// Share a book file publicly and print its links.
    Publish { id: String },

    /// Delete a book file.
    Remove { id: String },
}

/// Vault and sessions built from [`Settings`].
struct Services {
    config: SyncConfig,
    vault: Arc<Vault>,
    content: ContentSession,
    assets: AssetSession,
}

impl Settings {
    fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(self.blog_id.clone())
            .with_data_dir(self.data_dir.clone().unwrap_or_else(default_data_dir))
            .with_request_timeout(Duration::from_secs(self.timeout_secs))
            .with_write_delay(Duration::from_millis(self.write_delay_ms))
            .with_rate_limit_backoff(self.rate_limit_backoff);
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key.clone());
        }
        config
    }

    fn grant_flow(&self, http: &reqwest::Client, scope: Scope) -> Arc<dyn GrantFlow> {
        let token = match scope {
            Scope::Content => self.content_token.clone(),
            Scope::Asset => self.asset_token.clone(),
        };
        if token.is_some() {
            return Arc::new(StaticGrant::from_option(token));
        }

        match &self.client_id {
            Some(client_id) => {
                let flow = match scope {
                    Scope::Content => DeviceCodeGrant::for_content(http.clone(), client_id.clone()),
                    Scope::Asset => DeviceCodeGrant::for_assets(http.clone(), client_id.clone()),
                };
                Arc::new(flow.with_client_secret(self.client_secret.clone()))
            }
            None => Arc::new(StaticGrant::none()),
        }
    }

    fn services(&self) -> Result<Services> {
        let config = self.config();
        let http = reqwest::Client::builder()
            .user_agent(concat!("shelfsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        let vault = Arc::new(Vault::open(
            self.grant_flow(&http, Scope::Content),
            self.grant_flow(&http, Scope::Asset),
            CredentialStore::in_dir(&config.data_dir),
        ));
        let content = ContentSession::content(
            Arc::new(BloggerClient::new(http.clone(), &config)),
            vault.clone(),
            config.request_timeout,
        );
        let assets = AssetSession::assets(
            Arc::new(DriveClient::new(http, &config)),
            vault.clone(),
            config.request_timeout,
        );

        Ok(Services {
            config,
            vault,
            content,
            assets,
        })
    }
}

impl Services {
    fn require_blog(&self) -> Result<()> {
        if self.config.blog_id.is_empty() {
            bail!("no blog configured: pass --blog-id or set SHELFSYNC_BLOG_ID");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelfsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let services = cli.settings.services()?;
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        // Purely local, never contacts the blog.
        Commands::Validate { file } => {
            validate_file(&file)?;
        }

        Commands::Daemon { bind } => {
            run_daemon(services, &bind, cancel).await?;
        }

        Commands::Import {
            file,
            update_existing,
            as_draft,
            report,
            dry_run,
        } => {
            services.require_blog()?;
            let policy = ReconcilePolicy {
                skip_existing: !update_existing,
                update_existing,
                host_as_draft: as_draft,
            };
            import_file(&services, &file, policy, report.as_deref(), dry_run, &cancel).await?;
        }

        Commands::Export { ids, out } => {
            services.require_blog()?;
            let selected = (!ids.is_empty()).then_some(ids);
            let document = export_catalog(&services.content, selected.as_deref()).await?;
            let out = out.unwrap_or_else(|| {
                PathBuf::from(backup_file_name(document.export_date.date_naive()))
            });
            write_json(&out, &document)?;
            println!("Exported {} posts to {}", document.total_posts, out.display());
        }

        Commands::Stats => {
            services.require_blog()?;
            let stats = catalog_stats(&services.content).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Search { query } => {
            services.require_blog()?;
            let results = search_posts(&services.content, &query).await?;
            for post in &results.items {
                println!("{}\t{:?}\t{}", post.id, post.status, post.title);
            }
            println!("{} result(s)", results.total);
        }

        Commands::Host { file, content_type } => {
            services.require_blog()?;
            let binary = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            check_asset_size(binary.len())
                .with_context(|| format!("refusing to host {}", file.display()))?;
            let content_type = content_type.unwrap_or_else(|| {
                content_type_for(&file.to_string_lossy()).to_string()
            });
            let url = AssetHost::new(services.content.clone())
                .host(&binary, &content_type, &cancel)
                .await?;
            println!("{}", url);
        }

        Commands::Books { command } => {
            run_books(&services, command).await?;
        }

        Commands::Login { scope } => {
            if scope == Scope::Content {
                services.require_blog()?;
            }
            let credential = services.vault.acquire(scope).await?;
            println!("Signed in to {} at {}", scope, credential.acquired_at);
            if scope == Scope::Asset {
                println!("Asset sign-in lasts for this process only.");
            }
        }

        Commands::Logout { scope } => {
            services.vault.invalidate(scope).await;
            println!("Signed out of {}", scope);
        }

        Commands::Status => {
            show_status(&services);
        }
    }

    Ok(())
}

/// Cancel the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current step");
            trigger.cancel();
        }
    });
    cancel
}

fn read_document(path: &Path) -> Result<serde_json::Value> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn validate_file(path: &Path) -> Result<()> {
    let result = validate(&read_document(path)?);
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.valid {
        bail!("{} has {} problem(s)", path.display(), result.errors.len());
    }
    Ok(())
}

async fn import_file(
    services: &Services,
    path: &Path,
    policy: ReconcilePolicy,
    report_path: Option<&Path>,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let document = read_document(path)?;
    let reconciler = Reconciler::new(services.content.clone(), &services.config);
    let report = if dry_run {
        reconciler.dry_run(&document, policy, cancel).await?
    } else {
        reconciler.import(&document, policy, cancel).await?
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(report_path) = report_path {
        write_json(report_path, &report)?;
    }

    if !report.is_clean() {
        bail!("{} of {} posts failed", report.failed(), report.total());
    }
    Ok(())
}

async fn run_books(services: &Services, command: BookCommands) -> Result<()> {
    let shelf = BookShelf::new(services.assets.clone());

    match command {
        BookCommands::List => {
            for book in shelf.list().await? {
                let size = book.size_bytes().map(format_file_size).unwrap_or_default();
                println!("{}\t{}\t{}", book.id, book.name, size);
            }
        }
        BookCommands::Upload { file, folder } => {
            let book = shelf.with_folder(folder).upload_file(&file).await?;
            println!("Uploaded {} as {}", book.name, book.id);
        }
        BookCommands::Publish { id } => {
            let links = shelf.publish(&id).await?;
            println!("{}", serde_json::to_string_pretty(&links)?);
        }
        BookCommands::Remove { id } => {
            shelf.remove(&id).await?;
            println!("Removed {}", id);
        }
    }

    Ok(())
}

fn show_status(services: &Services) {
    let config = &services.config;
    println!("shelfsync {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Blog:        {}",
        if config.blog_id.is_empty() { "(not set)" } else { config.blog_id.as_str() }
    );
    println!("  Data dir:    {}", config.data_dir.display());
    println!("  Content:     {}", signed_in(services.vault.has(Scope::Content)));
    println!("  Asset:       {}", signed_in(services.vault.has(Scope::Asset)));
}

fn signed_in(held: bool) -> &'static str {
    if held {
        "signed in"
    } else {
        "signed out"
    }
}

/// Run the API daemon.
async fn run_daemon(services: Services, bind: &str, shutdown: CancellationToken) -> Result<()> {
    services.require_blog()?;
    tracing::info!(blog_id = %services.config.blog_id, "Starting shelfsync daemon...");

    let state = Arc::new(ApiState::new(
        services.vault,
        services.content,
        services.assets,
        services.config,
        shutdown,
    ));

    // Start API server
    api::serve(state, bind).await?;

    Ok(())
}
