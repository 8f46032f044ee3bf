use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "hg")]
#[command(about = "holdgate operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base first, overlays after)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Configuration validation
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Wallet ↔ principal links
    Wallet {
        #[command(subcommand)]
        cmd: WalletCmd,
    },

    /// Run one verification for a principal (same pipeline as the daemon)
    Verify {
        #[arg(long)]
        principal: String,

        /// Layered config paths in merge order (default: $HG_CONFIG or config/holdgate.yaml)
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Re-verify every known principal with bounded concurrency
    Resync {
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Override verification.resync_concurrency
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Load, validate rules and report unused keys. No DB, no secrets.
    Check {
        #[arg(required = true)]
        paths: Vec<String>,

        /// Fail (instead of warn) when keys nobody reads are present
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum WalletCmd {
    /// Link a wallet public key to a principal
    Link {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        wallet: String,
    },
    /// Remove a wallet link
    Unlink {
        #[arg(long)]
        wallet: String,
    },
    /// List wallets linked to a principal
    List {
        #[arg(long)]
        principal: String,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Print audit entries for a principal in insertion order
    Show {
        #[arg(long)]
        principal: String,

        /// Read the local JSONL mirror instead of the database
        #[arg(long)]
        jsonl: Option<String>,
    },

    /// Verify the hash chain of a JSONL audit mirror
    VerifyChain { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    commands::init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = hg_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = hg_db::status(&pool).await?;
                    println!("db_ok={} has_granted_table={}", s.ok, s.has_granted_table);
                }
                DbCmd::Migrate => {
                    hg_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
            pool.close().await;
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = hg_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Config { cmd } => match cmd {
            ConfigCmd::Check { paths, strict } => commands::config::check(&paths, strict)?,
        },

        Commands::Wallet { cmd } => {
            let pool = hg_db::connect_from_env().await?;
            let result = match cmd {
                WalletCmd::Link { principal, wallet } => {
                    commands::wallet::link(&pool, &principal, &wallet).await
                }
                WalletCmd::Unlink { wallet } => commands::wallet::unlink(&pool, &wallet).await,
                WalletCmd::List { principal } => commands::wallet::list(&pool, &principal).await,
            };
            pool.close().await;
            result?;
        }

        Commands::Verify {
            principal,
            config_paths,
        } => commands::verify::verify_one(&config_paths, &principal).await?,

        Commands::Resync {
            config_paths,
            concurrency,
        } => commands::verify::resync(&config_paths, concurrency).await?,

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Show { principal, jsonl } => {
                commands::audit::show(&principal, jsonl.as_deref()).await?
            }
            AuditCmd::VerifyChain { path } => commands::audit::verify_chain(&path)?,
        },
    }

    Ok(())
}
