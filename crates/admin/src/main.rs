//! Carebase operator CLI.
//!
//! Provisions tenants and the field encryption key against a Carebase
//! SQLite database. Every command runs as a privileged principal with no
//! tenant attached.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use carebase_core::backends::sqlite::{SCHEMA_VERSION, SqliteBackend};
use carebase_core::config_store::{ConfigurationStore, ENCRYPTION_KEY};
use carebase_core::crypto::{FieldKey, validate_strength};
use carebase_core::types::{NewPrincipal, Tenant};
use carebase_core::{CareCore, CoreConfig, Principal, TenantId};

/// Principal id recorded in the audit log for CLI operations.
const OPERATOR_ID: &str = "carebase-admin";

#[derive(Debug, Parser)]
#[command(name = "carebase-admin")]
#[command(about = "Provision Carebase tenants and encryption keys", version)]
struct Cli {
    /// Path to the SQLite database.
    #[arg(long, env = "CAREBASE_DATABASE", default_value = "carebase.db")]
    database: PathBuf,

    /// Optional JSON file with core configuration.
    #[arg(long, env = "CAREBASE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "CAREBASE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or migrate the database schema.
    InitSchema,

    /// Create a tenant.
    CreateTenant {
        /// Unique tenant code.
        code: String,
    },

    /// Deactivate a tenant. Its data is kept but no request can use it.
    DeactivateTenant {
        /// Tenant id.
        id: String,
    },

    /// List every tenant.
    ListTenants,

    /// Create a principal inside a tenant.
    CreatePrincipal {
        /// Tenant id the principal belongs to.
        #[arg(long)]
        tenant: String,

        /// Display name.
        name: String,
    },

    /// Generate and store a new field encryption key.
    GenerateKey {
        /// Replace an existing key. Data sealed under the old key becomes
        /// unreadable.
        #[arg(long)]
        force: bool,
    },

    /// Check a password against the configured policy.
    CheckPassword {
        password: String,
    },
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("carebase_admin={level},carebase_core={level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CoreConfig> {
    let Some(path) = path else {
        return Ok(CoreConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))
}

fn open_backend(database: &Path, config: &CoreConfig) -> anyhow::Result<SqliteBackend> {
    info!(database = %database.display(), "Opening SQLite database");
    let backend = SqliteBackend::with_config(database, config.sqlite.clone())?;
    backend.init_schema()?;
    Ok(backend)
}

fn print_tenant(tenant: &Tenant) {
    let status = if tenant.active { "active" } else { "inactive" };
    println!(
        "{}\t{}\t{}\t{}",
        tenant.id,
        tenant.code,
        status,
        tenant.created_at.to_rfc3339()
    );
}

fn check_password(password: &str, config: &CoreConfig) -> anyhow::Result<()> {
    let violations = validate_strength(password, &config.password_policy);
    if violations.is_empty() {
        println!("ok");
        return Ok(());
    }
    for violation in &violations {
        println!("- {violation}");
    }
    bail!("password rejected by policy ({} violations)", violations.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli {
        database,
        config,
        log_level,
        command,
    } = Cli::parse();
    init_logging(&log_level);
    let config = load_config(config.as_deref())?;

    let command = match command {
        Command::CheckPassword { password } => return check_password(&password, &config),
        command => command,
    };

    let backend = open_backend(&database, &config)?;
    let store: Arc<dyn ConfigurationStore> = Arc::new(backend.clone());
    let core = CareCore::new(backend.clone(), store.clone(), config);
    let operator = Principal::privileged(OPERATOR_ID, None);

    match command {
        Command::InitSchema => {
            println!("schema at version {SCHEMA_VERSION}");
        }
        Command::CreateTenant { code } => {
            let tenant = core
                .with_tenant_context(Some(&operator), |scope| async move {
                    scope.create_tenant(&code)
                })
                .await?;
            print_tenant(&tenant);
        }
        Command::DeactivateTenant { id } => {
            let id = TenantId::new(id);
            let tenant = core
                .with_tenant_context(Some(&operator), |scope| async move {
                    scope.deactivate_tenant(&id)
                })
                .await?;
            print_tenant(&tenant);
        }
        Command::ListTenants => {
            let tenants = core
                .with_tenant_context(Some(&operator), |scope| async move { scope.list_tenants() })
                .await?;
            for tenant in &tenants {
                print_tenant(tenant);
            }
        }
        Command::CreatePrincipal { tenant, name } => {
            let new = NewPrincipal {
                tenant_id: Some(TenantId::new(tenant)),
                ..NewPrincipal::member(name)
            };
            let principal = core
                .with_tenant_context(Some(&operator), |scope| async move {
                    scope.create_principal(&new)
                })
                .await?;
            println!("{}\t{}", principal.id, principal.display_name);
        }
        Command::GenerateKey { force } => {
            if let Some(existing) = store.get(ENCRYPTION_KEY).await? {
                if !force {
                    bail!(
                        "an encryption key already exists (fingerprint {}); pass --force to replace it",
                        FieldKey::from_base64(&existing)?.fingerprint_hex()
                    );
                }
                warn!("replacing existing encryption key");
            }
            let encoded = FieldKey::generate_base64();
            let fingerprint = FieldKey::from_base64(&encoded)?.fingerprint_hex();
            store.put(ENCRYPTION_KEY, encoded).await?;
            info!(fingerprint = %fingerprint, "stored new encryption key");
            println!("{fingerprint}");
        }
        Command::CheckPassword { .. } => {}
    }

    Ok(())
}
