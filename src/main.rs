use anyhow::Result;
use axum::http::Method;
use clap::{Parser, Subcommand};
use medbuilder::security::{AuthManager, Classification, PathClassifier, PolicyTable};
use medbuilder::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "medbuilder")]
#[command(about = "MedBuilder API gateway - rate limiting and request classification")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Print the effective rate limit policies
    Policies,
    /// Show which policy a request would be charged against
    Classify {
        /// HTTP method, e.g. POST
        method: String,
        /// Request path, e.g. /api/chat/session
        path: String,
    },
    /// Mint a bearer token for local testing
    Token {
        /// User id placed in the `sub` claim
        #[arg(long)]
        sub: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Print a configuration diagnostic report
    CheckConfig,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.operational.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    if config.operational.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => medbuilder::server::run(config).await,
        Commands::Policies => print_policies(&config),
        Commands::Classify { method, path } => classify(&config, &method, &path),
        Commands::Token { sub, role, ttl_secs } => {
            let mut auth = config.security.auth.clone();
            auth.enabled = true;
            let token = AuthManager::new(auth)?.create_token(&sub, role.as_deref(), ttl_secs)?;
            println!("{token}");
            Ok(())
        }
        Commands::CheckConfig => {
            print!("{}", config.create_diagnostic_report());
            config.validate()
        }
    }
}

fn print_policies(config: &Config) -> Result<()> {
    let mut table = PolicyTable::default();
    table.apply_overrides(&config.security.rate_limiting.overrides)?;

    println!(
        "{:<14} {:>8} {:>6}  {:<5}  MESSAGE",
        "CATEGORY", "WINDOW", "MAX", "DEV"
    );
    for policy in table.iter() {
        println!(
            "{:<14} {:>7}s {:>6}  {:<5}  {}",
            policy.category.as_str(),
            policy.window.as_secs(),
            policy.max,
            if policy.skip_in_development { "skip" } else { "limit" },
            policy.message
        );
    }
    Ok(())
}

fn classify(config: &Config, method: &str, path: &str) -> Result<()> {
    let method: Method = method
        .to_uppercase()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HTTP method {}: {}", method, e))?;

    let rate_limiting = &config.security.rate_limiting;
    let classifier = PathClassifier::new(
        rate_limiting.exempt_paths.clone(),
        rate_limiting.exempt_prefixes.clone(),
    );

    let mut policies = PolicyTable::default();
    policies.apply_overrides(&rate_limiting.overrides)?;

    match classifier.classify(&method, path) {
        Classification::Exempt => println!("{method} {path} -> exempt"),
        Classification::Limited(category) => {
            let layers: Vec<&str> = policies
                .layers(&method, category)
                .map(|layer| layer.as_str())
                .collect();
            println!("{method} {path} -> {}", layers.join(" + "));
        }
    }
    Ok(())
}
