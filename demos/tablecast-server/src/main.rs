use tablecast::prelude::*;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

struct Settings {
    bind: String,
    path: String,
    redis_url: Option<String>,
    tokens_file: Option<String>,
}

impl Settings {
    fn from_env() -> Self {
        Self {
            bind: std::env::var("TABLECAST_BIND").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            path: std::env::var("TABLECAST_PATH").unwrap_or_else(|_| "/ws".into()),
            redis_url: std::env::var("TABLECAST_REDIS_URL").ok(),
            tokens_file: std::env::var("TABLECAST_TOKENS").ok(),
        }
    }
}

/// Development tokens used when no token file is configured.
fn dev_tokens() -> StaticVerifier {
    StaticVerifier::new()
        .with_token(
            "dev-staff",
            Identity::new("staff-dev", ScopeKind::Staff, vec!["1".into(), "2".into()]),
        )
        .with_token(
            "dev-guest",
            Identity::new("guest-dev", ScopeKind::Customer, vec!["1".into(), "12".into()]),
        )
}

fn load_verifier(tokens_file: Option<&str>) -> Result<StaticVerifier, Box<dyn std::error::Error>> {
    match tokens_file {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            let verifier = StaticVerifier::from_json(&json)?;
            info!(path, tokens = verifier.len(), "loaded token table");
            Ok(verifier)
        }
        None => {
            warn!("TABLECAST_TOKENS not set, accepting development tokens only");
            Ok(dev_tokens())
        }
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

async fn serve<B: Broker>(
    settings: &Settings,
    broker: B,
    verifier: StaticVerifier,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = TablecastServerBuilder::new()
        .bind(&settings.bind)
        .path(&settings.path)
        .build(broker, verifier)
        .await?;

    let addr = server.local_addr()?;
    info!(
        %addr,
        path = settings.path.as_str(),
        "tablecast listening"
    );
    server.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablecast=info,tablecast_server=info".into()),
        )
        .init();

    let settings = Settings::from_env();
    let verifier = load_verifier(settings.tokens_file.as_deref())?;

    match settings.redis_url.as_deref() {
        Some(url) => {
            let broker = RedisBroker::connect(RedisConfig::new(url)).await?;
            serve(&settings, broker, verifier).await?;
        }
        None => {
            warn!("TABLECAST_REDIS_URL not set, using in-process broker (single instance)");
            serve(&settings, MemoryBroker::new(), verifier).await?;
        }
    }
    Ok(())
}
