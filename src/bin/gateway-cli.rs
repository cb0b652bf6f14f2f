use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Admin CLI for the agent gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "GATEWAY_URL", default_value = "http://localhost:8000")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every circuit breaker
    Breakers,
    /// Show one circuit breaker
    Breaker { service: String },
    /// Force a circuit breaker back to closed
    Reset { service: String },
    /// Show rate-limit usage for an identity
    Usage { category: String, identity: String },
    /// Clear the rate-limit window for an identity
    ResetLimit { category: String, identity: String },
    /// Override the rate limit for an identity
    SetLimit {
        category: String,
        identity: String,
        limit: u64,
        #[arg(long, default_value_t = 3600)]
        duration_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder().no_proxy().build()?;

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let (method, path, body) = match cli.command {
        Commands::Breakers => (Method::GET, "/admin/circuit-breakers".to_string(), None),
        Commands::Breaker { service } => (Method::GET, format!("/admin/circuit-breakers/{}", service), None),
        Commands::Reset { service } => (
            Method::POST,
            format!("/admin/circuit-breakers/{}/reset", service),
            None,
        ),
        Commands::Usage { category, identity } => (
            Method::GET,
            format!("/admin/rate-limits/{}/{}", category, identity),
            None,
        ),
        Commands::ResetLimit { category, identity } => (
            Method::DELETE,
            format!("/admin/rate-limits/{}/{}", category, identity),
            None,
        ),
        Commands::SetLimit {
            category,
            identity,
            limit,
            duration_secs,
        } => (
            Method::PUT,
            format!("/admin/rate-limits/{}/{}/custom", category, identity),
            Some(json!({ "limit": limit, "duration_secs": duration_secs })),
        ),
    };

    let mut request = client.request(method, format!("{}{}", base, path)).headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
