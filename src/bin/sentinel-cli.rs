use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "sentinel-cli")]
#[command(about = "Management CLI for provider-sentinel", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key
    #[arg(short, long, env = "SENTINEL_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service status
    Status,
    /// List providers with full breaker stats
    Providers,
    /// List providers currently admitting traffic
    Healthy,
    /// Force a provider's breaker closed
    Reset {
        /// Provider id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = match cli.command {
        Commands::Status => {
            client.get(format!("{base}/admin/status"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Providers => {
            client.get(format!("{base}/admin/providers"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Healthy => {
            client.get(format!("{base}/v1/providers/healthy"))
                .send()
                .await?
        }
        Commands::Reset { id } => {
            client.post(format!("{base}/admin/providers/{id}/reset"))
                .headers(headers)
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
