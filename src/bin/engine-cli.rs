use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "engine-cli")]
#[command(about = "Management CLI for the access engine", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "ENGINE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Engine status: ledger, subscription counts, price cache
    Status,
    /// Current exchange rate and cache status
    Price {
        /// Force a refresh before reading
        #[arg(long)]
        refresh: bool,
    },
    /// Effective flash sales for a creator or content item
    Sales {
        #[arg(long, conflicts_with = "content_item")]
        creator: Option<String>,
        #[arg(long)]
        content_item: Option<String>,
    },
    /// One flash sale with its redemption counts
    Sale { id: String },
    /// Deactivate a flash sale
    Deactivate { id: String },
    /// Audit trail of one payment proof
    Audit { proof_ref: String },
    /// Register a creator's payout wallet
    Payee {
        creator: String,
        /// 0x-prefixed payout address
        wallet: String,
        /// Referrer sharing the platform fee
        #[arg(long)]
        referrer: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Price { refresh: true } => client.post(format!("{}/admin/price/refresh", base)),
        Commands::Price { refresh: false } => client.get(format!("{}/price", base)),
        Commands::Sales {
            creator,
            content_item,
        } => {
            let query = match (creator, content_item) {
                (_, Some(item)) => [("content_item_id", item)],
                (Some(creator), None) => [("creator_id", creator)],
                (None, None) => {
                    eprintln!("Error: pass --creator or --content-item");
                    return Ok(());
                }
            };
            client.get(format!("{}/sales", base)).query(&query)
        }
        Commands::Sale { id } => client.get(format!("{}/admin/sales/{}", base, id)),
        Commands::Deactivate { id } => {
            client.post(format!("{}/admin/sales/{}/deactivate", base, id))
        }
        Commands::Audit { proof_ref } => client.get(format!("{}/admin/audit/{}", base, proof_ref)),
        Commands::Payee {
            creator,
            wallet,
            referrer,
        } => client.put(format!("{}/admin/payees", base)).json(&serde_json::json!({
            "creator_id": creator,
            "payout_wallet": wallet,
            "referrer_wallet": referrer,
        })),
    };

    let res = request.headers(headers).send().await?;
    if res.status() == reqwest::StatusCode::NO_CONTENT {
        println!("ok");
        return Ok(());
    }
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: engine returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
