use clap::{Parser, Subcommand};
use serde::Serialize;

use deep_research_client::history::ResearchRecord;
use deep_research_client::init::{AppState, app_init};

#[derive(Debug, Parser)]
#[command(name = "deep-research", version, about = "Deep research client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Top-level command tree.
#[derive(Clone, Debug, Subcommand)]
enum Commands {
    /// Run a research task and stream its progress.
    Research { query: String },
    /// List local history, newest first.
    History {
        #[arg(long)]
        search: Option<String>,
    },
    /// Show local history grouped by recency.
    Groups,
    /// Print one record as JSON.
    Show { id: String },
    /// Pin or unpin a record.
    Pin { id: String },
    /// Delete a record.
    Delete { id: String },
    /// Delete every local record.
    Clear,
    /// Check that the research API is up.
    Health,
    /// Backend pipeline status.
    Status,
    /// History kept by the backend.
    RemoteHistory,
    /// Clear the history kept by the backend.
    ClearRemote,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_record(record: &ResearchRecord) {
    let pin = if record.pinned { "📌 " } else { "" };
    println!(
        "{}  {}  {:<11}  {}{}",
        record.id,
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.status,
        pin,
        record.query
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let (_config, AppState { client, mut history }) = app_init()?;

    match cli.command {
        Commands::Research { query } => {
            log::info!("🔎 Researching: {}", query);
            let record = client
                .run_tracked(&mut history, &query, |event| match &event.message {
                    Some(message) => println!("[{}] {}", event.kind, message),
                    None => println!("[{}]", event.kind),
                })
                .await?;
            match (&record.result, &record.error) {
                (Some(result), _) => println!("\n{}", result.report),
                (None, Some(error)) => println!("\n❌ {}", error),
                (None, None) => {}
            }
            log::info!("✅ Saved as {} ({})", record.id, record.status);
        }
        Commands::History { search } => {
            for record in history.search(search.as_deref().unwrap_or("")) {
                print_record(record);
            }
        }
        Commands::Groups => {
            let groups = history.group_by_recency();
            for (name, records) in groups.sections() {
                if records.is_empty() {
                    continue;
                }
                println!("{}:", name);
                for record in records {
                    print_record(record);
                }
            }
        }
        Commands::Show { id } => match history.load(&id) {
            Some(record) => print_json(record)?,
            None => return Err(format!("no research with id {}", id).into()),
        },
        Commands::Pin { id } => match history.toggle_pin(&id) {
            Some(pinned) => println!("{} {}", if pinned { "pinned" } else { "unpinned" }, id),
            None => return Err(format!("no research with id {}", id).into()),
        },
        Commands::Delete { id } => {
            if !history.delete_record(&id) {
                return Err(format!("no research with id {}", id).into());
            }
            println!("deleted {}", id);
        }
        Commands::Clear => {
            history.clear();
            println!("history cleared");
        }
        Commands::Health => print_json(&client.health_check().await?)?,
        Commands::Status => print_json(&client.research_status().await?)?,
        Commands::RemoteHistory => print_json(&client.remote_history().await?)?,
        Commands::ClearRemote => print_json(&client.clear_remote_history().await?)?,
    }

    Ok(())
}
