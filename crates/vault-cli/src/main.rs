// ============================================================================
// vault-profile — CLI inspection tool for the Vault profile engine
// ============================================================================
// Usage:
//   vault-profile replay --file responses.json       Replay captured profile
//                                                    responses and print the
//                                                    reconciled state
//   vault-profile interval --time <rfc3339> --hours N
//                                                    Show the calendar-aligned
//                                                    refresh interval
//   vault-profile offers --catalog catalog.json      List visible offers of a
//                                                    storefront
// ============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use vault_core::catalog::{visible_offers, OfferFilterContext};
use vault_core::error::QueryResult;
use vault_core::instance::InstanceRegistry;
use vault_core::item::{Item, ItemStore};
use vault_core::profile::Profile;
use vault_core::protocol::{CatalogDownload, ProfileResponse};
use vault_core::time_interval::refresh_interval;

/// Vault profile engine inspection tool
#[derive(Parser)]
#[command(
    name = "vault-profile",
    version,
    about = "Replay and inspect Vault profile engine data"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a captured sequence of profile responses through the
    /// reconciliation engine
    Replay {
        /// JSON file holding an array of profile responses
        #[arg(long)]
        file: String,

        /// Profile id to attribute the responses to
        #[arg(long, default_value = "main")]
        profile_id: String,
    },

    /// Show the calendar-aligned refresh interval containing a moment
    Interval {
        /// Reference time (RFC 3339), defaults to now
        #[arg(long)]
        time: Option<String>,

        /// Interval length in hours
        #[arg(long, default_value = "1")]
        hours: i64,
    },

    /// List the offers of a storefront a profile is allowed to see
    Offers {
        /// JSON file holding a catalog download
        #[arg(long)]
        catalog: String,

        /// Optional JSON profile snapshot ({"stats":{"attributes":{}},"items":{}})
        #[arg(long)]
        profile: Option<String>,

        #[arg(long, default_value = "Featured")]
        storefront: String,

        /// Real-money currency of the session
        #[arg(long, default_value = "USD")]
        currency: String,

        /// Two-letter country of the session
        #[arg(long, default_value = "US")]
        country: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Replay { file, profile_id } => cmd_replay(&file, &profile_id),
        Commands::Interval { time, hours } => cmd_interval(time.as_deref(), hours),
        Commands::Offers {
            catalog,
            profile,
            storefront,
            currency,
            country,
        } => cmd_offers(&catalog, profile.as_deref(), &storefront, &currency, &country),
    }
}

fn cmd_replay(file: &str, profile_id: &str) -> Result<()> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file))?;
    let responses: Vec<ProfileResponse> =
        serde_json::from_str(&raw).context("parsing response array")?;

    let mut profile = Profile::new(profile_id, "replay", InstanceRegistry::new().into_shared());
    let mut desyncs = 0;
    for (index, response) in responses.iter().enumerate() {
        let mut result = QueryResult::ok(200);
        let outcome = profile.apply_server_payload(response, &mut result);
        if outcome.requery_needed {
            desyncs += 1;
            println!(
                "response {}: profile desynced, a live client would re-query here",
                index
            );
        }
        outcome.dispatch();
        if let Some(primary) = &result.primary_notification {
            println!("response {}: primary notification {}", index, primary.type_str);
        }
    }

    println!();
    println!("{}", profile.debug_string());
    println!("final revision: {}", profile.revision());
    println!("responses: {}, desyncs: {}", responses.len(), desyncs);
    Ok(())
}

fn cmd_interval(time: Option<&str>, hours: i64) -> Result<()> {
    let center: DateTime<Utc> = match time {
        Some(raw) => raw.parse().with_context(|| format!("parsing '{}'", raw))?,
        None => Utc::now(),
    };
    let (start, end) = refresh_interval(center, hours);
    println!("center:   {}", center.to_rfc3339());
    println!("interval: [{}, {})", start.to_rfc3339(), end.to_rfc3339());
    Ok(())
}

fn cmd_offers(
    catalog_file: &str,
    profile_file: Option<&str>,
    storefront_name: &str,
    currency: &str,
    country: &str,
) -> Result<()> {
    let raw =
        std::fs::read_to_string(catalog_file).with_context(|| format!("reading {}", catalog_file))?;
    let catalog: CatalogDownload = serde_json::from_str(&raw).context("parsing catalog")?;

    let mut items = ItemStore::new();
    let mut stats = serde_json::Map::new();
    if let Some(file) = profile_file {
        let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file))?;
        let snapshot: serde_json::Value = serde_json::from_str(&raw).context("parsing profile")?;
        if let Some(attrs) = snapshot
            .pointer("/stats/attributes")
            .and_then(|v| v.as_object())
        {
            stats = attrs.clone();
        }
        if let Some(defs) = snapshot.get("items").and_then(|v| v.as_object()) {
            for (id, def) in defs {
                if let Some(item) = Item::from_json(id, def, 0) {
                    items.insert(item);
                }
            }
        }
    }

    let storefront = catalog
        .storefronts
        .iter()
        .find(|sf| sf.name == storefront_name)
        .with_context(|| format!("storefront '{}' not in catalog", storefront_name))?;

    let ctx = OfferFilterContext {
        items: &items,
        stats: &stats,
        currency_code: currency,
        country,
    };
    let offers = visible_offers(storefront, &ctx);

    if offers.is_empty() {
        println!("No visible offers in '{}'.", storefront_name);
        return Ok(());
    }

    println!("{:<28}  {:<14}  {:>6}  {}", "OFFER ID", "TYPE", "PRICE", "TITLE");
    println!("{}", "-".repeat(70));
    for offer in &offers {
        let price = offer
            .prices
            .first()
            .map(|p| p.final_price.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28}  {:<14}  {:>6}  {}",
            offer.offer_id,
            format!("{:?}", offer.offer_type),
            price,
            offer.title
        );
    }
    println!("\nTotal: {} offers", offers.len());
    Ok(())
}
