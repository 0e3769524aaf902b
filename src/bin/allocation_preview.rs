//! Allocation Preview
//!
//! Runs the allocation calculator over an input file without touching the ledger.
//!
//! Usage:
//!   allocation_preview input.json
//!   allocation_preview input.json --json
//!
//! Input is the camelCase allocation input: grossProceeds, totalDeductions,
//! totalPlatformFees, tdsRateBps and snapshot {totalShares, holdings[{investorId, shares}]}.
//! Amounts are integer minor units.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use spv_distributions::distribution::{allocate, AllocationInput};

#[derive(Parser, Debug)]
#[command(name = "allocation_preview")]
#[command(about = "Preview a pro-rata proceeds allocation")]
struct Args {
    /// Allocation input JSON file
    input: PathBuf,

    /// Print the full allocation as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;
    let input: AllocationInput = serde_json::from_str(&raw).context("parse allocation input")?;
    let allocation = allocate(&input).context("allocation rejected")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&allocation)?);
        return Ok(());
    }

    println!(
        "{:<24} {:>12} {:>9} {:>16} {:>14} {:>16}",
        "INVESTOR", "SHARES", "OWN %", "GROSS", "TDS", "NET"
    );
    println!("{}", "-".repeat(96));
    for line in &allocation.investors {
        println!(
            "{:<24} {:>12} {:>8.4}% {:>16} {:>14} {:>16}",
            line.investor_id,
            line.number_of_shares,
            line.ownership_percentage,
            line.gross_amount.to_string(),
            line.tds_amount.to_string(),
            line.net_amount.to_string()
        );
    }
    println!("{}", "-".repeat(96));
    println!("Net distributable: {}", allocation.net_distributable_amount);
    println!("Total TDS:         {}", allocation.total_tds);
    println!("Total net payout:  {}", allocation.total_net());
    println!(
        "Remainder:         {} gross / {} tds → {}",
        allocation.gross_remainder, allocation.tds_remainder, allocation.remainder_investor
    );

    Ok(())
}
