//! Issue Token
//!
//! Mints a bearer token for local testing against the distribution API.
//!
//! Usage:
//!   issue_token --sub am-1 --role asset_manager
//!
//! Environment:
//!   JWT_SECRET - signing secret (must match the running service)

use anyhow::{anyhow, Result};
use clap::Parser;

use spv_distributions::auth::{JwtHandler, Principal, Role};
use spv_distributions::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "issue_token")]
#[command(about = "Mint a development bearer token")]
struct Args {
    /// Subject id (investor, asset manager, compliance officer or admin)
    #[arg(long)]
    sub: String,

    /// investor | asset_manager | compliance | admin
    #[arg(long)]
    role: String,

    /// Signing secret; falls back to the service config
    #[arg(long, env = "JWT_SECRET")]
    secret: Option<String>,

    /// Token lifetime in hours
    #[arg(long)]
    hours: Option<i64>,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let role = Role::from_str(&args.role).ok_or_else(|| anyhow!("unknown role {}", args.role))?;
    let config = AppConfig::from_env()?;
    let secret = args.secret.unwrap_or(config.auth.jwt_secret);
    let hours = args.hours.unwrap_or(config.auth.token_ttl_hours);

    let handler = JwtHandler::new(secret).with_expiration_hours(hours);
    let (token, expires_in) = handler.generate_token(&Principal::new(args.sub, role))?;

    eprintln!("expires in {}s", expires_in);
    println!("{}", token);
    Ok(())
}
