//! Storefront CLI - operator tools
//!
//! Usage:
//!   storefront hash-password <password>
//!   storefront inspect-token <token> [--reveal]
//!   storefront seal <field> <value>
//!   storefront unseal <field> <sealed>
//!   storefront sign-webhook <body-file>
//!   storefront sign-query key=value...
//!
//! Secrets come from the same configuration the server reads.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use storefront_api::auth::signature::{compute_query_signature, compute_webhook_signature};
use storefront_api::auth::{
    hash_password_with_config, validate_password_strength, FieldSealer, PasswordConfig,
    SealParams, TokenCodec,
};
use storefront_core::AppConfig;

#[derive(Parser)]
#[command(name = "storefront")]
#[command(about = "Storefront operator tools")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true, env = "STOREFRONT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash a password with the configured Argon2id parameters
    HashPassword {
        password: String,
        /// Skip the strength check
        #[arg(long)]
        allow_weak: bool,
    },
    /// Verify a session token and print its claims
    InspectToken {
        token: String,
        /// Also print the unsealed values
        #[arg(long)]
        reveal: bool,
    },
    /// Seal a claim value
    Seal { field: String, value: String },
    /// Unseal a claim value
    Unseal { field: String, sealed: String },
    /// Compute the webhook signature header for a body file
    SignWebhook { body: PathBuf },
    /// Compute the `hmac` parameter for a launch query
    SignQuery {
        /// Query parameters as key=value
        #[arg(required = true)]
        params: Vec<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn parse_params(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => Ok((key.to_string(), value.to_string())),
            None => bail!("expected key=value, got {pair:?}"),
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::HashPassword {
            password,
            allow_weak,
        } => {
            if !allow_weak {
                if let Err(reason) = validate_password_strength(&password) {
                    bail!("weak password: {reason}");
                }
            }
            let hash = hash_password_with_config(&password, &PasswordConfig::from(&config.auth))?;
            println!("{hash}");
        }
        Commands::InspectToken { token, reveal } => {
            let codec = TokenCodec::from_config(&config.auth);
            let claims = codec.verify(&token)?;
            println!("{}", serde_json::to_string_pretty(&claims)?);

            if reveal {
                let unsealed = codec.unseal(claims);
                for failure in &unsealed.failures {
                    tracing::warn!(%failure, "Could not unseal field");
                }
                println!("{}", serde_json::to_string_pretty(&unsealed.secrets)?);
            }
        }
        Commands::Seal { field, value } => {
            println!("{}", sealer(&config).seal(&field, &value)?);
        }
        Commands::Unseal { field, sealed } => {
            println!("{}", sealer(&config).unseal(&field, &sealed)?);
        }
        Commands::SignWebhook { body } => {
            let bytes =
                std::fs::read(&body).with_context(|| format!("reading {}", body.display()))?;
            let signature = compute_webhook_signature(&bytes, &config.shopify.api_secret)?;
            println!("{}: {signature}", config.shopify.webhook_header);
        }
        Commands::SignQuery { params } => {
            let params = parse_params(&params)?;
            println!(
                "{}",
                compute_query_signature(&params, &config.shopify.api_secret)?
            );
        }
    }

    Ok(())
}

fn sealer(config: &AppConfig) -> FieldSealer {
    FieldSealer::new(
        &config.auth.sealing_password,
        SealParams {
            salt_len: config.auth.seal_salt_len,
            ..Default::default()
        },
    )
}
