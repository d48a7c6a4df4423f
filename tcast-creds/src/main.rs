//! tcast-creds - Account and credential management for Threadcast
//!
//! Links platform accounts, switches the selected account, forces token
//! refreshes and drives the Farcaster signer approval flow.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libthreadcast::crypto::TokenCipher;
use libthreadcast::logging::{LogFormat, LoggingConfig};
use libthreadcast::types::{Platform, SignerRequest, SignerState, TokenSet};
use libthreadcast::{ThreadcastError, ThreadcastService};
use secrecy::ExposeSecret;
use std::io::Read;

#[derive(Parser)]
#[command(name = "tcast-creds")]
#[command(version)]
#[command(about = "Manage Threadcast platform accounts and credentials", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// User the accounts belong to
    #[arg(long, global = true, env = "THREADCAST_OWNER", default_value = "default")]
    owner: String,

    /// Log output format (text, json, pretty)
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a new encryption key for THREADCAST_ENCRYPTION_KEY
    Keygen,

    /// List linked accounts (without showing tokens)
    List {
        /// Filter by platform (threads, x, farcaster)
        #[arg(long, value_parser = parse_platform)]
        platform: Option<Platform>,
    },

    /// Link an account from an access token
    Connect {
        /// Platform name (threads, x)
        #[arg(value_parser = parse_platform)]
        platform: Platform,

        /// Read the access token from stdin
        #[arg(long)]
        stdin: bool,

        /// Access token (prefer --stdin; arguments end up in shell history)
        #[arg(long, conflicts_with = "stdin")]
        token: Option<String>,

        /// Refresh token issued with the access token
        #[arg(long, env = "THREADCAST_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,

        /// Seconds until the access token expires
        #[arg(long)]
        expires_in: Option<i64>,

        /// Account id to query when the platform needs one
        #[arg(long, default_value = "me")]
        external_id: String,
    },

    /// Make an account the selected one for its platform
    Select {
        #[arg(value_parser = parse_platform)]
        platform: Platform,

        /// Account id as shown by `list`
        account_id: String,
    },

    /// Disable an account. Its tokens stay encrypted until it is linked again.
    Disconnect {
        #[arg(value_parser = parse_platform)]
        platform: Platform,

        /// Account id as shown by `list`
        account_id: String,
    },

    /// Refresh the selected account's token now
    Refresh {
        #[arg(value_parser = parse_platform)]
        platform: Platform,
    },

    /// Farcaster signer approval
    #[command(subcommand)]
    Signer(SignerCommands),
}

#[derive(Subcommand)]
enum SignerCommands {
    /// Create a signer request and print the approval link
    Start {
        /// The user's Farcaster id
        fid: String,
    },

    /// Check a request with the authority and link the signer once approved
    Poll {
        /// Approval token printed by `start`
        token: String,
    },

    /// Show the stored request for a Farcaster id
    Status { fid: String },
}

fn parse_platform(s: &str) -> std::result::Result<Platform, String> {
    s.parse::<Platform>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, "warn".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        tracing::debug!("{:?}", e);
        eprintln!("Error: {:#}", e);
        let code = match e.downcast_ref::<ThreadcastError>() {
            Some(err) if err.exit_code() != 1 => {
                eprintln!("{}", err.user_message());
                err.exit_code()
            }
            _ => 1,
        };
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Keygen = cli.command {
        let cipher = TokenCipher::generate();
        println!("{}", cipher.export_secret().expose_secret());
        return Ok(());
    }

    let service = ThreadcastService::new().await?;
    let owner = cli.owner.as_str();

    match cli.command {
        Commands::Keygen => Ok(()),
        Commands::List { platform } => list_accounts(&service, owner, platform).await,
        Commands::Connect {
            platform,
            stdin,
            token,
            refresh_token,
            expires_in,
            external_id,
        } => {
            let access_token = read_token(stdin, token)?;
            let mut tokens = TokenSet {
                access_token,
                refresh_token: None,
                expires_in,
            };
            if let Some(refresh) = refresh_token {
                tokens = tokens.with_refresh_token(refresh);
            }
            let account = service
                .connect(owner, platform, &external_id, tokens)
                .await?;
            println!(
                "Connected {} account '{}' ({})",
                platform, account.display_name, account.id
            );
            Ok(())
        }
        Commands::Select {
            platform,
            account_id,
        } => {
            let account = service
                .accounts()
                .select_account(owner, platform, &account_id)
                .await?;
            println!(
                "Selected {} account '{}'",
                platform, account.display_name
            );
            Ok(())
        }
        Commands::Disconnect {
            platform,
            account_id,
        } => {
            service
                .accounts()
                .disconnect(owner, platform, &account_id)
                .await?;
            println!("Disconnected {} account {}", platform, account_id);
            Ok(())
        }
        Commands::Refresh { platform } => {
            let account = service
                .accounts()
                .require_selected_account(owner, platform)
                .await?;
            let valid = service.refresh().force_refresh(&account).await?;
            match valid.account.token_expiry {
                Some(expiry) => println!("Refreshed {} token, valid until {}", platform, expiry),
                None => println!("Refreshed {} token", platform),
            }
            Ok(())
        }
        Commands::Signer(command) => run_signer(&service, owner, command).await,
    }
}

async fn list_accounts(
    service: &ThreadcastService,
    owner: &str,
    platform: Option<Platform>,
) -> Result<()> {
    let accounts = service.accounts().list_accounts(owner, platform).await?;
    if accounts.is_empty() {
        println!("No accounts linked");
        return Ok(());
    }

    let session = service.session(owner).await;
    for account in accounts {
        let selected = session
            .get(account.platform)
            .map(|a| a.id == account.id)
            .unwrap_or(false);
        println!(
            "{} {:<10} {:<24} {:<36} {}",
            if selected { "*" } else { " " },
            account.platform.as_str(),
            account.display_name,
            account.id,
            if account.is_active { "active" } else { "inactive" }
        );
    }
    Ok(())
}

async fn run_signer(service: &ThreadcastService, owner: &str, command: SignerCommands) -> Result<()> {
    let workflow = service.signer()?;
    match command {
        SignerCommands::Start { fid } => {
            let request = workflow.start(owner, &fid).await?;
            if request.state == SignerState::Approved {
                println!("Signer for fid {} is already approved", fid);
                return Ok(());
            }
            println!("Approve the signer at: {}", request.approval_link);
            println!("Then run: tcast-creds signer poll {}", request.approval_token);
        }
        SignerCommands::Poll { token } => {
            let request = workflow.poll(owner, &token).await?;
            print_request(&request);
        }
        SignerCommands::Status { fid } => match workflow.status(owner, &fid).await? {
            Some(request) => print_request(&request),
            None => println!("No signer request for fid {}", fid),
        },
    }
    Ok(())
}

fn print_request(request: &SignerRequest) {
    println!("fid:        {}", request.platform_identity);
    println!("state:      {}", request.state.as_str());
    println!("public key: {}", request.public_key);
    println!("expires at: {}", request.expires_at);
    if let Some(approved_at) = request.approved_at {
        println!("approved:   {}", approved_at);
    }
}

fn read_token(stdin: bool, token: Option<String>) -> Result<secrecy::SecretString> {
    let raw = match (stdin, token) {
        (true, _) => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read access token from stdin")?;
            input
        }
        (false, Some(token)) => token,
        (false, None) => {
            return Err(ThreadcastError::InvalidInput(
                "Provide the access token with --stdin or --token".to_string(),
            )
            .into())
        }
    };
    Ok(ThreadcastService::token_from_input(&raw)?)
}
