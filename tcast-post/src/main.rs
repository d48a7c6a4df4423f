//! tcast-post - Publish thread chains to Threads, X and Farcaster

use clap::Parser;
use libthreadcast::logging::{LogFormat, LoggingConfig};
use libthreadcast::service::posting::ChainReport;
use libthreadcast::types::Platform;
use libthreadcast::{Result, Segment, ThreadChain, ThreadcastError, ThreadcastService};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;

/// Line that separates two segments of a chain
const SEGMENT_SEPARATOR: &str = "---";

#[derive(Parser, Debug)]
#[command(name = "tcast-post")]
#[command(version)]
#[command(about = "Publish thread chains to Threads, X and Farcaster", long_about = None)]
struct Cli {
    /// Content to post (reads from stdin if not provided). Lines containing
    /// only `---` split the content into a chain of replies.
    content: Option<String>,

    /// Publish a saved chain file instead of inline content
    #[arg(long, conflicts_with = "content")]
    chain: Option<PathBuf>,

    /// Target platform(s), comma-separated. Defaults to the chain's active platforms.
    #[arg(short, long, value_delimiter = ',', value_parser = parse_platform)]
    platform: Vec<Platform>,

    /// Print the segments that would be published and exit
    #[arg(long)]
    dry_run: bool,

    /// User whose selected accounts are used
    #[arg(long, env = "THREADCAST_OWNER", default_value = "default")]
    owner: String,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Log output format (text, json, pretty)
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_platform(s: &str) -> std::result::Result<Platform, String> {
    s.parse::<Platform>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, "error".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        tracing::debug!("{:?}", e);
        eprintln!("Error: {}", e);
        if e.exit_code() != 1 {
            eprintln!("{}", e.user_message());
        }
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut chain = match &cli.chain {
        Some(path) => ThreadChain::load(path)?,
        None => {
            let content = read_content(cli.content.clone())?;
            let mut chain = ThreadChain::new();
            chain.set_segments(split_segments(&content));
            chain
        }
    };

    if !cli.platform.is_empty() {
        for platform in Platform::ALL {
            chain.set_platform_active(platform, cli.platform.contains(&platform));
        }
    }

    let platforms = chain.active_platforms();
    if platforms.is_empty() {
        return Err(ThreadcastError::InvalidInput(
            "No target platform is active".to_string(),
        ));
    }
    if platforms
        .iter()
        .all(|p| chain.platform_segments(*p).iter().all(Segment::is_empty))
    {
        return Err(ThreadcastError::InvalidInput(
            "Content cannot be empty".to_string(),
        ));
    }

    if cli.dry_run {
        print_dry_run(&chain, &platforms, cli.format);
        return Ok(());
    }

    let service = ThreadcastService::new().await?;
    let mut session = service.session(&cli.owner).await;
    let results = service
        .posting()
        .publish_thread_chain(&mut session, &chain)
        .await;

    let mut first_error: Option<ThreadcastError> = None;
    let mut rows = Vec::new();
    for (platform, result) in platforms.into_iter().zip(results) {
        match result {
            Ok(mut report) => {
                rows.push(report_row(&report, cli.format));
                if let Some(failure) = report.failure.take() {
                    first_error.get_or_insert(failure);
                }
            }
            Err(e) => {
                rows.push(match cli.format {
                    OutputFormat::Text => format!("{}: failed: {}", platform, e),
                    OutputFormat::Json => serde_json::json!({
                        "platform": platform,
                        "success": false,
                        "error": e.to_string(),
                    })
                    .to_string(),
                });
                first_error.get_or_insert(e);
            }
        }
    }

    for row in rows {
        println!("{}", row);
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Content from the argument, or stdin when it is piped
fn read_content(content: Option<String>) -> Result<String> {
    if let Some(content) = content {
        return Ok(content);
    }

    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(ThreadcastError::InvalidInput(
            "No content provided. Pass it as an argument or pipe it to stdin".to_string(),
        ));
    }
    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(buffer)
}

/// Split on separator lines. Each segment is trimmed; the result always has
/// at least one segment.
fn split_segments(content: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line.trim() == SEGMENT_SEPARATOR {
            segments.push(Segment::text(current.join("\n").trim()));
            current.clear();
        } else {
            current.push(line);
        }
    }
    segments.push(Segment::text(current.join("\n").trim()));
    segments
}

fn print_dry_run(chain: &ThreadChain, platforms: &[Platform], format: OutputFormat) {
    for platform in platforms {
        let segments: Vec<&Segment> = chain
            .platform_segments(*platform)
            .iter()
            .filter(|s| !s.is_empty())
            .collect();
        match format {
            OutputFormat::Text => {
                for (index, segment) in segments.iter().enumerate() {
                    println!(
                        "{} [{}/{}] {}",
                        platform,
                        index + 1,
                        segments.len(),
                        segment.content
                    );
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "platform": platform,
                        "segments": segments,
                    })
                );
            }
        }
    }
}

fn report_row(report: &ChainReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => match (report.root_id(), &report.failure) {
            (Some(root), None) => format!(
                "{}: {} ({} posts)",
                report.platform,
                root,
                report.published.len()
            ),
            (_, Some(failure)) => format!(
                "{}: failed after {}/{} posts: {}",
                report.platform,
                report.published.len(),
                report.total,
                failure
            ),
            (None, None) => format!("{}: nothing published", report.platform),
        },
        OutputFormat::Json => serde_json::json!({
            "platform": report.platform,
            "success": report.is_complete(),
            "post_ids": report.published.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            "total": report.total,
            "error": report.failure.as_ref().map(|e| e.to_string()),
        })
        .to_string(),
    }
}
