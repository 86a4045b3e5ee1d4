//! microfetch CLI - Command-line interface
//!
//! This binary issues a single request through the microfetch library and
//! prints the normalized response.

use clap::{Parser, ValueEnum};
use microfetch::{Coordinator, FetchOptions, FetchPolicy, ReqwestTransport, ResponseBody};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, ValueEnum)]
enum PolicyArg {
    /// Always dispatch; never cache
    NetworkOnly,
    /// Serve from cache when possible, dispatch otherwise
    CacheFirst,
    /// Serve only from cache; never dispatch
    CacheOnly,
    /// Serve from cache and dispatch a refresh
    CacheAndNetwork,
}

impl From<PolicyArg> for FetchPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::NetworkOnly => FetchPolicy::NetworkOnly,
            PolicyArg::CacheFirst => FetchPolicy::CacheFirst,
            PolicyArg::CacheOnly => FetchPolicy::CacheOnly,
            PolicyArg::CacheAndNetwork => FetchPolicy::CacheAndNetwork,
        }
    }
}

#[derive(Parser)]
#[command(name = "microfetch")]
#[command(about = "Issue an HTTP request through the microfetch layer", long_about = None)]
struct Args {
    /// Target URL
    url: String,

    /// HTTP method
    #[arg(long, default_value = "GET")]
    method: String,

    /// Fetch policy (defaults by method: GET is cache-first)
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// JSON request body
    #[arg(long)]
    body: Option<String>,

    /// Request header as name:value (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Extra query pair as name=value (repeatable)
    #[arg(long = "query", value_name = "NAME=VALUE")]
    query: Vec<String>,

    /// Print headers and status alongside the body
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut options = FetchOptions::default().method(&args.method);
    if let Some(policy) = args.policy {
        options = options.policy(policy.into());
    }
    if let Some(body) = &args.body {
        let value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                eprintln!("Error: request body is not valid JSON: {}", e);
                process::exit(1);
            }
        };
        options = options.body_json(value);
    }
    for header in &args.headers {
        match header.split_once(':') {
            Some((name, value)) => {
                options = options.header(name.trim(), value.trim());
            }
            None => {
                eprintln!("Error: header {:?} is not in name:value form", header);
                process::exit(1);
            }
        }
    }
    for pair in &args.query {
        match pair.split_once('=') {
            Some((name, value)) => {
                options = options.query(name, value);
            }
            None => {
                eprintln!("Error: query pair {:?} is not in name=value form", pair);
                process::exit(1);
            }
        }
    }

    let transport = match ReqwestTransport::new() {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error creating HTTP transport: {}", e);
            process::exit(1);
        }
    };
    let coordinator = Coordinator::new(Arc::new(transport));

    match coordinator.fetch(args.url.as_str(), options).await {
        Ok(response) => {
            if args.verbose {
                println!("{} {}", response.status, response.status_text);
                let mut names: Vec<&String> = response.headers.keys().collect();
                names.sort();
                for name in names {
                    println!("{}: {}", name, response.headers[name]);
                }
                println!();
            }
            match &response.body {
                ResponseBody::Json(value) => match serde_json::to_string_pretty(value) {
                    Ok(pretty) => println!("{}", pretty),
                    Err(_) => println!("{}", value),
                },
                ResponseBody::Text(text) => println!("{}", text),
                ResponseBody::None => {}
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
