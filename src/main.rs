//! Relay RPC — JSON-RPC 2.0 dispatch engine demo.
//!
//! Serves a small calculator over newline-delimited JSON-RPC on
//! stdin/stdout. Each input line is one message or batch; each reply is
//! written as one line. Logs go to stderr.
//!
//! Usage:
//!   relay-rpc                          # Concurrent batches, limit 100
//!   relay-rpc --sequential             # Run batch elements one at a time
//!   relay-rpc --max-batch-size 0       # No batch limit
//!   echo '{"jsonrpc":"2.0","method":"add","params":[1,2],"id":1}' | relay-rpc

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use relay_protocol::{HandlerError, RpcError};
use relay_server::{
    BatchMode, DispatchConfig, Dispatcher, HandlerDescriptor, LoggingMiddleware, Service,
    ServiceMethods, Signature, TimingMiddleware,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-rpc", about = "Relay RPC — JSON-RPC 2.0 over stdio")]
struct Cli {
    /// Run batch elements one at a time, in order
    #[arg(long)]
    sequential: bool,

    /// Largest batch accepted (0 for unbounded)
    #[arg(long, default_value = "100")]
    max_batch_size: usize,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

/// Application error code for a zero divisor.
const DIVISION_BY_ZERO: i64 = -32001;

/// Arithmetic beyond the top-level methods, served as `math.*`.
struct MathService;

impl MathService {
    fn divide(&self, a: f64, b: f64) -> Result<f64, HandlerError> {
        if b == 0.0 {
            return Err(RpcError::new(DIVISION_BY_ZERO, "Division by zero").into());
        }
        Ok(a / b)
    }

    fn power(&self, base: f64, exponent: f64) -> Result<f64, HandlerError> {
        Ok(base.powf(exponent))
    }
}

impl Service for MathService {
    fn methods(self: Arc<Self>) -> ServiceMethods {
        let divide = self.clone();
        let power = self;
        ServiceMethods::new()
            .method(
                "divide",
                HandlerDescriptor::sync_fn(&["a", "b"], move |(a, b): (f64, f64)| {
                    divide.divide(a, b)
                })
                .describe("Divide a by b"),
            )
            .method(
                "power",
                HandlerDescriptor::sync_fn(&["base", "exponent"], move |(base, exponent): (f64, f64)| {
                    power.power(base, exponent)
                })
                .describe("Raise base to exponent"),
            )
    }
}

fn build_dispatcher(cli: &Cli) -> anyhow::Result<Dispatcher> {
    let config = DispatchConfig {
        batch_mode: if cli.sequential {
            BatchMode::Sequential
        } else {
            BatchMode::Concurrent
        },
        max_batch_size: (cli.max_batch_size > 0).then_some(cli.max_batch_size),
    };
    let mut dispatcher = Dispatcher::with_config(config);

    dispatcher.register(
        "add",
        HandlerDescriptor::sync_fn(&["a", "b"], |(a, b): (i64, i64)| {
            a.checked_add(b)
                .ok_or_else(|| HandlerError::fault(anyhow::anyhow!("integer overflow")))
        })
        .describe("Add two integers"),
    )?;
    dispatcher.register(
        "multiply",
        HandlerDescriptor::sync_fn(&["a", "b"], |(a, b): (i64, i64)| {
            a.checked_mul(b)
                .ok_or_else(|| HandlerError::fault(anyhow::anyhow!("integer overflow")))
        })
        .describe("Multiply two integers"),
    )?;
    dispatcher.register(
        "greet",
        HandlerDescriptor::async_args(Signature::new(&["name"]).optional("greeting"), |args| async move {
            let name: String = args.parse(0)?;
            let greeting: Option<String> = args.parse(1)?;
            tokio::time::sleep(Duration::from_millis(10)).await;
            let text = format!("{}, {name}!", greeting.as_deref().unwrap_or("Hello"));
            Ok::<Value, HandlerError>(Value::String(text))
        })
        .describe("Greet someone, asynchronously"),
    )?;
    dispatcher.register_service("math", MathService)?;

    Ok(dispatcher)
}

/// Serve newline-delimited JSON-RPC until stdin closes. Lines are handled
/// concurrently; replies are written in completion order.
async fn serve_stdio(dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut in_flight = FuturesUnordered::new();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let dispatcher = dispatcher.clone();
                    in_flight.push(async move { dispatcher.handle_text(&line).await });
                }
                None => input_open = false,
            },
            Some(reply) = in_flight.next(), if !in_flight.is_empty() => {
                if let Some(reply) = reply {
                    stdout.write_all(reply.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
            },
            else => break,
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing; stdout carries the protocol
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut dispatcher = match build_dispatcher(&cli) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Failed to register methods: {e}");
            std::process::exit(1);
        }
    };

    let timing = TimingMiddleware::new();
    dispatcher.add_middleware(LoggingMiddleware);
    dispatcher.add_middleware(timing.clone());

    info!(
        "Serving {} methods on stdio ({:?} batches)",
        dispatcher.registry().len(),
        dispatcher.config().batch_mode
    );

    if let Err(e) = serve_stdio(dispatcher.into_shared()).await {
        error!("Stdio transport failed: {e}");
        std::process::exit(1);
    }

    let mut summary: Vec<_> = timing.summary().into_iter().collect();
    summary.sort_by(|a, b| a.0.cmp(&b.0));
    for (method, stats) in summary {
        info!(
            "{method}: {} calls, mean {:?}, max {:?}",
            stats.count, stats.mean, stats.max
        );
    }
}
