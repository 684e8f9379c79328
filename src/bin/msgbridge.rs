//! msgbridge
//!
//! Drives a bridge manager from JSON commands on stdin, against a downstream
//! channel that echoes every payload back as its reply.
//!
//! ```bash
//! echo '{"op":"register","endpoint":"peer-1"}
//! {"op":"inbound","endpoint":"peer-1","message":{"hi":1}}
//! {"op":"send","destination":"peer-2","payload":{"op":"ping"}}' | msgbridge --log debug
//! ```
//!
//! Events (inbound deliveries, replies, command errors) are written to stdout
//! as JSON lines.

use anyhow::{Context, Result};
use clap::Parser;
use msgbridge::{BridgeConfig, BridgeManager, DownstreamChannel, EndpointHandler, handler_fn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt as _;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Parser, Debug)]
#[command(name = "msgbridge")]
#[command(about = "Multiplex logical endpoints over an echoing downstream channel")]
struct Cli {
    /// Configuration file (defaults to ~/.msgbridge/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable logging to stderr. Accepts a level (error, warn, info, debug, trace)
    /// or a RUST_LOG-style filter string (e.g., "msgbridge=debug").
    #[arg(long)]
    log: Option<String>,

    /// Delay every downstream call by this many milliseconds.
    #[arg(long, default_value_t = 0)]
    echo_delay_ms: u64,
}

/// One line of input.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum Command {
    Register {
        endpoint: String,
    },
    Unregister {
        endpoint: String,
    },
    Inbound {
        endpoint: String,
        message: Value,
    },
    Send {
        destination: String,
        payload: Value,
    },
}

/// One line of output.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum Event {
    Inbound {
        endpoint: String,
        message: Value,
    },
    Reply {
        destination: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        message: String,
    },
}

impl Event {
    fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::error!(%err, "failed to serialize event"),
        }
    }
}

fn setup_logging(filter: Option<&str>) {
    use tracing_subscriber::EnvFilter;
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Downstream channel that answers every call with its payload.
fn echo_channel(delay: Duration) -> Arc<dyn DownstreamChannel> {
    Arc::new(move |destination_id: &str, payload: Value| -> Result<Value> {
        tracing::debug!(%destination_id, "echo");
        std::thread::sleep(delay);
        Ok(payload)
    })
}

/// Writes events to stdout until every sender is gone.
async fn print_events(mut events_rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events_rx.recv().await {
        event.emit();
    }
}

/// The command loop, keeping the handlers it registered so they can be
/// unregistered by the same reference.
struct Driver {
    manager: BridgeManager,
    handlers: HashMap<String, Arc<dyn EndpointHandler>>,
    events_tx: mpsc::UnboundedSender<Event>,

    /// Tasks waiting on outbound replies.
    replies: JoinSet<()>,
}

impl Driver {
    fn new(manager: BridgeManager, events_tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            manager,
            handlers: HashMap::new(),
            events_tx,
            replies: JoinSet::new(),
        }
    }

    /// Run one input line; failures are reported as an error event.
    fn handle_line(&mut self, line: &str) {
        let outcome = serde_json::from_str::<Command>(line)
            .context("malformed command")
            .and_then(|command| self.run_command(command));
        if let Err(err) = outcome {
            let _ = self.events_tx.send(Event::Error {
                message: format!("{err:#}"),
            });
        }
    }

    fn run_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Register { endpoint } => {
                let events_tx = self.events_tx.clone();
                let handler: Arc<dyn EndpointHandler> = handler_fn(move |endpoint, message| {
                    let _ = events_tx.send(Event::Inbound { endpoint, message });
                    std::future::ready(())
                });
                self.manager.register_handler(endpoint.clone(), handler.clone())?;
                self.handlers.insert(endpoint, handler);
            }

            Command::Unregister { endpoint } => {
                // An endpoint we never registered gets a fresh handler, which the
                // manager will refuse.
                let handler: Arc<dyn EndpointHandler> = match self.handlers.get(&endpoint) {
                    Some(handler) => handler.clone(),
                    None => handler_fn(|_, _| std::future::ready(())),
                };
                self.manager.unregister_handler(&endpoint, &handler)?;
                self.handlers.remove(&endpoint);
            }

            Command::Inbound { endpoint, message } => {
                self.manager.dispatch_inbound(&endpoint, message)?;
            }

            Command::Send {
                destination,
                payload,
            } => {
                let reply = self.manager.send_outbound(destination.clone(), payload)?;
                let events_tx = self.events_tx.clone();
                self.replies.spawn(async move {
                    let event = match reply.await {
                        Ok(result) => Event::Reply {
                            destination,
                            result: Some(result),
                            error: None,
                        },
                        Err(err) => Event::Reply {
                            destination,
                            result: None,
                            error: Some(err.to_string()),
                        },
                    };
                    let _ = events_tx.send(event);
                });
            }
        }
        Ok(())
    }

    /// Wait for every outstanding reply, then drop the manager so the inbound
    /// mailboxes drain and close.
    async fn finish(mut self) {
        while let Some(joined) = self.replies.join_next().await {
            if let Err(err) = joined {
                tracing::error!(%err, "reply task failed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::load_or_default(&BridgeConfig::default_path()?)?,
    };
    setup_logging(cli.log.as_deref().or(config.log.as_deref()));

    let manager = BridgeManager::new(config);
    manager.connect(echo_channel(Duration::from_millis(cli.echo_delay_ms)))?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx));
    let mut driver = Driver::new(manager, events_tx);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        driver.handle_line(&line);
    }

    // The printer stops once the last handler and reply task let go of their
    // event sender.
    driver.finish().await;
    printer.await.context("event printer failed")?;

    Ok(())
}
