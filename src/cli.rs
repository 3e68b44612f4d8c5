use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::auth::{CredentialProvider, StaticCredentials, Token};
use crate::config::{MonitorConfig, TrendPolicy, DEFAULT_FETCH_TOP};
use crate::insights::InsightSnapshot;
use crate::models::PipelineDefinition;
use crate::polling::{ConnectionState, PollingController};
use crate::providers::azure::AzureConnector;
use crate::providers::Connector;

#[derive(Parser)]
#[command(name = "pipepulse")]
#[command(author, version, about = "Azure DevOps pipeline insights", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output file path (defaults to stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Pretty print JSON output
    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Organization URL (e.g., "https://dev.azure.com/contoso")
    #[arg(short = 'u', long, env = "AZURE_DEVOPS_ORG_URL")]
    org_url: String,

    /// Project name
    #[arg(short = 'P', long, env = "AZURE_DEVOPS_PROJECT")]
    project: String,

    /// Personal access token with Build (read) scope
    #[arg(short, long, env = "AZURE_DEVOPS_PAT", hide_env_values = true)]
    token: String,
}

impl ConnectionArgs {
    fn credentials(&self) -> StaticCredentials {
        StaticCredentials {
            organization_url: self.org_url.clone(),
            project: self.project.clone(),
            token: Token::from(self.token.as_str()),
        }
    }
}

#[derive(Args)]
struct InsightArgs {
    /// Number of most recent runs to analyze
    #[arg(long, default_value_t = DEFAULT_FETCH_TOP)]
    top: usize,

    /// Success rate change, in points, that counts as a trend
    #[arg(long, default_value_t = 5)]
    success_threshold: u8,

    /// Average duration change, in percent, that counts as a trend
    #[arg(long, default_value_t = 10)]
    duration_threshold: u8,
}

impl InsightArgs {
    fn monitor_config(&self, poll_interval: Option<Duration>) -> MonitorConfig {
        let defaults = MonitorConfig::default();
        MonitorConfig {
            poll_interval: poll_interval.unwrap_or(defaults.poll_interval),
            fetch_top: self.top,
            trend: TrendPolicy {
                success_delta_points: self.success_threshold,
                duration_change_percent: self.duration_threshold,
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch recent runs once and print the insight snapshot
    Snapshot {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        insights: InsightArgs,
    },

    /// Keep polling and print a snapshot after every refresh.
    /// Press Enter to refresh immediately, Ctrl-C to stop.
    Watch {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        insights: InsightArgs,

        /// Seconds between refreshes
        #[arg(short, long, default_value_t = 30)]
        interval: u64,
    },

    /// List the project's pipeline definitions
    Definitions {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

enum Event {
    Updated(Arc<InsightSnapshot>),
    Failed { message: String, transient: bool },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Snapshot {
                connection,
                insights,
            } => {
                info!("Collecting insights for project: {}", connection.project);

                let controller =
                    PollingController::new(insights.monitor_config(None), AzureConnector)?;
                let mut events = subscribe(&controller);
                controller.connect_with(&connection.credentials()).await?;

                let event = events.recv().await;
                controller.disconnect();
                match event {
                    Some(Event::Updated(snapshot)) => self.write_output(snapshot.as_ref()),
                    Some(Event::Failed { message, .. }) => bail!(message),
                    None => bail!("Connection closed before the first refresh completed"),
                }
            }
            Commands::Watch {
                connection,
                insights,
                interval,
            } => {
                let config = insights.monitor_config(Some(Duration::from_secs(*interval)));
                let controller = PollingController::new(config, AzureConnector)?;
                let mut events = subscribe(&controller);
                controller.connect_with(&connection.credentials()).await?;
                info!(
                    "Watching project {} every {}s, press Enter to refresh",
                    connection.project, interval
                );

                self.watch(
                    &controller,
                    &mut events,
                    BufReader::new(tokio::io::stdin()),
                    tokio::signal::ctrl_c(),
                )
                .await?;
                controller.disconnect();
                Ok(())
            }
            Commands::Definitions { connection } => {
                info!("Listing pipeline definitions for project: {}", connection.project);

                let credentials = connection.credentials().load()?;
                let source = AzureConnector.open(&credentials)?;
                let definitions: Vec<PipelineDefinition> = source.fetch_definitions().await?;
                info!("Found {} definitions", definitions.len());

                self.write_output(&definitions)
            }
        }
    }

    /// Runs until `shutdown` resolves or the event stream ends. Each line
    /// read from `input` requests a refresh.
    async fn watch(
        &self,
        controller: &PollingController,
        events: &mut mpsc::UnboundedReceiver<Event>,
        input: impl AsyncBufRead + Unpin,
        shutdown: impl Future<Output = std::io::Result<()>>,
    ) -> Result<()> {
        let mut lines = input.lines();
        let mut input_open = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupted, stopping");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(Event::Updated(snapshot)) => {
                        info!(
                            "Refreshed at {}: {} runs, {}% success",
                            controller
                                .last_updated()
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_default(),
                            snapshot.total_runs,
                            snapshot.success_rate
                        );
                        self.write_output(snapshot.as_ref())?;
                    }
                    Some(Event::Failed { message, transient }) => {
                        if controller.state() == ConnectionState::Disconnected {
                            bail!(message);
                        }
                        if transient {
                            warn!("Refresh failed, retrying on next tick: {message}");
                        } else {
                            error!("Refresh failed: {message}");
                        }
                    }
                    None => return Ok(()),
                },
                line = lines.next_line(), if input_open => match line? {
                    Some(_) if controller.manual_refresh() => info!("Refresh requested"),
                    Some(_) if controller.is_refreshing() => info!("Refresh already in progress"),
                    Some(_) => warn!(
                        "Cannot refresh while {:?} (last error: {})",
                        controller.state(),
                        controller.last_error().unwrap_or_else(|| "none".to_string())
                    ),
                    None => input_open = false,
                },
            }
        }
    }

    fn write_output<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let json_output = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)?;
            info!("Output written to: {}", output_path.display());
        } else {
            println!("{}", json_output);
        }

        Ok(())
    }
}

fn subscribe(controller: &PollingController) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();

    let updates = tx.clone();
    controller.on_snapshot_updated(move |snapshot| {
        let _ = updates.send(Event::Updated(snapshot));
    });
    controller.on_error(move |err| {
        let _ = tx.send(Event::Failed {
            message: err.to_string(),
            transient: err.is_transient(),
        });
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_POLL_INTERVAL;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn cli(output: &std::path::Path) -> Cli {
        Cli::try_parse_from([
            "pipepulse",
            "--output",
            output.to_str().unwrap(),
            "watch",
            "--org-url",
            "https://dev.azure.com/contoso",
            "--project",
            "web",
            "--token",
            "pat",
        ])
        .unwrap()
    }

    fn output_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pipepulse-{name}-{}.json", std::process::id()))
    }

    fn controller() -> PollingController {
        PollingController::new(MonitorConfig::default(), AzureConnector).unwrap()
    }

    #[test]
    fn test_watch_arguments_build_monitor_config() {
        let cli = Cli::try_parse_from([
            "pipepulse",
            "watch",
            "-u",
            "https://dev.azure.com/contoso",
            "-P",
            "web",
            "-t",
            "pat",
            "--interval",
            "5",
            "--top",
            "50",
            "--success-threshold",
            "3",
        ])
        .unwrap();

        let Commands::Watch {
            connection,
            insights,
            interval,
        } = &cli.command
        else {
            panic!("expected watch command");
        };
        let config = insights.monitor_config(Some(Duration::from_secs(*interval)));

        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.fetch_top, 50);
        assert_eq!(config.trend.success_delta_points, 3);
        assert_eq!(config.trend.duration_change_percent, 10);
        assert_eq!(connection.credentials().load().unwrap().project(), "web");
        assert_eq!(
            insights.monitor_config(None).poll_interval,
            DEFAULT_POLL_INTERVAL
        );
    }

    #[tokio::test]
    async fn test_watch_stops_on_shutdown_signal_sent_while_busy() {
        let path = output_path("shutdown");
        let cli = cli(&path);
        let controller = controller();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        for _ in 0..20 {
            event_tx
                .send(Event::Updated(Arc::new(InsightSnapshot::default())))
                .unwrap();
        }
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        stop_tx.send(()).unwrap();
        let shutdown = async move {
            let _ = stop_rx.await;
            Ok(())
        };

        let result = timeout(
            WAIT,
            cli.watch(&controller, &mut events, tokio::io::empty(), shutdown),
        )
        .await
        .expect("watch ignored the shutdown signal");

        assert!(result.is_ok());
        // The sender is still alive, so only the signal could have ended the loop.
        drop(event_tx);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_watch_writes_each_snapshot_until_events_end() {
        let path = output_path("events");
        let cli = cli(&path);
        let controller = controller();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let snapshot = InsightSnapshot {
            total_runs: 4,
            ..InsightSnapshot::default()
        };
        event_tx.send(Event::Updated(Arc::new(snapshot))).unwrap();
        drop(event_tx);

        let result = timeout(
            WAIT,
            cli.watch(
                &controller,
                &mut events,
                tokio::io::empty(),
                std::future::pending(),
            ),
        )
        .await
        .unwrap();

        assert!(result.is_ok());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"total_runs\":4"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_watch_fails_once_disconnected() {
        let path = output_path("failed");
        let cli = cli(&path);
        let controller = controller();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        event_tx
            .send(Event::Failed {
                message: "Authentication failed: 401".to_string(),
                transient: false,
            })
            .unwrap();

        let result = timeout(
            WAIT,
            cli.watch(
                &controller,
                &mut events,
                tokio::io::empty(),
                std::future::pending(),
            ),
        )
        .await
        .unwrap();

        assert!(result.unwrap_err().to_string().contains("401"));
        drop(event_tx);
    }
}
