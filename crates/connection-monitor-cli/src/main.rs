//! Flight connection monitor.
//!
//! With no arguments, lists all known connections. With an arriving and
//! a departing flight id, looks the pair up, prints its current status,
//! and watches for changes. `--watch` follows every at-risk connection
//! instead.
//!
//! The cluster connection is configured from the environment, or from
//! the local vault via `--cluster`; see the session crate for the three
//! bootstrap modes.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connection_monitor_core::{
    ConnectionRecord, DatasetError, Dispatcher, KeyedDataset, LIVE_CONNECTIONS, LOCAL_CONNECTIONS,
    LineRenderer, Predicate, STATUS_AT_RISK, Subscription, SubscriptionFilter, connection_key,
    format_connection,
};
use connection_monitor_session::Session;

const USAGE: &str = "usage: connection-monitor [--watch] [--cluster NAME] [ARRIVING DEPARTING]";

const LISTING_QUERY: &str =
    "SELECT arriving_flight, departing_flight FROM local_connections ORDER BY arriving_flight";

#[derive(Parser, Debug)]
#[command(name = "connection-monitor", about = "Watch flight connection status")]
struct Cli {
    /// Arriving flight id (requires a departing flight id too).
    arriving: Option<String>,
    /// Departing flight id.
    departing: Option<String>,
    /// Follow every at-risk connection instead of listing.
    #[arg(long)]
    watch: bool,
    /// Read credentials for this cluster from the local vault.
    #[arg(long)]
    cluster: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error)
            if matches!(
                error.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            print!("{error}");
            return Ok(());
        }
        Err(_) => {
            println!("{USAGE}");
            return Ok(());
        }
    };
    if cli.arriving.is_some() != cli.departing.is_some() {
        println!("{USAGE}");
        return Ok(());
    }

    let session = Session::connect(cli.cluster.as_deref()).await?;
    let dataset = session.dataset();

    match (&cli.arriving, &cli.departing) {
        (Some(arriving), Some(departing)) => {
            let status = pair_status(&dataset, arriving, departing).await?;
            println!("{}", describe_pair(arriving, departing, &status));
            // A known pair is watched even when there is no live data
            // for it yet.
            if !matches!(status, PairStatus::NotAConnection) {
                let filter = SubscriptionFilter::key(connection_key(arriving, departing));
                let subscription = dataset.subscribe(LIVE_CONNECTIONS, filter).await?;
                watch(subscription).await;
            }
        }
        _ if cli.watch => {
            let filter = SubscriptionFilter::predicate(Predicate::field_equals(
                "connection_status",
                STATUS_AT_RISK,
            ));
            let subscription = dataset.subscribe(LIVE_CONNECTIONS, filter).await?;
            watch(subscription).await;
        }
        _ => {
            for line in listing_lines(&dataset).await? {
                println!("{line}");
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

/// Outcome of looking a flight pair up.
enum PairStatus {
    /// No static membership entry: the pair is not a connection at all.
    NotAConnection,
    /// Known pair, but no live status yet.
    NoInformation,
    /// Known pair with a current live record.
    Current(ConnectionRecord),
}

async fn pair_status<D: KeyedDataset>(
    dataset: &D,
    arriving: &str,
    departing: &str,
) -> Result<PairStatus, DatasetError> {
    let key = connection_key(arriving, departing);
    if dataset.get(LOCAL_CONNECTIONS, &key).await?.is_none() {
        return Ok(PairStatus::NotAConnection);
    }
    match dataset.get(LIVE_CONNECTIONS, &key).await? {
        Some(raw) => match ConnectionRecord::decode(&raw) {
            Ok(record) => Ok(PairStatus::Current(record)),
            Err(error) => {
                tracing::warn!("error printing connection status: {error}");
                Ok(PairStatus::NoInformation)
            }
        },
        None => Ok(PairStatus::NoInformation),
    }
}

fn describe_pair(arriving: &str, departing: &str, status: &PairStatus) -> String {
    match status {
        PairStatus::NotAConnection => format!("{arriving} -> {departing} is not a connection"),
        PairStatus::NoInformation => format!("{arriving} -> {departing}: no information"),
        PairStatus::Current(record) => format_connection(record),
    }
}

async fn listing_lines<D: KeyedDataset>(dataset: &D) -> Result<Vec<String>, DatasetError> {
    let rows = dataset.query(LISTING_QUERY).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let mut fields = row.iter().map(|value| {
                value
                    .as_str()
                    .map_or_else(|| value.to_string(), ToOwned::to_owned)
            });
            let arriving = fields.next().unwrap_or_default();
            let departing = fields.next().unwrap_or_default();
            format!("{arriving} -> {departing}")
        })
        .collect())
}

/// Render delivered events until the stream ends or Ctrl-C arrives.
async fn watch(subscription: Subscription) {
    let dispatcher = Dispatcher::new(LineRenderer);
    tokio::select! {
        () = dispatcher.run(subscription.into_stream()) => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}
