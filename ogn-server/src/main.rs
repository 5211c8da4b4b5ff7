//! ogn-server: live OGN feed tracker, relay server, and offline decoder.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use clap::{ArgAction, Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio_util::sync::CancellationToken;

use ogn_core::config::{self, Config};
use ogn_core::framing::is_comment;
use ogn_core::tracker::Tracker;
use ogn_core::{try_decode, PositionReport};

mod broadcast;
mod feed;
mod logging;
mod pipeline;
mod web;

use broadcast::Broadcaster;
use feed::{FeedClient, TcpConnector};
use pipeline::TrackerTask;

#[derive(Parser)]
#[command(name = "ogn", version, about = "OGN glider feed tracker and relay")]
struct Cli {
    /// Config file [default: ~/.ogn-live/config.yaml]
    #[arg(long, global = true, env = "OGN_CONFIG")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the feed, track aircraft, and serve the websocket relay
    Live(LiveArgs),

    /// Decode raw feed lines from a file and print an aircraft table
    Decode {
        /// Path to file with one packet per line, `-` for stdin
        file: PathBuf,

        /// Print every decoded report as JSON instead of the summary table
        #[arg(short, long)]
        raw: bool,
    },

    /// Show the effective configuration, or write the defaults
    Config {
        /// Write the default config file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,
    },
}

/// Command-line overrides for the config file.
#[derive(Args, Default)]
struct LiveArgs {
    /// Feed host
    #[arg(long, env = "OGN_HOST")]
    host: Option<String>,

    /// Feed port
    #[arg(long, env = "OGN_PORT")]
    port: Option<u16>,

    /// Login callsign
    #[arg(long, env = "OGN_USER")]
    user: Option<String>,

    /// Login passcode (-1 for receive-only)
    #[arg(long, env = "OGN_PASS", allow_hyphen_values = true)]
    pass: Option<String>,

    /// Server-side filter, e.g. r/46.8/8.2/250
    #[arg(long, env = "OGN_FILTER")]
    filter: Option<String>,

    /// Seconds to wait before reconnecting
    #[arg(long)]
    reconnect_delay: Option<f64>,

    /// Seconds of silence before a connection is considered dead
    #[arg(long)]
    idle_timeout: Option<f64>,

    /// Trail points kept per aircraft
    #[arg(long)]
    trail_length: Option<usize>,

    /// Seconds an aircraft stays listed without a new report
    #[arg(long)]
    ttl: Option<f64>,

    /// Relay listen address
    #[arg(long, env = "OGN_LISTEN")]
    listen: Option<String>,

    /// Relay listen port
    #[arg(long)]
    listen_port: Option<u16>,

    /// Per-subscriber queue length
    #[arg(long)]
    queue: Option<usize>,
}

impl LiveArgs {
    fn apply(self, config: &mut Config) {
        let feed = &mut config.feed;
        if let Some(v) = self.host {
            feed.host = v;
        }
        if let Some(v) = self.port {
            feed.port = v;
        }
        if let Some(v) = self.user {
            feed.user = v;
        }
        if let Some(v) = self.pass {
            feed.pass = v;
        }
        if let Some(v) = self.filter {
            feed.filter = v;
        }
        if let Some(v) = self.reconnect_delay {
            feed.reconnect_delay = v;
        }
        if let Some(v) = self.idle_timeout {
            feed.idle_timeout = v;
        }
        if let Some(v) = self.trail_length {
            config.tracker.trail_length = v;
        }
        if let Some(v) = self.ttl {
            config.tracker.ttl = v;
        }
        if let Some(v) = self.listen {
            config.server.host = v;
        }
        if let Some(v) = self.listen_port {
            config.server.port = v;
        }
        if let Some(v) = self.queue {
            config.server.queue = v;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let config_path = cli.config.clone();
    match cli.command {
        Commands::Live(args) => {
            let mut config = load(config_path.as_deref());
            args.apply(&mut config);
            cmd_live(config);
        }
        Commands::Decode { file, raw } => {
            let config = load(config_path.as_deref());
            cmd_decode(file, raw, &config);
        }
        Commands::Config { init, force } => cmd_config(config_path.as_deref(), init, force),
    }
}

fn load(path: Option<&Path>) -> Config {
    match path {
        Some(path) => config::load_config_from(path).unwrap_or_else(|e| {
            eprintln!("Error loading config: {e}");
            std::process::exit(1);
        }),
        None => config::load_config(),
    }
}

// ---------------------------------------------------------------------------
// live
// ---------------------------------------------------------------------------

fn cmd_live(config: Config) {
    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Error starting runtime: {e}");
        std::process::exit(1);
    });

    if let Err(e) = runtime.block_on(run_live(config)) {
        tracing::error!(error = %e, "Live tracking failed");
        std::process::exit(1);
    }
}

async fn run_live(config: Config) -> io::Result<()> {
    let shutdown = CancellationToken::new();
    let reports = Broadcaster::new(config.server.queue);
    let events = Broadcaster::new(config.server.queue);
    let tracker = Arc::new(RwLock::new(Tracker::new(&config.tracker)));

    let listen = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&listen).await?;

    let tracker_task = TrackerTask::new(Arc::clone(&tracker), reports.subscribe(), events.clone());
    let client = FeedClient::new(
        TcpConnector::new(config.feed.address()),
        config.feed.clone(),
        reports,
    );
    let feed_state = client.state();
    let feed_stats = client.stats();
    let relay_events = events.clone();

    let state = Arc::new(web::AppState {
        tracker,
        events,
        shutdown: shutdown.clone(),
    });

    let tracker_handle = tokio::spawn(tracker_task.run(shutdown.clone()));
    let feed_handle = tokio::spawn(client.run(shutdown.clone()));
    let server_handle = tokio::spawn(web::serve(listener, state));

    tokio::signal::ctrl_c().await?;
    let counters = feed_stats.snapshot();
    tracing::info!(
        feed = ?*feed_state.borrow(),
        decoded = counters.decoded,
        rejected = counters.rejected,
        relay_drops = relay_events.dropped(),
        "Shutting down"
    );
    shutdown.cancel();

    let _ = feed_handle.await;
    let _ = tracker_handle.await;
    match server_handle.await {
        Ok(result) => result,
        Err(e) => Err(io::Error::other(e)),
    }
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
struct DecodeCounts {
    lines: u64,
    comments: u64,
    decoded: u64,
    rejected: u64,
}

/// Decode every line of `reader` into `tracker`, calling `on_report` for
/// each decoded report. Line number stands in for time, so nothing expires.
fn decode_reader<R: BufRead>(
    reader: R,
    tracker: &mut Tracker,
    mut on_report: impl FnMut(&PositionReport),
) -> DecodeCounts {
    let mut counts = DecodeCounts::default();

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                counts.lines += 1;
                counts.rejected += 1;
                tracing::debug!(error = %e, "Skipping non-UTF-8 line");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Read failed, stopping decode");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        counts.lines += 1;
        if is_comment(line) {
            counts.comments += 1;
            continue;
        }

        match try_decode(line) {
            Ok(report) => {
                counts.decoded += 1;
                on_report(&report);
                tracker.on_report(report, counts.lines as f64);
            }
            Err(e) => {
                counts.rejected += 1;
                tracing::debug!(error = %e, line, "Skipping packet");
            }
        }
    }

    counts
}

fn cmd_decode(file: PathBuf, raw: bool, config: &Config) {
    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(&file).unwrap_or_else(|e| {
            eprintln!("Error opening {}: {e}", file.display());
            std::process::exit(1);
        });
        Box::new(io::BufReader::new(f))
    };

    let mut tracker = Tracker::new(&config.tracker);
    let counts = decode_reader(reader, &mut tracker, |report| {
        if raw {
            match serde_json::to_string(report) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("Error encoding report: {e}"),
            }
        }
    });

    if !raw {
        print_summary(&tracker, &counts);
    }
}

fn print_summary(tracker: &Tracker, counts: &DecodeCounts) {
    println!();
    println!(
        "Lines: {} read, {} comments, {} decoded, {} rejected, {} aircraft",
        counts.lines,
        counts.comments,
        counts.decoded,
        counts.rejected,
        tracker.len()
    );
    println!();

    if tracker.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "ID", "Source", "Proto", "Time", "Lat", "Lon", "Alt (m)", "Crs", "Spd (kts)", "Climb",
        "Squawk", "Points", "Reports",
    ]);

    for ac in tracker.snapshot() {
        let r = &ac.latest;
        table.add_row(vec![
            Cell::new(&ac.id),
            Cell::new(&r.source_name),
            Cell::new(r.protocol),
            Cell::new(&r.timestamp),
            Cell::new(format!("{:.4}", r.latitude)),
            Cell::new(format!("{:.4}", r.longitude)),
            Cell::new(format!("{:.0}", r.altitude_m)),
            Cell::new(r.course_deg),
            Cell::new(r.speed_kts),
            Cell::new(&r.climb_rate),
            Cell::new(r.squawk.as_deref().unwrap_or("-")),
            Cell::new(ac.trail.len()),
            Cell::new(ac.report_count),
        ]);
    }

    println!("{table}");
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config(path: Option<&Path>, init: bool, force: bool) {
    let target = path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::config_file);

    if init {
        if target.exists() && !force {
            eprintln!(
                "Config file {} already exists (use --force to overwrite)",
                target.display()
            );
            std::process::exit(1);
        }
        let defaults = Config::default();
        let written = match path {
            Some(p) => config::save_config_to(&defaults, p).map(|_| p.to_path_buf()),
            None => config::save_config(&defaults),
        };
        match written {
            Ok(p) => println!("Wrote {}", p.display()),
            Err(e) => {
                eprintln!("Error writing config: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let config = load(path);
    let status = if target.exists() {
        "loaded"
    } else {
        "not found, showing defaults"
    };
    println!("# {} ({status})", target.display());
    print!("{}", config::serialize_config(&config));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ogn_core::config::TrackerConfig;
    use std::io::Cursor;

    const FLARM: &str = "FLRDDA5BA>OGFLR,qAS,LFMX:/160829h4415.41N/00600.03E'342/049/A=005524 id0ADDA5BA -454fpm -1.1rot 8.8dB 0e +51.2kHz gps4x5";
    const FANET: &str = "FNT1103CE>OGNFNT,qAS,FNB1103CE:/183727h5057.94N/00801.00Eg355/002/A=001042 !W10! id1E1103CE +03fpm";

    #[test]
    fn test_cli_parses_live_overrides() {
        let cli = Cli::try_parse_from([
            "ogn",
            "-vv",
            "live",
            "--user",
            "N0CALL",
            "--pass",
            "-1",
            "--filter",
            "r/47.0/8.0/100",
            "--ttl",
            "30",
            "--listen-port",
            "9000",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);

        let Commands::Live(args) = cli.command else {
            panic!("expected live");
        };
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.feed.user, "N0CALL");
        assert_eq!(config.feed.pass, "-1");
        assert_eq!(config.feed.filter, "r/47.0/8.0/100");
        assert_eq!(config.tracker.ttl, 30.0);
        assert_eq!(config.server.port, 9000);
        // untouched
        assert_eq!(config.feed.host, "aprs.glidernet.org");
        assert_eq!(config.tracker.trail_length, 100);
    }

    #[test]
    fn test_empty_overrides_keep_config() {
        let mut config = Config::default();
        LiveArgs::default().apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cli_decode_command() {
        let cli = Cli::try_parse_from(["ogn", "--config", "/tmp/x.yaml", "decode", "-", "--raw"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.yaml")));
        assert!(matches!(cli.command, Commands::Decode { raw: true, .. }));
    }

    #[test]
    fn test_decode_reader_counts() {
        let input = format!("# aprsc 2.1.14\n{FLARM}\n\ngarbage line\n{FANET}\n{FLARM}\n");
        let mut tracker = Tracker::new(&TrackerConfig::default());
        let mut seen = Vec::new();

        let counts = decode_reader(Cursor::new(input), &mut tracker, |r| {
            seen.push(r.source_name.clone())
        });

        assert_eq!(
            counts,
            DecodeCounts {
                lines: 5,
                comments: 1,
                decoded: 3,
                rejected: 1,
            }
        );
        assert_eq!(seen, vec!["FLRDDA5BA", "FNT1103CE", "FLRDDA5BA"]);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.get("FLRDDA5BA").unwrap().trail.len(), 2);

        // Most recent line first
        let ids: Vec<String> = tracker.snapshot().into_iter().map(|ac| ac.id).collect();
        assert_eq!(ids, vec!["FLRDDA5BA", "FNT1103CE"]);
    }

    struct FailingReader;

    impl io::Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("is a directory"))
        }
    }

    #[test]
    fn test_decode_reader_stops_on_read_error() {
        let mut tracker = Tracker::new(&TrackerConfig::default());
        let counts = decode_reader(io::BufReader::new(FailingReader), &mut tracker, |_| {});
        assert_eq!(counts, DecodeCounts::default());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_decode_reader_skips_invalid_utf8() {
        let mut input = b"FLR1>OGFLR:/\xff\xfe\n".to_vec();
        input.extend_from_slice(FANET.as_bytes());
        input.push(b'\n');
        let mut tracker = Tracker::new(&TrackerConfig::default());

        let counts = decode_reader(Cursor::new(input), &mut tracker, |_| {});

        assert_eq!(counts.lines, 2);
        assert_eq!(counts.rejected, 1);
        assert_eq!(counts.decoded, 1);
        assert_eq!(tracker.len(), 1);
    }
}
