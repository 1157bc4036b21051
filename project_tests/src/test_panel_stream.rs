use chrono::Utc;
use clap::Parser;
use futures_util::StreamExt;
use lib_panel::wire::FrameDecoder;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Live probe for the PanelStream /events endpoint", long_about = None)]
struct Args {
    /// Base URL of a running server_panel instance
    #[clap(short, long, default_value = "http://127.0.0.1:9010")]
    url: String,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 30)]
    report_interval_seconds: u64,
}

#[derive(Default)]
struct Stats {
    frames_by_type: HashMap<String, u64>,
    last_frame_at: Option<chrono::DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let stats = Arc::new(Mutex::new(Stats::default()));

    // Reporter task: print a frame-type breakdown on a fixed interval.
    let reporter_stats = Arc::clone(&stats);
    tokio::spawn(async move {
        loop {
            sleep(Duration::from_secs(args.report_interval_seconds)).await;
            let stats = reporter_stats.lock().unwrap();
            let total: u64 = stats.frames_by_type.values().sum();
            println!("[{}] {} frames total: {:?} (last frame {:?})",
                Utc::now().format("%H:%M:%S"),
                total,
                stats.frames_by_type,
                stats.last_frame_at,
            );
        }
    });

    let endpoint = format!("{}/events", args.url.trim_end_matches('/'));
    println!("Connecting to {endpoint}");

    let response = reqwest::Client::new()
        .get(&endpoint)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await?
        .error_for_status()?;

    // The outbound protocol is the same frame shape the ingest side
    // consumes, so the library decoder doubles as a probe parser.
    let mut decoder = FrameDecoder::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let batch = decoder.push(&chunk?);
        for error in &batch.dropped {
            eprintln!("undecodable frame: {error}");
        }
        for frame in batch.frames {
            let kind = frame
                .str_field("type")
                .unwrap_or("event")
                .to_string();
            let mut stats = stats.lock().unwrap();
            *stats.frames_by_type.entry(kind).or_insert(0) += 1;
            stats.last_frame_at = Some(Utc::now());
        }
    }

    println!("Stream closed by server.");
    Ok(())
}
