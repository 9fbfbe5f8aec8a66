//! Print reader and card events until interrupted

use std::time::Duration;

use cardio_core::{CardEvent, Event, Monitor, MonitorConfig, ReaderEvent, event::bounded_event_channel};
use cardio_pcsc::PcscTerminalFactory;
use clap::Parser;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// How long one poll blocks, in milliseconds
    #[arg(short, long, default_value_t = 500)]
    poll_ms: u64,

    /// Stop after this many events
    #[arg(short, long)]
    count: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();

    let cli = Cli::parse();

    let factory = PcscTerminalFactory::establish()?;
    let (tx, rx) = bounded_event_channel(64);
    let config = MonitorConfig::default().with_poll_timeout(Duration::from_millis(cli.poll_ms));
    let mut monitor = Monitor::start_channel(factory.terminals()?, config, tx)?;

    println!("Waiting for events...");
    for (seen, event) in rx.iter().enumerate() {
        match event {
            Event::Reader(ReaderEvent::Added(name)) => println!("+ reader {name}"),
            Event::Reader(ReaderEvent::Removed(name)) => println!("- reader {name}"),
            Event::Card(CardEvent::Inserted { reader, atr }) => {
                println!("+ card in {reader}, ATR {}", hex::encode_upper(atr));
            }
            Event::Card(CardEvent::Removed { reader }) => println!("- card in {reader}"),
        }
        if cli.count.is_some_and(|count| seen + 1 >= count) {
            break;
        }
    }

    monitor.stop();
    Ok(())
}
