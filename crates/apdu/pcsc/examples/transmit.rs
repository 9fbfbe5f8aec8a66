//! Send APDUs to the first card found and print the responses

use cardio_core::{ListFilter, prelude::*};
use cardio_pcsc::PcscTerminalFactory;
use clap::Parser;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional specific reader to use
    #[arg(short, long)]
    reader: Option<String>,

    /// Protocol to connect with: T=0, T=1, * or T=CL
    #[arg(short, long, default_value = "*")]
    protocol: String,

    /// Open a logical channel and send the commands there
    #[arg(short, long)]
    logical: bool,

    /// Command APDUs in hex
    #[arg(required = true)]
    apdus: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();

    let cli = Cli::parse();

    let factory = PcscTerminalFactory::establish()?;
    let terminals = factory.terminals()?;
    let terminal = match cli.reader {
        Some(name) => terminals.terminal(name),
        None => terminals
            .list(ListFilter::CardPresent)?
            .into_iter()
            .next()
            .ok_or("no reader with a card found")?,
    };

    let card = terminal.connect(&cli.protocol)?;
    println!(
        "Connected to {} ({}), ATR {}",
        card.reader_name(),
        card.protocol(),
        hex::encode_upper(card.atr())
    );

    let mut channel = if cli.logical {
        card.open_logical_channel()?
    } else {
        card.basic_channel()
    };

    for apdu in &cli.apdus {
        let command = Command::from_bytes(&hex::decode(apdu)?)?;
        let response = channel.transmit(&command)?;
        println!(
            "> {}\n< {} {}",
            apdu.to_uppercase(),
            hex::encode_upper(response.payload()),
            response.status()
        );
    }

    channel.close()?;
    card.disconnect(false)?;
    Ok(())
}
