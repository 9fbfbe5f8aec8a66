//! Example showing how to enumerate connected card readers

use cardio_core::ListFilter;
use cardio_pcsc::PcscTerminalFactory;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let factory = PcscTerminalFactory::establish()?;
    let terminals = factory.terminals()?;

    let readers = terminals.list(ListFilter::All)?;
    println!("Found {} readers:", readers.len());

    for (i, reader) in readers.iter().enumerate() {
        println!("{}. Reader: {}", i + 1, reader.name());

        if reader.is_card_present()? {
            match reader.connect("*") {
                Ok(card) => println!(
                    "   Card present, protocol {}, ATR: {}",
                    card.protocol(),
                    hex::encode_upper(card.atr())
                ),
                Err(e) => println!("   Card present, could not connect: {e}"),
            }
        } else {
            println!("   No card present");
        }
    }

    Ok(())
}
