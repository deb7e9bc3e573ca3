//! Engine chain overview.

use console::style;

use crate::cli::icons::{arrow, error, success, warning};
use docintake::ocr::check_binary;
use docintake::pipeline::DocumentProcessor;
use docintake::Config;

/// List the configured chain and probe each engine.
pub async fn cmd_engines(config: &Config) -> anyhow::Result<()> {
    let processor = DocumentProcessor::from_config(config)?;

    println!("{}", style("Rasterizer").bold());
    let binary = config.conversion.binary();
    if check_binary(binary) {
        println!("  {} {} ({} DPI)", success(), binary, config.conversion.density);
    } else {
        println!(
            "  {} {}",
            error(),
            config.conversion.rasterizer.install_hint()
        );
    }

    println!("{}", style("Preprocessing").bold());
    match processor.preprocess_client() {
        Some(client) => println!("  {} {}", success(), client.base_url()),
        None => println!("  {} disabled", warning()),
    }

    println!("{}", style("Engine chain").bold());
    for (i, tier) in processor.chain().iter().enumerate() {
        let backend = &tier.backend;
        let image = if tier.preprocessed {
            "enhanced image"
        } else {
            "original image"
        };
        let label = format!("{}. {} ({})", i + 1, backend.backend_type(), image);

        if !backend.is_available() {
            println!("  {} {}", error(), label);
            println!("     {} {}", arrow(), backend.availability_hint());
            continue;
        }
        match backend.health().await {
            Ok(detail) => {
                println!("  {} {}", success(), label);
                println!("     {} {}", arrow(), detail);
            }
            Err(e) => {
                println!("  {} {}", warning(), label);
                println!("     {} {}", arrow(), e);
            }
        }
    }
    println!(
        "  {} {}. degraded placeholder",
        style("·").dim(),
        processor.chain().len() + 1
    );
    Ok(())
}
