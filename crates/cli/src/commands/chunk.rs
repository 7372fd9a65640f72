//! Chunk command - preview how text splits into posts

use anyhow::{Context, Result, bail};
use herald_domain::text::chunk_content;
use std::io::Read;

use crate::args::ChunkArgs;

pub async fn execute(args: ChunkArgs) -> Result<()> {
    if args.max_chars == 0 {
        bail!("--max-chars must be greater than zero");
    }

    let text = read_input(&args)?;
    let chunks = chunk_content(&text, args.max_chars);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    let total = chunks.len();
    for (index, chunk) in chunks.iter().enumerate() {
        println!("[{}/{}] {} chars", index + 1, total, chunk.chars().count());
        println!("{}", chunk);
        println!();
    }

    Ok(())
}

fn read_input(args: &ChunkArgs) -> Result<String> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }

    match &args.file {
        Some(path) if path.as_os_str() == "-" => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            Ok(buffer)
        }
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display())),
        None => bail!("Provide --text or --file"),
    }
}
