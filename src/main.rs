use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use clap::Parser;

use leakpath::*;

fn load_exclusions(args: &Args) -> Result<Vec<ExclusionRule>> {
    if let Some(path) = &args.exclusions {
        let file = File::open(path).with_context(|| format!("opening exclusion catalog {}", path))?;
        let rules = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("decoding exclusion catalog {}", path))?;
        Ok(rules)
    } else if args.no_default_exclusions {
        Ok(vec![])
    } else {
        Ok(default_exclusions())
    }
}

pub fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let snapshot = HeapSnapshot::from_path(&args.path)?;
    let exclusions = load_exclusions(&args)?;
    let mut finder = PathFinder::new();
    let mut listener = LogListener;
    let results = finder.find_paths(
        &snapshot,
        &exclusions,
        &snapshot.weak_refs,
        &snapshot.gc_roots,
        args.retained_size,
        &mut listener,
    )?;

    if results.is_empty() {
        println!(
            "No retaining path found for any of the {} weak references",
            snapshot.weak_refs.len()
        );
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        println!(
            "==== Leak {} of {}: {} (key {}) ====",
            i + 1,
            results.len(),
            result.weak_reference.class_name,
            result.weak_reference.key
        );
        if let Some(status) = result.exclusion_status {
            println!("reachability: {:?}", status);
        }
        for element in &result.path {
            match &element.reference {
                None => println!("ROOT 0x{:x}", element.instance),
                Some(reference) => {
                    let excluded = match &element.exclusion_description {
                        Some(description) => format!(" (excluded: {})", description),
                        None => String::new(),
                    };
                    println!("  {} -> 0x{:x}{}", reference, element.instance, excluded);
                }
            }
        }
        if let Some(size) = result.retained_heap_size {
            println!("retained: {} bytes", size);
        }
    }
    Ok(())
}
