//! List cohorts command implementation

use crate::config::load_registry;
use clap::Args;

/// Arguments for the list-cohorts command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Show descriptions and criteria details
    #[arg(short, long)]
    pub verbose: bool,
}

impl ListArgs {
    /// Execute the list-cohorts command
    pub async fn execute(&self, registry_path: &str) -> anyhow::Result<i32> {
        let registry = match load_registry(registry_path) {
            Ok(r) => r,
            Err(e) => {
                println!("❌ Failed to load cohort registry");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!("Found {} cohort(s):", registry.len());
        println!();
        println!(
            "{:<32} {:<32} {:>8} {:>8}",
            "Cohort", "Source", "Include", "Exclude"
        );
        println!("{}", "-".repeat(84));

        for def in registry.iter() {
            println!(
                "{:<32} {:<32} {:>8} {:>8}",
                def.name.as_str(),
                def.source,
                def.include.len(),
                def.exclude.len()
            );
            if self.verbose {
                if let Some(description) = &def.description {
                    println!("    {description}");
                }
                for criterion in &def.include {
                    println!("    + {} {}", criterion.column, criterion.op);
                }
                for criterion in &def.exclude {
                    println!("    - {} {}", criterion.column, criterion.op);
                }
                if let Some(exclude_source) = &def.exclude_source {
                    println!("    excluded via {exclude_source}");
                }
            }
        }
        println!();
        Ok(0)
    }
}
