//! List command - show the configurations a run would test

use crate::cli::args::ListArgs;
use crate::config::Config;
use crate::error::MatrixResult;
use crate::matrix::{enumerate, Configuration};
use console::style;
use serde::Serialize;

#[derive(Serialize)]
struct Entry<'a> {
    number: usize,
    configuration: &'a Configuration,
}

/// Execute the list command
pub async fn execute(args: ListArgs, config: &Config) -> MatrixResult<()> {
    let domains = config.matrix.clone().overridden_by(&args.matrix.domains());
    let configurations = enumerate(&domains);

    if args.json {
        let entries: Vec<_> = configurations
            .iter()
            .enumerate()
            .map(|(i, configuration)| Entry {
                number: i + 1,
                configuration,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (i, configuration) in configurations.iter().enumerate() {
        println!("{:>4}  {}", style(format!("#{}", i + 1)).dim(), configuration);
    }
    println!();
    println!("{} configuration(s)", configurations.len());

    Ok(())
}
