use anyhow::Result;
use calbridge_core::config::BridgeConfig;
use owo_colors::OwoColorize;

use crate::utils::tui;

pub async fn run(config: &BridgeConfig, names: &[String]) -> Result<()> {
    let backends = crate::domain_backends(config);
    let mut total = 0;
    let mut failed = 0;

    for (i, name) in names.iter().enumerate() {
        let spinner = tui::create_spinner(name.bold().to_string());
        let result = match super::connect(config, name, &backends).await {
            Ok(mut calendar) => calendar.sync().await.map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        spinner.finish_and_clear();

        println!("{}", name.bold());
        match result {
            Ok(0) => println!("   {}", "Already in sync".dimmed()),
            Ok(changes) => {
                println!("   {}", format!("{} events changed", changes).green());
                total += changes;
            }
            Err(e) => {
                println!("   {}", format!("{:#}", e).red());
                failed += 1;
            }
        }

        if i < names.len() - 1 {
            println!();
        }
    }

    if total > 0 {
        println!("\nSynced: {} events changed", total);
    }

    if failed > 0 {
        anyhow::bail!("{} of {} calendars failed to sync", failed, names.len());
    }

    Ok(())
}
