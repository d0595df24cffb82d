use anyhow::Result;
use calbridge_core::config::BridgeConfig;
use owo_colors::OwoColorize;

pub async fn run(config: &BridgeConfig, names: &[String]) -> Result<()> {
    let backends = crate::domain_backends(config);
    let mut failed = 0;

    for name in names {
        println!("{}", name.bold());

        match super::connect(config, name, &backends).await {
            Ok(calendar) => {
                for replica in calendar.replicas() {
                    let mode = if replica.is_read_only() {
                        "read-only".yellow().to_string()
                    } else {
                        "read-write".green().to_string()
                    };
                    println!("   {} {} ({})", replica.name(), mode, replica.calendar_id().dimmed());
                }
            }
            Err(e) => {
                println!("   {}", format!("{:#}", e).red());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} calendars could not be connected", failed, names.len());
    }

    Ok(())
}
