use std::env;
use std::sync::Arc;

use anyhow::Context;

use stagefocus::axis::{MotionAxis, SimulatedAxis};
use stagefocus::scan::ScanOrchestrator;
use stagefocus::source::SimulatedFrameSource;
use stagefocus::timing::ScanClock;
use stagefocus::types::ScanRange;
use stagefocus::StageFocusConfig;

fn main() -> anyhow::Result<()> {
    stagefocus::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: stagefocus-cli <command> [args]");
        eprintln!("Commands: scan [start end speed] [--json] [--config <path>]");
        eprintln!("          print-config [--config <path>]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "scan" => cmd_scan(&args),
        "print-config" => cmd_print_config(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn load_config(args: &[String]) -> anyhow::Result<StageFocusConfig> {
    if let Some(i) = args.iter().position(|a| a == "--config") {
        let path = args
            .get(i + 1)
            .context("--config requires a path argument")?;
        StageFocusConfig::load_from_file(path).map_err(Into::into)
    } else {
        Ok(StageFocusConfig::load_or_default())
    }
}

fn cmd_print_config(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_scan(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let json = args.contains(&"--json".to_string());

    // Positional range: scan <start> <end> <speed>, else config default.
    let positional: Vec<&String> = args[2..]
        .iter()
        .take_while(|a| !a.starts_with("--"))
        .collect();
    let range = match positional.len() {
        0 => config.default_range,
        3 => ScanRange::new(
            positional[0].parse().context("invalid start position")?,
            positional[1].parse().context("invalid end position")?,
            positional[2].parse().context("invalid speed")?,
        ),
        _ => anyhow::bail!("scan takes either no range or <start> <end> <speed>"),
    };

    let clock = ScanClock::new();
    let axis = Arc::new(SimulatedAxis::new(config.axis.clone(), clock.clone()));
    axis.connect()
        .context("failed to connect simulated axis")?;

    let mut source =
        SimulatedFrameSource::new(config.source.clone(), axis.position_probe(), clock);

    let orchestrator = ScanOrchestrator::with_default_scorer(axis, config.scan.clone());

    // Ctrl-C aborts the scan through the ordinary cancellation path.
    let cancel = orchestrator.cancel_handle();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, cancelling scan");
        cancel.cancel();
    })
    .context("failed to install interrupt handler")?;

    match orchestrator.run_scan(&mut source, range) {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "best focus at {:.3} mm (score {:.1}, {} observations)",
                    result.winning_position_mm, result.winning_score, result.observation_count
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("scan failed: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
