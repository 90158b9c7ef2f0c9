use anyhow::{Context, Result};

use crate::core::config::RunConfig;
use crate::core::executor;
use crate::core::terminal::{self, GuideSection};
use crate::logging;

const DEFAULT_CONFIG_PATH: &str = "vigil.toml";

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("run", "Process all due subscriptions now")
        .print();

    GuideSection::new("Flags for run")
        .command("--preview", "Redirect all emails to the preview recipient")
        .command("--max-jobs", "Cap the number of jobs this run")
        .command("--config", "Path to the TOML config file")
        .print();

    println!("\n Usage: vigil run [--preview] [--max-jobs N] [--config path]\n");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunCommandArgs {
    pub preview: bool,
    pub max_jobs: Option<usize>,
    pub config_path: String,
}

pub(crate) fn parse_run_command_args(args: &[String], start: usize) -> RunCommandArgs {
    let mut preview = false;
    let mut max_jobs = None;
    let mut config_path =
        std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--preview" | "-p" => {
                preview = true;
                i += 1;
            }
            "--max-jobs" | "-n" => {
                if i + 1 < args.len() {
                    max_jobs = match args[i + 1].parse() {
                        Ok(n) => Some(n),
                        Err(_) => {
                            terminal::print_info(&format!(
                                "Ignoring invalid --max-jobs value '{}', running uncapped",
                                args[i + 1]
                            ));
                            None
                        }
                    };
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    RunCommandArgs {
        preview,
        max_jobs,
        config_path,
    }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("run") => {
            logging::init();
            let run_args = parse_run_command_args(&args, 2);
            let config = RunConfig::load(&run_args.config_path)
                .await
                .context("Failed to load configuration")?;
            let preview = run_args.preview || config.preview.enabled;

            let summary =
                executor::process_alerts(&config, preview, run_args.max_jobs).await?;

            terminal::print_success("Run complete");
            terminal::print_status("Total", &summary.total.to_string());
            terminal::print_status("Delivered", &summary.delivered.to_string());
            terminal::print_status(
                "Failed",
                &(summary.total - summary.delivered).to_string(),
            );
            Ok(())
        }
        Some("help") | Some("--help") | Some("-h") | None => {
            print_help();
            Ok(())
        }
        Some(other) => {
            terminal::print_info(&format!("Unknown command: {}", other));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse_in_any_order() {
        let args: Vec<String> = [
            "vigil",
            "run",
            "--max-jobs",
            "5",
            "--preview",
            "--config",
            "custom.toml",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let parsed = parse_run_command_args(&args, 2);
        assert!(parsed.preview);
        assert_eq!(parsed.max_jobs, Some(5));
        assert_eq!(parsed.config_path, "custom.toml");
    }

    #[test]
    fn invalid_max_jobs_value_runs_uncapped() {
        let args: Vec<String> = ["vigil", "run", "--max-jobs", "ten"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let parsed = parse_run_command_args(&args, 2);
        assert_eq!(parsed.max_jobs, None);
    }

    #[test]
    fn missing_flag_values_are_ignored() {
        let args: Vec<String> = ["vigil", "run", "--max-jobs"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let parsed = parse_run_command_args(&args, 2);
        assert_eq!(parsed.max_jobs, None);
        assert!(!parsed.preview);
    }
}
