use gapfuzz_core::config::{CommandExecutorSettings, ExecutorType, GapfuzzConfig};
use gapfuzz_core::fuzzer::{Fuzzer, FuzzerControl, RunSummary};
use gapfuzz_core::listener::FuzzerListener;
use gapfuzz_core::process::{ExecutionStatus, FuzzResult};
use gapfuzz_core::transport::{CommandProcessFactory, EchoProcessFactory};

use clap::Parser;
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(short, long)]
    threads: Option<usize>,
    #[clap(long)]
    delay_ms: Option<u64>,
    /// Target command line; switches the executor to `command`.
    #[clap(long)]
    target_command: Option<String>,
    /// Print one JSON object per result instead of text.
    #[clap(long)]
    json: bool,
    /// Read `pause`, `resume` and `stop` commands from stdin.
    #[clap(short, long)]
    interactive: bool,
}

struct ConsoleListener {
    json: bool,
}

impl ConsoleListener {
    fn print_json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(line) => println!("{line}"),
            Err(e) => log::error!("Failed to serialize result: {e}"),
        }
    }
}

fn status_label(status: &ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Ok => "ok".to_string(),
        ExecutionStatus::Timeout => "timeout".to_string(),
        ExecutionStatus::Crash(desc) => format!("crash ({desc})"),
        ExecutionStatus::Failed(desc) => format!("failed ({desc})"),
        ExecutionStatus::Other(desc) => format!("other ({desc})"),
    }
}

impl FuzzerListener for ConsoleListener {
    fn on_started(&self, total: u64) {
        if !self.json {
            println!("Fuzzing {total} combinations");
        }
    }

    fn on_paused(&self) {
        if !self.json {
            println!("Paused");
        }
    }

    fn on_resumed(&self) {
        if !self.json {
            println!("Resumed");
        }
    }

    fn on_completed(&self, result: &FuzzResult) {
        if self.json {
            self.print_json(result);
            return;
        }
        println!(
            "#{:<6} {:<24} {:?} {}ms {}B",
            result.index,
            status_label(&result.status),
            result.payloads,
            result.elapsed_ms,
            result.output.stdout.len()
        );
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        if self.json {
            self.print_json(summary);
            return;
        }
        println!(
            "Run {}: {}/{} dispatched, {} completed, {} failed, {} discarded",
            if summary.stopped { "stopped" } else { "finished" },
            summary.dispatched,
            summary.total,
            summary.completed,
            summary.failed,
            summary.discarded
        );
    }
}

fn load_config(cli: &Cli) -> Result<GapfuzzConfig, anyhow::Error> {
    match &cli.config_file {
        Some(config_path) => {
            log::info!("Loading configuration from specified path: {config_path:?}");
            GapfuzzConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from("gapfuzz.toml");
            if default_config_path.exists() {
                log::info!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                GapfuzzConfig::load_from_file(&default_config_path)
            } else {
                Err(anyhow::anyhow!(
                    "No config file specified and default 'gapfuzz.toml' not found"
                ))
            }
        }
    }
}

fn apply_overrides(cli: &Cli, config: &mut GapfuzzConfig) {
    if let Some(threads) = cli.threads {
        config.fuzzer.threads = threads;
    }
    if let Some(delay_ms) = cli.delay_ms {
        config.fuzzer.delay_ms = delay_ms;
    }
    if let Some(target_cmd_str) = &cli.target_command {
        if config.executor.executor_type != ExecutorType::Command {
            log::info!("--target-command given, switching executor to 'command'");
            config.executor.executor_type = ExecutorType::Command;
        }
        let cmd_settings = config
            .executor
            .command_settings
            .get_or_insert_with(|| CommandExecutorSettings {
                timeout_ms: 2000,
                ..CommandExecutorSettings::default()
            });
        cmd_settings.command = target_cmd_str
            .split_whitespace()
            .map(str::to_string)
            .collect();
    }
}

fn spawn_console_control(control: FuzzerControl) -> Result<(), anyhow::Error> {
    thread::Builder::new()
        .name("gapfuzz-console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "p" | "pause" => {
                        control.pause();
                    }
                    "r" | "resume" => {
                        control.resume();
                    }
                    "s" | "stop" | "q" | "quit" => {
                        control.stop();
                        break;
                    }
                    "" => {}
                    other => log::warn!("Unknown command {other:?} (pause, resume, stop)"),
                }
            }
        })?;
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = load_config(&cli)?;
    apply_overrides(&cli, &mut config);
    log::debug!("Effective configuration: {config:#?}");

    let message = Arc::new(config.message.parse()?);
    let resolver = config.fuzzer.payload_resolver();
    let gaps = config.build_gaps(&message, &resolver)?;
    let settings = config.fuzzer.run_settings();
    let listener: Arc<dyn FuzzerListener> = Arc::new(ConsoleListener { json: cli.json });

    let fuzzer = match config.executor.executor_type {
        ExecutorType::DryRun => Fuzzer::new(
            gaps,
            EchoProcessFactory::new(Arc::clone(&message)),
            listener,
            settings,
        ),
        ExecutorType::Command => {
            let cmd_settings = config.executor.command_settings.as_ref().ok_or_else(|| {
                anyhow::anyhow!("Command settings missing for command executor type in config")
            })?;
            if cmd_settings.command.is_empty() {
                return Err(anyhow::anyhow!("executor.command-settings.command is empty"));
            }
            Fuzzer::new(
                gaps,
                CommandProcessFactory::new(
                    Arc::clone(&message),
                    cmd_settings.to_command_settings(),
                ),
                listener,
                settings,
            )
        }
    };

    let handle = fuzzer.start()?;
    if cli.interactive {
        spawn_console_control(handle.control())?;
    }

    let summary = handle.join()?;
    if summary.failed > 0 {
        log::warn!("{} combinations failed to execute", summary.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("gapfuzz").chain(args.iter().copied()))
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config =
            GapfuzzConfig::from_toml_str("[message]\ntemplate = \"a=§1§\"\n").unwrap();
        let args = cli(&[
            "--threads",
            "2",
            "--delay-ms",
            "15",
            "--target-command",
            "./target.sh --fast",
        ]);
        apply_overrides(&args, &mut config);

        assert_eq!(config.fuzzer.threads, 2);
        assert_eq!(config.fuzzer.delay_ms, 15);
        assert_eq!(config.executor.executor_type, ExecutorType::Command);
        let cmd = config.executor.command_settings.unwrap();
        assert_eq!(cmd.command, vec!["./target.sh", "--fast"]);
        assert_eq!(cmd.timeout_ms, 2000);
    }

    #[test]
    fn status_labels_carry_details() {
        assert_eq!(status_label(&ExecutionStatus::Ok), "ok");
        assert_eq!(
            status_label(&ExecutionStatus::Crash("Exited with code 3".to_string())),
            "crash (Exited with code 3)"
        );
    }
}
