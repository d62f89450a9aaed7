use crate::fuzzer::{RunSettings, default_queue_depth, default_threads};
use crate::gap::GapSet;
use crate::location::Span;
use crate::message::{DEFAULT_MARKER, MarkedMessage};
use crate::payload::{DEFAULT_REGEX_DEPTH, DEFAULT_REGEX_LIMIT, Payload, PayloadResolver};
use crate::transport::{CommandSettings, InputDelivery};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CommandExecutorSettings {
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    2000
}

impl CommandExecutorSettings {
    pub fn to_command_settings(&self) -> CommandSettings {
        CommandSettings {
            command: self.command.clone(),
            input_delivery: match &self.input_delivery {
                ConfigInputDelivery::StdIn => InputDelivery::StdIn,
                ConfigInputDelivery::File { template } => InputDelivery::File(template.clone()),
            },
            timeout: Duration::from_millis(self.timeout_ms),
            working_dir: self.working_dir.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorType {
    #[default]
    DryRun,
    Command,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub executor_type: ExecutorType,
    #[serde(default)]
    pub command_settings: Option<CommandExecutorSettings>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_regex_depth")]
    pub regex_depth: usize,
    #[serde(default = "default_regex_limit")]
    pub regex_limit: usize,
}

fn default_regex_depth() -> usize {
    DEFAULT_REGEX_DEPTH
}

fn default_regex_limit() -> usize {
    DEFAULT_REGEX_LIMIT
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            delay_ms: 0,
            queue_depth: default_queue_depth(),
            regex_depth: default_regex_depth(),
            regex_limit: default_regex_limit(),
        }
    }
}

impl FuzzerSettings {
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            threads: self.threads.max(1),
            delay: Duration::from_millis(self.delay_ms),
            queue_depth: self.queue_depth,
        }
    }

    pub fn payload_resolver(&self) -> PayloadResolver {
        PayloadResolver::new().with_regex_defaults(self.regex_depth, self.regex_limit)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MessageConfig {
    pub template: Option<String>,
    pub template_file: Option<PathBuf>,
    #[serde(default = "default_marker")]
    pub marker: String,
}

pub fn default_marker() -> String {
    DEFAULT_MARKER.to_string()
}

impl MessageConfig {
    pub fn load_template(&self) -> Result<String, anyhow::Error> {
        match (&self.template, &self.template_file) {
            (Some(template), None) => Ok(template.clone()),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read message template at {:?}: {}", path, e)
            }),
            (Some(_), Some(_)) => Err(anyhow::anyhow!(
                "Set either message.template or message.template-file, not both"
            )),
            (None, None) => Err(anyhow::anyhow!(
                "Missing message.template or message.template-file"
            )),
        }
    }

    pub fn parse(&self) -> Result<MarkedMessage, anyhow::Error> {
        let template = self.load_template()?;
        MarkedMessage::parse(&template, &self.marker)
            .map_err(|e| anyhow::anyhow!("Invalid message template: {}", e))
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GapConfig {
    #[serde(default)]
    pub payloads: Vec<Payload>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GapfuzzConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    pub message: MessageConfig,
    #[serde(default)]
    pub gaps: Vec<GapConfig>,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl GapfuzzConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, anyhow::Error> {
        Ok(toml::from_str(content)?)
    }

    /// Resolves every configured payload and attaches the literals to the
    /// message's gaps, in order.
    pub fn build_gaps(
        &self,
        message: &MarkedMessage,
        resolver: &PayloadResolver,
    ) -> Result<GapSet<Span>, anyhow::Error> {
        if self.gaps.len() != message.gaps().len() {
            return Err(anyhow::anyhow!(
                "Message has {} marked gaps but {} [[gaps]] entries are configured",
                message.gaps().len(),
                self.gaps.len()
            ));
        }

        let mut gaps = message.gap_set()?;
        for (index, gap_config) in self.gaps.iter().enumerate() {
            let literals = resolver
                .resolve_all(&gap_config.payloads)
                .map_err(|e| anyhow::anyhow!("Gap #{index}: {e}"))?;
            if literals.is_empty() {
                log::warn!("Gap #{index} has no payloads; the run will be empty");
            }
            if let Some(gap) = gaps.get_mut(index) {
                gap.extend_payloads(literals);
            }
        }
        Ok(gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
[fuzzer]
threads = 8
delay-ms = 25
regex-depth = 2

[message]
template = "user=§admin§&pin=§0000§"

[[gaps]]
payloads = [
    { value = "root" },
    { value = "guest", length = 3 },
]

[[gaps]]
payloads = [{ kind = "regex", value = "[0-2]" }]

[executor]
executor-type = "command"

[executor.command-settings]
command = ["./target.sh", "--verbose"]
input-delivery = { file = { template = "--input={}" } }
timeout-ms = 500
"#;

    #[test]
    fn full_config_parses() {
        let config = GapfuzzConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.fuzzer.threads, 8);
        assert_eq!(config.fuzzer.queue_depth, 64);
        assert_eq!(config.fuzzer.regex_limit, DEFAULT_REGEX_LIMIT);
        assert_eq!(config.executor.executor_type, ExecutorType::Command);

        let run = config.fuzzer.run_settings();
        assert_eq!(run.delay, Duration::from_millis(25));

        let command = config
            .executor
            .command_settings
            .as_ref()
            .unwrap()
            .to_command_settings();
        assert_eq!(command.command, vec!["./target.sh", "--verbose"]);
        assert_eq!(
            command.input_delivery,
            InputDelivery::File("--input={}".to_string())
        );
        assert_eq!(command.timeout, Duration::from_millis(500));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = GapfuzzConfig::from_toml_str("[message]\ntemplate = \"ping\"\n").unwrap();
        assert_eq!(config.fuzzer.threads, default_threads());
        assert_eq!(config.fuzzer.delay_ms, 0);
        assert_eq!(config.message.marker, DEFAULT_MARKER);
        assert_eq!(config.executor.executor_type, ExecutorType::DryRun);
        assert!(config.gaps.is_empty());
    }

    #[test]
    fn zero_threads_becomes_one() {
        let settings = FuzzerSettings {
            threads: 0,
            ..FuzzerSettings::default()
        };
        assert_eq!(settings.run_settings().threads, 1);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = GapfuzzConfig::from_toml_str("[message]\ntemplate = \"x\"\ncolour = 1\n");
        assert!(err.is_err());
    }

    #[test]
    fn build_gaps_resolves_payloads_in_order() {
        let config = GapfuzzConfig::from_toml_str(FULL).unwrap();
        let message = config.message.parse().unwrap();
        let gaps = config
            .build_gaps(&message, &config.fuzzer.payload_resolver())
            .unwrap();

        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps.as_slice()[0].payloads(), ["root", "gue"]);
        assert_eq!(gaps.as_slice()[1].payloads(), ["0", "1", "2"]);
        assert_eq!(*gaps.as_slice()[1].location(), Span::new(15, 19));
    }

    #[test]
    fn demo_config_builds() {
        let config =
            GapfuzzConfig::from_toml_str(include_str!("../../demos/login.toml")).unwrap();
        let message = config.message.parse().unwrap();
        let gaps = config
            .build_gaps(&message, &config.fuzzer.payload_resolver())
            .unwrap();
        let cardinalities: Vec<usize> = gaps.iter().map(|g| g.cardinality()).collect();
        assert_eq!(cardinalities, vec![3, 5, 3]);
        assert_eq!(gaps.as_slice()[2].payloads(), ["00", "01", "02"]);
    }

    #[test]
    fn build_gaps_checks_gap_count() {
        let config =
            GapfuzzConfig::from_toml_str("[message]\ntemplate = \"a=§1§\"\n").unwrap();
        let message = config.message.parse().unwrap();
        let err = config
            .build_gaps(&message, &PayloadResolver::new())
            .unwrap_err();
        assert!(err.to_string().contains("1 marked gaps but 0"));
    }

    #[test]
    fn template_file_and_custom_marker() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "GET /?q=$abc$ HTTP/1.1").unwrap();

        let config = MessageConfig {
            template: None,
            template_file: Some(file.path().to_path_buf()),
            marker: "$".to_string(),
        };
        let message = config.parse().unwrap();
        assert_eq!(message.text(), "GET /?q=abc HTTP/1.1");
        assert_eq!(message.gaps(), [Span::new(8, 11)]);
    }

    #[test]
    fn template_source_must_be_unique() {
        let both = MessageConfig {
            template: Some("a".to_string()),
            template_file: Some(PathBuf::from("b")),
            marker: default_marker(),
        };
        assert!(both.load_template().is_err());

        let neither = MessageConfig {
            template: None,
            template_file: None,
            marker: default_marker(),
        };
        assert!(neither.load_template().is_err());
    }

    #[test]
    fn load_from_file_reports_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not = [valid").unwrap();
        let err = GapfuzzConfig::load_from_file(&file.path().to_path_buf()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML"));

        let missing = GapfuzzConfig::load_from_file(&PathBuf::from("/nonexistent/gapfuzz.toml"));
        assert!(missing.is_err());
    }
}
