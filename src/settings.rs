use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use directories::ProjectDirs;
use serde::Deserialize;

use crate::cli::{CliArgs, CliSources, DetectorBackend};
use crate::monitor::SchedulerConfig;
use crate::stabilizer::StabilizerConfig;

const ENV_DETECTOR: &str = "SCREENVEIL_DETECTOR";
const ENV_MODEL: &str = "SCREENVEIL_MODEL";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    detector: Option<String>,
    model: Option<String>,
    target_fps: Option<f64>,
    thresholds: Option<BTreeMap<String, f32>>,
    viewport: Option<ViewportFileConfig>,
    scheduler: Option<SchedulerFileConfig>,
    stabilizer: Option<StabilizerFileConfig>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
struct SchedulerFileConfig {
    min_interval_ms: Option<u64>,
    max_interval_ms: Option<u64>,
    interval_step_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
struct StabilizerFileConfig {
    position_tolerance: Option<f32>,
    size_tolerance: Option<f32>,
    inactivity_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
struct ViewportFileConfig {
    width: Option<u32>,
    height: Option<u32>,
    content_height: Option<f32>,
}

/// Fully-resolved runtime settings, layered CLI > environment > config
/// file > built-in defaults.
#[derive(Debug)]
pub struct EffectiveSettings {
    pub detector: DetectorBackend,
    pub model: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    pub stabilizer: StabilizerConfig,
    pub threshold_overrides: Vec<(String, f32)>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub content_height: f32,
    pub scroll_step: Option<f32>,
    pub cycles: u32,
    pub json: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: Option<PathBuf>,
        field: &'static str,
        value: String,
    },
    NotFound {
        path: PathBuf,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "failed to parse config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::InvalidValue { path, field, value } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "invalid value '{}' for '{}' in {}",
                        value,
                        field,
                        path.display()
                    )
                } else {
                    write!(f, "invalid value '{}' for '{}'", value, field)
                }
            }
            ConfigError::NotFound { path } => {
                write!(f, "config file {} does not exist", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
            ConfigError::NotFound { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct EnvOverrides {
    detector: Option<String>,
    model: Option<String>,
}

impl EnvOverrides {
    fn capture() -> Self {
        Self {
            detector: normalize_string(env::var(ENV_DETECTOR).ok()),
            model: normalize_string(env::var(ENV_MODEL).ok()),
        }
    }
}

pub fn resolve_settings(
    cli: &CliArgs,
    sources: &CliSources,
) -> Result<EffectiveSettings, ConfigError> {
    let (file, config_path) = load_config(cli.config.as_deref())?;
    merge(cli, sources, EnvOverrides::capture(), file, config_path)
}

fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        let path = path.to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        let config = read_config(&path)?;
        return Ok((config, Some(path)));
    }

    if let Some(project_path) = project_config_path() {
        if project_path.exists() {
            let config = read_config(&project_path)?;
            return Ok((config, Some(project_path)));
        }
    }

    let Some(default_path) = default_config_path() else {
        return Ok((FileConfig::default(), None));
    };
    if !default_path.exists() {
        return Ok((FileConfig::default(), None));
    }
    let config = read_config(&default_path)?;
    Ok((config, Some(default_path)))
}

fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge(
    cli: &CliArgs,
    sources: &CliSources,
    env: EnvOverrides,
    file: FileConfig,
    config_path: Option<PathBuf>,
) -> Result<EffectiveSettings, ConfigError> {
    let FileConfig {
        detector: file_detector,
        model: file_model,
        target_fps: file_target_fps,
        thresholds: file_thresholds,
        viewport: file_viewport,
        scheduler: file_scheduler,
        stabilizer: file_stabilizer,
    } = file;

    let mut detector = cli.detector;
    if !sources.detector_from_cli {
        if let Some(value) = env.detector {
            detector = parse_detector_backend(&value, None)?;
        } else if let Some(value) = normalize_string(file_detector) {
            detector = parse_detector_backend(&value, config_path.as_ref())?;
        }
    }

    let mut model = cli.model.clone();
    if !sources.model_from_cli {
        if let Some(value) = env.model {
            model = Some(PathBuf::from(value));
        } else if let Some(value) = normalize_string(file_model) {
            model = Some(PathBuf::from(value));
        }
    }

    let mut target_fps = cli.target_fps;
    if !sources.target_fps_from_cli {
        if let Some(value) = file_target_fps {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidValue {
                    path: config_path,
                    field: "target_fps",
                    value: value.to_string(),
                });
            }
            target_fps = value;
        }
    }

    let mut scheduler = SchedulerConfig {
        target_fps,
        ..SchedulerConfig::default()
    };
    if let Some(section) = file_scheduler {
        if let Some(value) = section.min_interval_ms {
            scheduler.min_interval = Duration::from_millis(value);
        }
        if let Some(value) = section.max_interval_ms {
            scheduler.max_interval = Duration::from_millis(value);
        }
        if let Some(value) = section.interval_step_ms {
            scheduler.interval_step = Duration::from_millis(value);
        }
    }
    if scheduler.min_interval.is_zero()
        || scheduler.interval_step.is_zero()
        || scheduler.min_interval > scheduler.max_interval
    {
        return Err(ConfigError::InvalidValue {
            path: config_path,
            field: "scheduler",
            value: format!(
                "min {:?} / max {:?} / step {:?}",
                scheduler.min_interval, scheduler.max_interval, scheduler.interval_step
            ),
        });
    }
    scheduler.initial_interval = scheduler
        .initial_interval
        .clamp(scheduler.min_interval, scheduler.max_interval);

    let mut stabilizer = StabilizerConfig::default();
    if let Some(section) = file_stabilizer {
        if let Some(value) = section.position_tolerance {
            stabilizer.position_tolerance = value;
        }
        if let Some(value) = section.size_tolerance {
            stabilizer.size_tolerance = value;
        }
        if let Some(value) = section.inactivity_timeout_ms {
            stabilizer.inactivity_timeout = Duration::from_millis(value);
        }
    }
    if !(stabilizer.position_tolerance.is_finite() && stabilizer.position_tolerance >= 0.0)
        || !(stabilizer.size_tolerance.is_finite() && stabilizer.size_tolerance >= 0.0)
    {
        return Err(ConfigError::InvalidValue {
            path: config_path,
            field: "stabilizer",
            value: format!(
                "position {} / size {}",
                stabilizer.position_tolerance, stabilizer.size_tolerance
            ),
        });
    }

    // File-level thresholds apply first so CLI overrides win on conflict.
    let mut threshold_overrides = Vec::new();
    if let Some(table) = file_thresholds {
        for (class, value) in table {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    path: config_path,
                    field: "thresholds",
                    value: format!("{class}={value}"),
                });
            }
            threshold_overrides.push((class, value));
        }
    }
    for raw in &cli.thresholds {
        threshold_overrides.push(parse_threshold_override(raw)?);
    }

    let viewport = file_viewport.unwrap_or_default();
    let viewport_width = if sources.width_from_cli {
        cli.width
    } else {
        viewport.width.unwrap_or(cli.width)
    };
    let viewport_height = if sources.height_from_cli {
        cli.height
    } else {
        viewport.height.unwrap_or(cli.height)
    };
    if viewport_width == 0 || viewport_height == 0 {
        return Err(ConfigError::InvalidValue {
            path: config_path,
            field: "viewport",
            value: format!("{viewport_width}x{viewport_height}"),
        });
    }
    let content_height = viewport
        .content_height
        .unwrap_or(viewport_height as f32 * 4.0);

    Ok(EffectiveSettings {
        detector,
        model,
        scheduler,
        stabilizer,
        threshold_overrides,
        viewport_width,
        viewport_height,
        content_height,
        scroll_step: cli.scroll_step,
        cycles: cli.cycles,
        json: cli.json,
    })
}

fn parse_threshold_override(raw: &str) -> Result<(String, f32), ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        path: None,
        field: "threshold",
        value: raw.to_string(),
    };
    let (class, value) = raw.split_once('=').ok_or_else(invalid)?;
    let class = class.trim();
    let value: f32 = value.trim().parse().map_err(|_| invalid())?;
    if class.is_empty() || !(0.0..=1.0).contains(&value) {
        return Err(invalid());
    }
    Ok((class.to_string(), value))
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "screenveil", "screenveil")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    env::current_dir().ok().map(|dir| dir.join("screenveil.toml"))
}

fn normalize_string(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_detector_backend(
    value: &str,
    path: Option<&PathBuf>,
) -> Result<DetectorBackend, ConfigError> {
    DetectorBackend::from_str(value, true).map_err(|_| ConfigError::InvalidValue {
        path: path.cloned(),
        field: "detector",
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_defaults() -> CliArgs {
        CliArgs {
            detector: DetectorBackend::Mock,
            config: None,
            model: None,
            target_fps: 10.0,
            thresholds: Vec::new(),
            scroll_step: None,
            cycles: 50,
            json: false,
            width: 1280,
            height: 720,
        }
    }

    #[test]
    fn file_values_fill_in_when_cli_uses_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            detector = "onnx"
            model = "weights/guard.onnx"
            target_fps = 8.0

            [thresholds]
            violence = 0.9

            [viewport]
            width = 1920
            height = 1080
            content_height = 6000.0
            "#,
        )
        .unwrap();

        let settings = merge(&cli_defaults(), &CliSources::default(), EnvOverrides::default(), file, None).unwrap();
        assert_eq!(settings.detector, DetectorBackend::Onnx);
        assert_eq!(settings.model.as_deref(), Some(Path::new("weights/guard.onnx")));
        assert_eq!(settings.scheduler.target_fps, 8.0);
        assert_eq!(
            settings.threshold_overrides,
            vec![("violence".to_string(), 0.9)]
        );
        assert_eq!(settings.viewport_width, 1920);
        assert_eq!(settings.content_height, 6000.0);
    }

    #[test]
    fn cli_detector_beats_file_detector() {
        let file: FileConfig = toml::from_str("detector = \"onnx\"").unwrap();
        let sources = CliSources {
            detector_from_cli: true,
            ..CliSources::default()
        };
        let settings = merge(&cli_defaults(), &sources, EnvOverrides::default(), file, None).unwrap();
        assert_eq!(settings.detector, DetectorBackend::Mock);
    }

    #[test]
    fn detector_names_parse_case_insensitively() {
        let file: FileConfig = toml::from_str("detector = \"Onnx\"").unwrap();
        let settings =
            merge(&cli_defaults(), &CliSources::default(), EnvOverrides::default(), file, None)
                .unwrap();
        assert_eq!(settings.detector, DetectorBackend::Onnx);

        let env = EnvOverrides {
            detector: Some("ONNX".to_string()),
            model: None,
        };
        let settings =
            merge(&cli_defaults(), &CliSources::default(), env, FileConfig::default(), None)
                .unwrap();
        assert_eq!(settings.detector, DetectorBackend::Onnx);
    }

    #[test]
    fn cli_viewport_beats_file_viewport() {
        let file: FileConfig = toml::from_str("[viewport]\nwidth = 1920\nheight = 1080").unwrap();
        let mut cli = cli_defaults();
        cli.width = 1600;
        let sources = CliSources {
            width_from_cli: true,
            ..CliSources::default()
        };
        let settings = merge(&cli, &sources, EnvOverrides::default(), file, None).unwrap();
        assert_eq!(settings.viewport_width, 1600);
        // Height was not given on the command line, so the file wins there.
        assert_eq!(settings.viewport_height, 1080);
    }

    #[test]
    fn cli_threshold_overrides_append_after_file_entries() {
        let file: FileConfig = toml::from_str("[thresholds]\nadult = 0.5").unwrap();
        let mut cli = cli_defaults();
        cli.thresholds = vec!["adult=0.7".to_string()];
        let settings = merge(&cli, &CliSources::default(), EnvOverrides::default(), file, None).unwrap();
        assert_eq!(
            settings.threshold_overrides,
            vec![("adult".to_string(), 0.5), ("adult".to_string(), 0.7)]
        );
    }

    #[test]
    fn out_of_range_file_threshold_is_rejected() {
        let file: FileConfig = toml::from_str("[thresholds]\ngore = 1.5").unwrap();
        let err = merge(&cli_defaults(), &CliSources::default(), EnvOverrides::default(), file, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "thresholds", .. }));
    }

    #[test]
    fn scheduler_and_stabilizer_sections_apply() {
        let file: FileConfig = toml::from_str(
            r#"
            [scheduler]
            min_interval_ms = 40
            max_interval_ms = 300
            interval_step_ms = 20

            [stabilizer]
            position_tolerance = 12.0
            inactivity_timeout_ms = 5000
            "#,
        )
        .unwrap();
        let settings =
            merge(&cli_defaults(), &CliSources::default(), EnvOverrides::default(), file, None)
                .unwrap();
        assert_eq!(settings.scheduler.min_interval, Duration::from_millis(40));
        assert_eq!(settings.scheduler.max_interval, Duration::from_millis(300));
        assert_eq!(settings.scheduler.interval_step, Duration::from_millis(20));
        assert_eq!(settings.stabilizer.position_tolerance, 12.0);
        assert_eq!(
            settings.stabilizer.inactivity_timeout,
            Duration::from_millis(5000)
        );
        // Untouched fields keep their defaults.
        assert_eq!(settings.stabilizer.size_tolerance, 0.3);
    }

    #[test]
    fn inverted_scheduler_bounds_are_rejected() {
        let file: FileConfig =
            toml::from_str("[scheduler]\nmin_interval_ms = 300\nmax_interval_ms = 100").unwrap();
        let err =
            merge(&cli_defaults(), &CliSources::default(), EnvOverrides::default(), file, None)
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "scheduler", .. }));
    }

    #[test]
    fn malformed_threshold_flag_is_rejected() {
        let mut cli = cli_defaults();
        cli.thresholds = vec!["violence".to_string()];
        let err = merge(&cli, &CliSources::default(), EnvOverrides::default(), FileConfig::default(), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "threshold", .. }));
    }
}
