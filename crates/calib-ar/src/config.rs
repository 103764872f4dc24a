//! Startup configuration.
//!
//! Built once before the frame loop and never changed afterwards: defaults,
//! then an optional JSON file, then command-line flags.

use crate::accumulator::AccumulatorParams;
use crate::source::SyntheticSourceParams;
use calib_ar_chessboard::ChessboardParams;
use calib_ar_core::{CheckerboardSpec, PatternError};
use calib_ar_solver::{CalibrationOptions, PnpRansacParams};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid grid size")]
    Pattern(#[from] PatternError),
    #[error("{0}")]
    Invalid(String),
}

/// Log verbosity, named the way the command line and config files spell it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[serde(alias = "notset")]
    #[cfg_attr(feature = "cli", value(name = "notset"))]
    NotSet,
    #[serde(alias = "debug")]
    Debug,
    #[default]
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "warning", alias = "warn", alias = "WARN")]
    #[cfg_attr(feature = "cli", value(alias = "warn"))]
    Warning,
    #[serde(alias = "error")]
    Error,
    #[serde(alias = "critical")]
    Critical,
}

impl LogLevel {
    /// `NOTSET` shows everything; `CRITICAL` maps onto `log`'s error level.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::NotSet => LevelFilter::Trace,
            Self::Debug => LevelFilter::Debug,
            Self::Info => LevelFilter::Info,
            Self::Warning => LevelFilter::Warn,
            Self::Error | Self::Critical => LevelFilter::Error,
        }
    }
}

/// Everything the per-frame pipeline needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Inner corners as `(columns, rows)`.
    pub grid_size: (u32, u32),
    pub square_size: f64,
    /// Cube edge in board units.
    pub cube_side: f64,
    pub detector: ChessboardParams,
    pub accumulator: AccumulatorParams,
    pub calibration: CalibrationOptions,
    pub pnp: PnpRansacParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grid_size: (6, 5),
            square_size: 1.0,
            cube_side: 3.0,
            detector: ChessboardParams::default(),
            accumulator: AccumulatorParams::default(),
            calibration: CalibrationOptions::default(),
            pnp: PnpRansacParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn pattern(&self) -> Result<CheckerboardSpec, PatternError> {
        CheckerboardSpec::new(self.grid_size.0, self.grid_size.1)?.with_square_size(self.square_size)
    }
}

/// Application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of frames or a still image; the synthetic source when absent.
    pub video_file: Option<PathBuf>,
    /// Directory receiving the recorded PNG frames.
    pub output_path: Option<PathBuf>,
    /// Record composited frames instead of the raw input stream.
    pub record_composited: bool,
    pub log_level: LogLevel,
    /// Issue a calibrate command at this frame (1-based).
    pub calibrate_after: Option<u64>,
    /// Issue a quit command at this frame (1-based).
    pub quit_after: Option<u64>,
    pub synthetic: SyntheticSourceParams,
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            video_file: None,
            output_path: None,
            record_composited: false,
            log_level: LogLevel::Info,
            calibrate_after: None,
            quit_after: None,
            synthetic: SyntheticSourceParams::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.level_filter()
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.pattern()?;
        if !(self.pipeline.cube_side.is_finite() && self.pipeline.cube_side > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "cube_side must be finite and > 0 (got {})",
                self.pipeline.cube_side
            )));
        }
        if self.pipeline.accumulator.sampling_period == 0 {
            return Err(ConfigError::Invalid("sampling_period must be at least 1".into()));
        }
        if let Some(s) = self.pipeline.detector.detection_scale {
            if !(s > 0.0 && s <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "detection_scale must be in (0, 1] (got {s})"
                )));
            }
        }
        let pnp = &self.pipeline.pnp;
        if !(pnp.reprojection_threshold.is_finite() && pnp.reprojection_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "reprojection_threshold must be finite and > 0 (got {})",
                pnp.reprojection_threshold
            )));
        }
        if self.video_file.is_none() && (self.synthetic.width < 16 || self.synthetic.height < 16) {
            return Err(ConfigError::Invalid(format!(
                "synthetic frames of {}x{} are too small",
                self.synthetic.width, self.synthetic.height
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "cli")]
pub use cli::CliArgs;

#[cfg(feature = "cli")]
mod cli {
    use super::{AppConfig, ConfigError, LogLevel};
    use clap::Parser;
    use std::path::PathBuf;

    /// Live checkerboard calibration and augmented-reality demo.
    ///
    /// Wave the board at the camera, type `c` + Enter to calibrate, then watch
    /// the cube track the board. `q` + Enter (or Ctrl-C) quits.
    #[derive(Debug, Parser)]
    #[command(name = "calib-ar", author, version, about, long_about = None)]
    pub struct CliArgs {
        /// Directory of frames or a still image; a synthetic board stream when omitted.
        #[arg(value_name = "VIDEO_FILE")]
        pub video_file: Option<PathBuf>,

        /// Record the input stream as PNG frames into this directory.
        #[arg(short, long, value_name = "DIR")]
        pub output: Option<PathBuf>,

        /// Inner-corner grid size.
        #[arg(short, long, num_args = 2, value_names = ["COLUMNS", "ROWS"])]
        pub grid_size: Option<Vec<u32>>,

        /// Log level.
        #[arg(short, long, value_name = "LEVEL", value_enum, ignore_case = true)]
        pub log: Option<LogLevel>,

        /// JSON configuration file; flags override its values.
        #[arg(long, value_name = "FILE")]
        pub config: Option<PathBuf>,

        /// Calibrate automatically at this frame.
        #[arg(long, value_name = "N")]
        pub calibrate_after: Option<u64>,

        /// Quit automatically at this frame.
        #[arg(long, value_name = "N")]
        pub quit_after: Option<u64>,

        /// Length of the synthetic board stream.
        #[arg(long, value_name = "N")]
        pub synthetic_frames: Option<u64>,

        /// Run corner detection on a frame scaled by this factor.
        #[arg(long, value_name = "S")]
        pub detection_scale: Option<f64>,

        /// Record composited frames instead of the raw input.
        #[arg(long)]
        pub record_composited: bool,
    }

    impl CliArgs {
        /// Defaults, then `--config`, then the remaining flags.
        pub fn into_config(self) -> Result<AppConfig, ConfigError> {
            let mut cfg = match &self.config {
                Some(path) => AppConfig::from_json_file(path)?,
                None => AppConfig::default(),
            };
            if let Some(path) = self.video_file {
                cfg.video_file = Some(path);
            }
            if let Some(path) = self.output {
                cfg.output_path = Some(path);
            }
            if let Some(grid) = self.grid_size {
                if let [columns, rows] = grid[..] {
                    cfg.pipeline.grid_size = (columns, rows);
                }
            }
            if let Some(level) = self.log {
                cfg.log_level = level;
            }
            if self.calibrate_after.is_some() {
                cfg.calibrate_after = self.calibrate_after;
            }
            if self.quit_after.is_some() {
                cfg.quit_after = self.quit_after;
            }
            if let Some(n) = self.synthetic_frames {
                cfg.synthetic.frames = n;
            }
            if self.detection_scale.is_some() {
                cfg.pipeline.detector.detection_scale = self.detection_scale;
            }
            if self.record_composited {
                cfg.record_composited = true;
            }
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.pipeline.grid_size, (6, 5));
        assert_eq!(cfg.pipeline.accumulator.sampling_period, 30);
        assert_eq!(cfg.level_filter(), LevelFilter::Info);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"log_level": "DEBUG", "pipeline": {"grid_size": [9, 6], "pnp": {"min_inliers": 10}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.pipeline.grid_size, (9, 6));
        assert_eq!(cfg.pipeline.pnp.min_inliers, 10);
        assert_eq!(cfg.pipeline.pnp.reprojection_threshold, 8.0);
        assert_eq!(cfg.pipeline.cube_side, 3.0);
        assert_eq!(cfg.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn log_levels_parse_in_either_case() {
        for (name, level) in [
            ("NOTSET", LevelFilter::Trace),
            ("warning", LevelFilter::Warn),
            ("WARN", LevelFilter::Warn),
            ("CRITICAL", LevelFilter::Error),
        ] {
            let cfg: AppConfig = serde_json::from_str(&format!(r#"{{"log_level": "{name}"}}"#)).unwrap();
            assert_eq!(cfg.level_filter(), level, "{name}");
        }
        assert!(serde_json::from_str::<AppConfig>(r#"{"log_level": "loud"}"#).is_err());
    }

    #[test]
    fn unknown_log_level_in_a_file_fails_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"log_level": "LOUD"}"#).unwrap();
        let err = AppConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[test]
    fn rejects_bad_settings() {
        let mut cfg = AppConfig::default();
        cfg.pipeline.grid_size = (1, 5);
        assert!(matches!(cfg.validate(), Err(ConfigError::Pattern(_))));

        let mut cfg = AppConfig::default();
        cfg.pipeline.detector.detection_scale = Some(1.5);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = AppConfig::default();
        cfg.pipeline.accumulator.sampling_period = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let err = AppConfig::from_json_file(Path::new("/no/such/config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn flags_override_the_config_file() {
        use clap::Parser;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(
            &path,
            r#"{"log_level": "warning", "quit_after": 50, "pipeline": {"grid_size": [7, 4]}}"#,
        )
        .unwrap();

        let args = CliArgs::try_parse_from([
            "calib-ar",
            "frames",
            "--config",
            path.to_str().unwrap(),
            "-g",
            "9",
            "6",
            "--calibrate-after",
            "10",
            "--detection-scale",
            "0.5",
        ])
        .unwrap();
        let cfg = args.into_config().unwrap();

        assert_eq!(cfg.video_file, Some(PathBuf::from("frames")));
        assert_eq!(cfg.pipeline.grid_size, (9, 6));
        assert_eq!(cfg.log_level, LogLevel::Warning);
        assert_eq!(cfg.quit_after, Some(50));
        assert_eq!(cfg.calibrate_after, Some(10));
        assert_eq!(cfg.pipeline.detector.detection_scale, Some(0.5));
        assert!(!cfg.record_composited);
    }

    #[cfg(feature = "cli")]
    #[test]
    fn log_flag_is_checked_while_parsing() {
        use clap::Parser;
        let args = CliArgs::try_parse_from(["calib-ar", "--log", "DEBUG"]).unwrap();
        assert_eq!(args.log, Some(LogLevel::Debug));
        let args = CliArgs::try_parse_from(["calib-ar", "-l", "notset"]).unwrap();
        assert_eq!(args.log, Some(LogLevel::NotSet));
        assert!(CliArgs::try_parse_from(["calib-ar", "--log", "LOUD"]).is_err());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn grid_size_takes_two_values() {
        use clap::Parser;
        assert!(CliArgs::try_parse_from(["calib-ar", "-g", "6"]).is_err());
        let cfg = CliArgs::try_parse_from(["calib-ar"]).unwrap().into_config().unwrap();
        assert_eq!(cfg.pipeline.grid_size, (6, 5));
        assert!(cfg.video_file.is_none());
    }
}
