use calib_ar::{
    run_app, AppConfig, CliArgs, CombinedCommands, InterruptCommands, ScriptedCommands,
    StdinCommands, INSTRUCTIONS,
};
use clap::Parser;
use std::error::Error;
use std::process::ExitCode;

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

fn init_logging(config: &AppConfig) -> Result<(), Box<dyn Error>> {
    let level = config.level_filter();
    #[cfg(feature = "tracing")]
    {
        let _ = LogTracer::init();
        calib_ar::core::init_tracing(&level.to_string().to_ascii_lowercase());
    }
    #[cfg(not(feature = "tracing"))]
    calib_ar::core::init_with_level(level)?;
    Ok(())
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let config = CliArgs::parse().into_config()?;
    init_logging(&config)?;
    log::info!("calib-ar {}", env!("CARGO_PKG_VERSION"));
    log::info!("configuration: {config:?}");

    println!("{INSTRUCTIONS}");

    let commands = CombinedCommands::new()
        .with(StdinCommands::spawn())
        .with(ScriptedCommands::from_frame_counts(config.calibrate_after, config.quit_after))
        .with(InterruptCommands::install()?);

    let summary = run_app(&config, Box::new(commands))?;
    println!(
        "frames: {}, detections: {}, samples: {}, poses: {}, state: {:?}",
        summary.frames,
        summary.detections,
        summary.samples_retained,
        summary.poses_found,
        summary.final_state
    );
    Ok(())
}

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
