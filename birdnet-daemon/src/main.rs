//! `birdnetd` — headless entry point for the realtime bird-detection
//! pipeline (SPEC_FULL §1, §6). Builds a [`Settings`] snapshot from the
//! environment, wires up tracing, and runs the [`Supervisor`] to
//! completion, mapping the outcome onto the process exit codes SPEC_FULL
//! §6 defines: `0` clean shutdown, `1` unrecoverable error, `2` invalid
//! configuration.

use std::process::ExitCode;

use birdnet_core::config::Settings;
use birdnet_core::Supervisor;
use tracing::{error, info};

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG_INVALID: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "birdnetd=info,birdnet_core=info".parse().unwrap()),
        )
        .init();

    info!("birdnetd starting");

    let settings = Settings::from_env();
    if let Err(reason) = validate(&settings) {
        error!(reason, "invalid configuration");
        return ExitCode::from(EXIT_CONFIG_INVALID);
    }

    let startup_fail_delay = settings.startup_fail_delay;
    let supervisor = Supervisor::new(settings);

    match supervisor.run().await {
        Ok(()) => {
            info!("birdnetd shut down cleanly");
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            error!(error = %e, "birdnetd exiting after unrecoverable error");
            // Gives an external process supervisor (systemd, docker) a
            // moment before the inevitable restart, rather than spinning a
            // crash loop hot (SPEC_FULL §6, `BIRDNET_STARTUP_FAIL_DELAY`).
            if !startup_fail_delay.is_zero() {
                tokio::time::sleep(startup_fail_delay).await;
            }
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Minimal sanity checks SPEC_FULL §6 requires before startup proceeds. A
/// configuration with zero sources is valid (SPEC_FULL §8: the supervisor
/// starts bus/sinks/watchdog, produces no detections, and exits cleanly on
/// signal) so it is not rejected here.
fn validate(settings: &Settings) -> Result<(), &'static str> {
    if settings.inference.worker_threads == 0 {
        return Err("inference.worker_threads must be at least 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_empty_source_list() {
        // SPEC_FULL §8: zero sources is a valid boundary configuration, not
        // a config error.
        let settings = Settings::default();
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn accepts_one_local_source() {
        let mut settings = Settings::default();
        settings.sources.push(birdnet_core::config::SourceSettings::Local {
            id: "mic0".into(),
            device: None,
        });
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn rejects_zero_worker_threads() {
        let mut settings = Settings::default();
        settings.inference.worker_threads = 0;
        assert!(validate(&settings).is_err());
    }
}
