// Launch Arguments
// Process-wide command line switches read once at startup

use std::sync::OnceLock;

use crate::models::Settings;
use crate::services::MultitrackVideoError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchArgs {
    /// `--config-url <url>` (or `--config-url=<url>`)
    pub config_url: Option<String>,
    /// `--enable-multitrack-video-dev`
    pub multitrack_video_dev: bool,
    /// First positional argument, used as the command name by the binary
    pub command: Option<String>,
}

static LAUNCH_ARGS: OnceLock<LaunchArgs> = OnceLock::new();

impl LaunchArgs {
    /// Parse arguments (without the program name)
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = LaunchArgs::default();
        let mut iter = args.into_iter().map(Into::into);
        while let Some(arg) = iter.next() {
            if arg == "--config-url" {
                parsed.config_url = iter.next();
            } else if let Some(url) = arg.strip_prefix("--config-url=") {
                parsed.config_url = Some(url.to_string());
            } else if arg == "--enable-multitrack-video-dev" {
                parsed.multitrack_video_dev = true;
            } else if !arg.starts_with("--") && parsed.command.is_none() {
                parsed.command = Some(arg);
            } else {
                log::debug!("Ignoring unknown argument: {arg}");
            }
        }
        parsed
    }

    /// Store the process arguments. Later calls return the first value.
    pub fn init<I, S>(args: I) -> &'static LaunchArgs
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LAUNCH_ARGS.get_or_init(|| Self::parse(args))
    }
}

/// The go-live URL: command line override first, then the service setting
pub fn resolve_config_url(args: &LaunchArgs, settings: &Settings) -> Result<String, MultitrackVideoError> {
    if let Some(url) = args.config_url.as_deref().filter(|url| !url.is_empty()) {
        log::info!("Using go-live config URL from command line: {url}");
        return Ok(url.to_string());
    }
    let url = settings.multitrack_video_configuration_url.trim();
    if url.is_empty() {
        return Err(MultitrackVideoError::MissingConfigUrl);
    }
    Ok(url.to_string())
}
