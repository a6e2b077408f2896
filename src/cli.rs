use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use url::Url;

use crate::server::{resolve_build, Credentials, ServerContext};
use crate::streamer::StreamConfig;

/// Immutable configuration used by the application runtime
#[derive(Debug, Clone)]
pub struct Config {
    pub builds: Vec<Url>,
    pub server: ServerContext,
    pub stream: StreamConfig,
    pub regex: Option<String>,
    pub plain: bool,
    pub log_dir: PathBuf,
}

/// User-facing CLI arguments (kept private to the CLI layer)
#[derive(Parser, Debug)]
#[command(name = "jtail", version, about = "Follow Jenkins build console output live")]
struct Args {
    /// Builds to follow: build URLs, paths like `job/app/42`, or `folder/app#42`
    #[arg(value_name = "BUILD", num_args = 1.., required = true)]
    builds: Vec<String>,

    /// Jenkins base URL; relative build references are resolved against it
    #[arg(short = 's', long = "server", env = "JENKINS_URL")]
    server: Option<String>,

    /// User name for basic auth
    #[arg(short = 'u', long = "user", env = "JENKINS_USER")]
    user: Option<String>,

    /// API token (or password) for basic auth
    #[arg(short = 't', long = "token", env = "JENKINS_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Seconds to wait between polls while a build is still running
    #[arg(short = 'i', long = "interval", default_value_t = 3)]
    interval: u64,

    /// Per-request timeout in seconds
    #[arg(long = "timeout", default_value_t = 30)]
    timeout: u64,

    /// Regex to highlight in the console (case-insensitive)
    #[arg(short = 'r', long = "regex")]
    regex: Option<String>,

    /// Print raw console text to stdout instead of opening the viewer
    #[arg(long = "plain")]
    plain: bool,

    /// Directory for jtail's own log file (defaults to the system temp dir)
    #[arg(long = "log-dir")]
    log_dir: Option<PathBuf>,
}

/// Parse CLI options into an application Config
pub fn parse() -> Result<Config> {
    into_config(Args::parse())
}

#[cfg(test)]
fn parse_from<I, T>(args: I) -> Result<Config>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    into_config(Args::try_parse_from(args)?)
}

fn into_config(args: Args) -> Result<Config> {
    if args.interval == 0 {
        bail!("--interval must be at least 1 second");
    }
    if args.timeout == 0 {
        bail!("--timeout must be at least 1 second");
    }

    let base_url = args
        .server
        .as_deref()
        .map(|s| Url::parse(s.trim()).with_context(|| format!("invalid server URL `{s}`")))
        .transpose()?;

    let credentials = match (args.user, args.token) {
        (Some(username), Some(token)) => Some(Credentials { username, token }),
        (None, None) => None,
        (Some(_), None) => bail!("--user given without --token"),
        (None, Some(_)) => bail!("--token given without --user"),
    };

    let builds = args
        .builds
        .iter()
        .map(|b| resolve_build(base_url.as_ref(), b))
        .collect::<Result<Vec<_>>>()?;

    Ok(Config {
        builds,
        server: ServerContext {
            base_url,
            credentials,
            request_timeout: Duration::from_secs(args.timeout),
        },
        stream: StreamConfig {
            poll_interval: Duration::from_secs(args.interval),
        },
        regex: args.regex,
        plain: args.plain,
        log_dir: args.log_dir.unwrap_or_else(std::env::temp_dir),
    })
}
