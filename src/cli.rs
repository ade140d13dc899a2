use anyhow::Result;
use clap::{ArgAction, Args, Parser, ValueEnum};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gitstat")]
#[command(about = "Per-user, per-language line statistics from a Git hosting service")]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub connection: ConnectionArgs,

    #[clap(flatten)]
    pub scope: ScopeArgs,

    #[arg(short, long, value_enum, default_value_t = Format::Txt, help = "Output format")]
    pub format: Format,

    #[arg(short = 'S', long, help = "Don't output progress")]
    pub silent: bool,

    #[arg(short, long, action = ArgAction::Count, help = "Increase log verbosity (-v info, -vv debug, -vvv trace)")]
    pub verbose: u8,
}

#[derive(Args, Clone, Debug)]
pub struct ConnectionArgs {
    #[arg(short, long, default_value = "gitlab", help = "Git server type")]
    pub server: String,

    #[arg(short = 'H', long, env = "GITLAB_HOST", help = "Git server host")]
    pub host: Option<String>,

    #[arg(short, long, env = "GITLAB_TOKEN", hide_env_values = true, help = "Git server authentication token")]
    pub token: Option<String>,

    #[arg(short = 'R', long, default_value_t = 50, help = "Git server rate limit (requests per second, 0 disables)")]
    pub rate: u32,

    #[arg(short, long, default_value_t = 5, help = "Git server call attempts")]
    pub retry: u32,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s", help = "Delay before the first retry")]
    pub retry_delay: Duration,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s", help = "Upper bound for retry delays")]
    pub retry_max_delay: Duration,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s", help = "Timeout for a single request")]
    pub timeout: Duration,
}

#[derive(Args, Clone, Debug)]
pub struct ScopeArgs {
    #[arg(short, long = "user", help = "User aliases in form email:alias")]
    pub users: Vec<String>,

    #[arg(short, long = "lang", help = "Language file extensions in form lang:extension")]
    pub langs: Vec<String>,

    #[arg(short, long, help = "Projects query")]
    pub query: Option<String>,

    #[arg(short = 'E', long, help = "Regex for excluding projects")]
    pub exclude: Option<String>,

    #[arg(short, long, default_value_t = 32, help = "Maximum blame requests in flight")]
    pub concurrency: usize,

    #[arg(long, default_value_t = 8, help = "Maximum repositories processed at once")]
    pub repo_concurrency: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Txt,
    Json,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn execute(self) -> Result<()> {
        crate::logging::init_tracing(self.verbose);
        crate::stats::exec(self.connection, self.scope, self.format, self.silent)
    }
}
