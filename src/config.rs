use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, fmt, str::FromStr, time::Duration};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_BATCH_SIZE: usize = 4;
const DEFAULT_BLOB_PREFIX: &str = "incoming-";
const DEFAULT_API_VERSION: &str = "2024-12-01-preview";
const DEFAULT_IDLE_SECS: u64 = 2;
const DEFAULT_FAULT_SECS: u64 = 3;
const DEFAULT_LEASE_SECS: u64 = 15;
const STORAGE_TIMEOUT: Duration = Duration::from_secs(60);
const CAPTION_TIMEOUT: Duration = Duration::from_secs(120);

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Blob container access.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub connection_string: Secret,
    pub container: String,
    pub request_timeout: Duration,
}

/// Azure OpenAI deployment used for captioning.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub api_key: Secret,
    pub request_timeout: Duration,
}

/// Polling loop tuning.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub incoming_prefix: String,
    /// `<account_url>/<container>`; blob names are appended to it.
    pub public_base_url: String,
    pub idle_interval: Duration,
    pub fault_interval: Duration,
    pub lease_duration: Duration,
}

/// Centralized worker configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageSettings,
    pub openai: OpenAiSettings,
    pub worker: WorkerSettings,
}

/// Settings for the model-sampling client.
#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub url: String,
    pub count: usize,
    pub delay: Duration,
    pub timeout: Duration,
    pub message: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Blob-storage image captioning worker")]
pub struct Args {
    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the caption worker and its status endpoints (default)
    Serve(ServeArgs),
    /// Call a chat endpoint repeatedly and tally the serving model families
    Sample(SampleArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct ServeArgs {
    /// Host to bind to (overrides CAPTION_WORKER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CAPTION_WORKER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Container to poll (overrides CONTAINER_NAME)
    #[arg(long)]
    pub container: Option<String>,

    /// Blobs handled per tick (overrides BATCH_SIZE)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Name prefix marking blobs as incoming (overrides BLOB_PREFIX)
    #[arg(long)]
    pub blob_prefix: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct SampleArgs {
    /// Chat endpoint, e.g. https://host/chat
    #[arg(long)]
    pub url: String,

    /// Number of requests to send
    #[arg(long, default_value_t = 10)]
    pub count: usize,

    /// Pause between requests in milliseconds
    #[arg(long, default_value_t = 100)]
    pub delay_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Message sent in every request body
    #[arg(long, default_value = "hi")]
    pub message: String,
}

impl From<SampleArgs> for SamplerSettings {
    fn from(args: SampleArgs) -> Self {
        Self {
            url: args.url,
            count: args.count,
            delay: Duration::from_millis(args.delay_ms),
            timeout: Duration::from_secs(args.timeout_secs),
            message: args.message,
        }
    }
}

/// Reads one setting, preferring the upper-snake name and falling back to
/// the hyphenated name used by existing container-app deployments.
struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Values set under either spelling, upper-snake first.
    fn candidates<'a>(&'a self, name: &str) -> impl Iterator<Item = String> + 'a {
        let hyphenated = name.to_ascii_lowercase().replace('_', "-");
        [name.to_string(), hyphenated]
            .into_iter()
            .filter_map(move |key| (self.lookup)(&key))
    }

    /// First non-empty value; an empty variable counts as unset.
    fn get(&self, name: &str) -> Option<String> {
        self.candidates(name).find(|value| !value.is_empty())
    }

    /// Like `get`, but reports a variable that is set to the empty string.
    fn get_or_empty(&self, name: &str) -> Option<String> {
        self.get(name).or_else(|| self.candidates(name).next())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.get(name)
            .with_context(|| format!("missing required environment variable {}", name))
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(name) {
            Some(value) => value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value)),
            None => Ok(default),
        }
    }
}

impl AppConfig {
    /// Parse environment variables + serve args into AppConfig.
    pub fn from_env_and_args(args: ServeArgs) -> Result<Self> {
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge CLI args over values produced by `lookup`.
    pub fn resolve(args: ServeArgs, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = EnvSource { lookup };

        // --- Environment fallback ---
        let env_host = env
            .get("CAPTION_WORKER_HOST")
            .unwrap_or_else(|| DEFAULT_HOST.into());
        let env_port = env.parsed("CAPTION_WORKER_PORT", DEFAULT_PORT)?;
        let env_batch = env.parsed("BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        let env_prefix = env
            .get_or_empty("BLOB_PREFIX")
            .unwrap_or_else(|| DEFAULT_BLOB_PREFIX.into());
        let idle_secs = env.parsed("IDLE_INTERVAL_SECS", DEFAULT_IDLE_SECS)?;
        let fault_secs = env.parsed("FAULT_INTERVAL_SECS", DEFAULT_FAULT_SECS)?;
        let lease_secs = env.parsed("LEASE_DURATION_SECS", DEFAULT_LEASE_SECS)?;

        let container = match args.container {
            Some(container) => container,
            None => env.required("CONTAINER_NAME")?,
        };
        let account_url = env
            .required("STORAGE_ACCOUNT_URL")?
            .trim_end_matches('/')
            .to_string();

        // --- Merge ---
        let batch_size = args.batch_size.unwrap_or(env_batch);
        if batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        let incoming_prefix = args.blob_prefix.unwrap_or(env_prefix);
        // An empty prefix would also match the captions/ and processed/ outputs.
        if incoming_prefix.is_empty() {
            bail!("blob prefix must not be empty");
        }
        if !(15..=60).contains(&lease_secs) {
            bail!("lease duration must be between 15 and 60 seconds, got {}", lease_secs);
        }

        let worker = WorkerSettings {
            batch_size,
            incoming_prefix,
            public_base_url: format!("{}/{}", account_url, container),
            idle_interval: Duration::from_secs(idle_secs),
            fault_interval: Duration::from_secs(fault_secs),
            lease_duration: Duration::from_secs(lease_secs),
        };

        let storage = StorageSettings {
            connection_string: Secret::new(env.required("STORAGE_ACCOUNT_CONNECTION_STRING")?),
            container,
            request_timeout: STORAGE_TIMEOUT,
        };

        let openai = OpenAiSettings {
            endpoint: env.required("AZURE_OPENAI_ENDPOINT")?,
            deployment: env.required("AZURE_OPENAI_DEPLOYMENT")?,
            api_version: env
                .get("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.into()),
            api_key: Secret::new(env.required("AZURE_OPENAI_API_KEY")?),
            request_timeout: CAPTION_TIMEOUT,
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage,
            openai,
            worker,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
