use super::file::{ApiSection, LookupSection, SenderSection};
use super::serde_helpers::load_env_string_opt;
use crate::domain::{ConfigError, Credentials};
use crate::lookup::{CsvOptions, LookupAction};
use crate::query::{KeepAlive, QueryClientConfig, QuerySpec, ResponseFormat};
use crate::sender::config::DEFAULT_SENDER_PORT;
use crate::sender::{
    Address, BufferConfig, SendOptions, SenderConfig, SenderOptions, SenderTcpConfig,
    SenderTlsConfig, VerifyMode,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TAG: &str = "test.keep.free";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "devo",
    author,
    version,
    about = "Query the Devo platform and send events to it",
    long_about = None
)]
pub struct Cli {
    /// TOML file with [api], [sender] and [lookup] tables
    #[arg(long, global = true, env = "DEVO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Config file profile ([env.<name>]) applied over the top-level tables
    #[arg(long, global = true)]
    pub env: Option<String>,

    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a query and write the records it returns
    Query(QueryArgs),
    /// Send events from the command line or a file
    Send(SendArgs),
    /// Upload a CSV file as a lookup table
    Lookup(LookupArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Query endpoint: host, host/path or a full URL
    #[arg(long, env = "DEVO_API_ADDRESS")]
    pub address: Option<String>,

    #[arg(long, env = "DEVO_API_KEY")]
    pub key: Option<String>,

    #[arg(long, env = "DEVO_API_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    #[arg(long, env = "DEVO_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, env = "DEVO_API_JWT", hide_env_values = true)]
    pub jwt: Option<String>,

    #[arg(long, env = "DEVO_API_USER")]
    pub user: Option<String>,

    #[arg(long = "app-name")]
    pub app_name: Option<String>,

    #[arg(long, env = "DEVO_API_COMMENT")]
    pub comment: Option<String>,

    /// Total attempts on connection failures
    #[arg(long, env = "DEVO_API_RETRIES")]
    pub retries: Option<u32>,

    /// Request timeout in seconds
    #[arg(long, env = "DEVO_API_TIMEOUT")]
    pub timeout: Option<u64>,

    #[arg(long)]
    pub query: Option<String>,

    #[arg(long = "query-id")]
    pub query_id: Option<String>,

    /// Start of the window: epoch millis, a date or an expression such as now()-day()
    #[arg(long)]
    pub from: Option<String>,

    #[arg(long)]
    pub to: Option<String>,

    #[arg(long)]
    pub response: Option<ResponseFormat>,

    #[arg(long, overrides_with = "no_stream")]
    pub stream: bool,

    #[arg(long = "no-stream", overrides_with = "stream")]
    pub no_stream: bool,

    /// Write records here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long = "ip-as-string")]
    pub ip_as_string: bool,

    /// Keep-alive policy or custom token for csv/tsv streams
    #[arg(long = "keep-alive")]
    pub keep_alive: Option<KeepAlive>,

    #[arg(long)]
    pub limit: Option<u64>,
}

/// A query ready to run.
#[derive(Debug, Clone)]
pub struct QueryInvocation {
    pub client: QueryClientConfig,
    pub spec: QuerySpec,
    pub output: Option<PathBuf>,
}

impl QueryArgs {
    /// Command-line values win over the config file.
    pub fn resolve(self, file: &ApiSection) -> Result<QueryInvocation, ConfigError> {
        let file = file.clone();
        let credentials = Credentials::resolve(
            self.key.or(file.key),
            self.secret.or(file.secret),
            self.token.or(file.token),
            self.jwt.or(file.jwt),
        )?;

        let mut client = QueryClientConfig::new(credentials);
        if let Some(address) = self.address.or(file.address) {
            client = client.with_address(address);
        }
        if let Some(user) = self.user.or(file.user) {
            client = client.with_user(user);
        }
        if let Some(app_name) = self.app_name.or(file.app_name) {
            client = client.with_app_name(app_name);
        }
        if let Some(retries) = self.retries.or(file.retries) {
            client.retry.max_attempts = retries;
        }
        if let Some(timeout) = self.timeout.or(file.timeout) {
            client = client.with_timeout(Duration::from_secs(timeout));
        }
        client.validate()?;

        let response = match (self.response, file.response) {
            (Some(response), _) => response,
            (None, Some(text)) => text.parse()?,
            (None, None) => ResponseFormat::default(),
        };
        let stream = if self.no_stream {
            false
        } else if self.stream {
            true
        } else {
            file.stream.unwrap_or(true)
        };

        let mut spec = QuerySpec {
            query: self.query,
            query_id: self.query_id,
            response,
            stream,
            limit: self.limit,
            comment: self.comment.or(file.comment),
            keep_alive: self.keep_alive,
            ip_as_string: self.ip_as_string,
            ..QuerySpec::default()
        };
        if let Some(from) = self.from {
            spec = spec.from(from);
        }
        if let Some(to) = self.to {
            spec = spec.to(to);
        }
        spec.validate()?;

        Ok(QueryInvocation {
            client,
            spec,
            output: self.output,
        })
    }
}

/// Connection flags shared by `send` and `lookup`.
#[derive(Args, Debug, Clone, Default)]
pub struct SenderArgs {
    /// Ingestion host, optionally with `:port`
    #[arg(long, env = "DEVO_SENDER_ADDRESS")]
    pub address: Option<String>,

    #[arg(long, env = "DEVO_SENDER_PORT")]
    pub port: Option<u16>,

    /// Client private key (PEM); TLS is used when key and cert are set
    #[arg(long, env = "DEVO_SENDER_KEY")]
    pub key: Option<PathBuf>,

    #[arg(long, env = "DEVO_SENDER_CERT")]
    pub cert: Option<PathBuf>,

    #[arg(long, env = "DEVO_SENDER_CHAIN")]
    pub chain: Option<PathBuf>,

    #[arg(long = "verify_mode", alias = "verify-mode")]
    pub verify_mode: Option<VerifyMode>,

    #[arg(long = "check_hostname", alias = "check-hostname")]
    pub check_hostname: Option<bool>,

    /// Skip server certificate and hostname checks
    #[arg(long = "no-verify-certificates")]
    pub no_verify_certificates: bool,

    /// Check key, certificate, chain and peer before connecting
    #[arg(long = "verify-config")]
    pub verify_config: bool,

    /// Compressed batch threshold in bytes
    #[arg(long)]
    pub buffer: Option<usize>,

    #[arg(
        long = "compression_level",
        alias = "compression-level",
        allow_negative_numbers = true
    )]
    pub compression_level: Option<i32>,

    /// Hostname written in each event
    #[arg(long)]
    pub hostname: Option<String>,
}

/// Splits `host:port`; a bare host yields no port.
fn split_host_port(address: &str) -> (&str, Option<&str>) {
    match address.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (host, Some(port))
        }
        _ => (address, None),
    }
}

impl SenderArgs {
    pub fn resolve(
        self,
        file: &SenderSection,
    ) -> Result<(SenderConfig, SenderOptions), ConfigError> {
        let file = file.clone();

        let mut address = self.address;
        load_env_string_opt("DEVO_SENDER_URL", &mut address);
        let address = address.or(file.address).unwrap_or_default();
        let address = if address.trim().is_empty() {
            Address::default()
        } else {
            let (host, embedded_port) = split_host_port(address.trim());
            let port = match (self.port.or(file.port), embedded_port) {
                (Some(port), _) => port.to_string(),
                (None, Some(port)) => port.to_string(),
                (None, None) => DEFAULT_SENDER_PORT.to_string(),
            };
            Address::parse(host, &port)?
        };

        let config = match (self.key.or(file.key), self.cert.or(file.cert)) {
            (Some(key), Some(cert)) => {
                let verify_mode = if self.no_verify_certificates {
                    VerifyMode::None
                } else {
                    match (self.verify_mode, file.verify_mode) {
                        (Some(mode), _) => mode,
                        (None, Some(text)) => text.parse()?,
                        (None, None) => VerifyMode::Required,
                    }
                };
                let check_hostname = !self.no_verify_certificates
                    && self.check_hostname.or(file.check_hostname).unwrap_or(true);

                SenderConfig::Tls(
                    SenderTlsConfig::new(address, key, cert, self.chain.or(file.chain))
                        .with_verify_mode(verify_mode)
                        .with_check_hostname(check_hostname)
                        .with_verify_config(
                            self.verify_config || file.verify_config.unwrap_or(false),
                        ),
                )
            }
            (None, None) => SenderConfig::Tcp(SenderTcpConfig::new(address)),
            _ => {
                return Err(ConfigError::Invalid(
                    "--key and --cert must be given together".to_string(),
                ));
            }
        };

        let defaults = BufferConfig::default();
        let options = SenderOptions {
            buffer: BufferConfig {
                threshold: self.buffer.or(file.buffer).unwrap_or(defaults.threshold),
                compression_level: self
                    .compression_level
                    .or(file.compression_level)
                    .unwrap_or(defaults.compression_level),
            },
            hostname: self.hostname.or(file.hostname),
            ..SenderOptions::default()
        };
        options.validate()?;
        config.validate()?;

        Ok((config, options))
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct SendArgs {
    #[command(flatten)]
    pub connection: SenderArgs,

    #[arg(long)]
    pub tag: Option<String>,

    /// Send this text as one event
    #[arg(long)]
    pub line: Option<String>,

    /// Send every line of this file as an event
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Send the whole input as one length-prefixed event
    #[arg(long)]
    pub multiline: bool,

    /// Batch and compress events
    #[arg(long)]
    pub zip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendInput {
    Line(String),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SendInvocation {
    pub config: SenderConfig,
    pub options: SenderOptions,
    pub tag: String,
    pub input: SendInput,
    pub send_options: SendOptions,
}

impl SendArgs {
    pub fn resolve(self, file: &SenderSection) -> Result<SendInvocation, ConfigError> {
        let tag = self
            .tag
            .or_else(|| file.tag.clone())
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        let input = match (self.line, self.file) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "--line and --file are mutually exclusive".to_string(),
                ));
            }
            (Some(line), None) => SendInput::Line(line),
            (None, Some(path)) => SendInput::File(path),
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "either --line or --file is required".to_string(),
                ));
            }
        };
        let (config, options) = self.connection.resolve(file)?;

        Ok(SendInvocation {
            config,
            options,
            tag,
            input,
            send_options: SendOptions {
                multiline: self.multiline,
                zip: self.zip,
            },
        })
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct LookupArgs {
    #[command(flatten)]
    pub connection: SenderArgs,

    /// Lookup table name
    #[arg(long)]
    pub name: Option<String>,

    /// FULL replaces the table, INC updates rows
    #[arg(long)]
    pub action: Option<String>,

    /// CSV file to upload
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Key column name
    #[arg(long)]
    pub lkey: Option<String>,

    /// Column marking rows to delete
    #[arg(long)]
    pub dkey: Option<String>,

    /// Type of the key column
    #[arg(long = "key-type")]
    pub key_type: Option<String>,

    #[arg(long)]
    pub delimiter: Option<char>,

    #[arg(long)]
    pub quotechar: Option<char>,

    /// Double embedded quotes in text fields
    #[arg(long = "escape-quotes", visible_alias = "eq")]
    pub escape_quotes: bool,

    /// Also send each raw row to this tag
    #[arg(long = "historic-tag")]
    pub historic_tag: Option<String>,

    /// The file has no header row; use --headers
    #[arg(long = "no-headers")]
    pub no_headers: bool,

    /// Comma separated column names
    #[arg(long, value_delimiter = ',')]
    pub headers: Option<Vec<String>>,

    /// Reject rows with a different field count than the header
    #[arg(long)]
    pub strict: bool,

    /// Pause after START and before END, in milliseconds
    #[arg(long = "delay-ms")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LookupInvocation {
    pub config: SenderConfig,
    pub options: SenderOptions,
    pub name: String,
    pub action: LookupAction,
    pub file: PathBuf,
    pub csv: CsvOptions,
    pub escape_quotes: bool,
    pub historic_tag: Option<String>,
    pub delay: Duration,
}

fn ascii_byte(flag: &str, value: char) -> Result<u8, ConfigError> {
    u8::try_from(value)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| ConfigError::Invalid(format!("--{flag} must be a single ASCII character")))
}

impl LookupArgs {
    pub fn resolve(
        self,
        sender: &SenderSection,
        file: &LookupSection,
    ) -> Result<LookupInvocation, ConfigError> {
        let lookup = file.clone();
        let name = self
            .name
            .or(lookup.name)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("--name is required".to_string()))?;
        let path = self
            .file
            .or(lookup.file)
            .ok_or_else(|| ConfigError::Invalid("--file is required".to_string()))?;
        let action = match self.action.or(lookup.action) {
            Some(text) => text
                .parse::<LookupAction>()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?,
            None => LookupAction::default(),
        };

        let defaults = CsvOptions::default();
        let csv = CsvOptions {
            delimiter: match self.delimiter.or(lookup.delimiter) {
                Some(c) => ascii_byte("delimiter", c)?,
                None => defaults.delimiter,
            },
            quote: match self.quotechar.or(lookup.quotechar) {
                Some(c) => ascii_byte("quotechar", c)?,
                None => defaults.quote,
            },
            has_headers: !self.no_headers,
            headers: self.headers,
            key: self.lkey.or(lookup.lkey),
            key_type: self.key_type.or(lookup.key_type).unwrap_or(defaults.key_type),
            delete_column: self.dkey.or(lookup.dkey),
            strict: self.strict,
        };

        let (config, options) = self.connection.resolve(sender)?;
        Ok(LookupInvocation {
            config,
            options,
            name,
            action,
            file: path,
            csv,
            escape_quotes: self.escape_quotes || lookup.escape_quotes.unwrap_or(false),
            historic_tag: self.historic_tag.or(lookup.historic_tag),
            delay: Duration::from_millis(self.delay_ms.or(lookup.delay).unwrap_or(5_000)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("devo").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn query_flags_resolve() {
        let Command::Query(args) = parse(&[
            "query",
            "--address",
            "api-us.devo.com",
            "--key",
            "k",
            "--secret",
            "s",
            "--query",
            "from demo.ecommerce.data select *",
            "--from",
            "now()-day()",
            "--response",
            "csv",
            "--no-stream",
            "--retries",
            "5",
        ])
        .command
        else {
            panic!("expected query");
        };

        let invocation = args.resolve(&ApiSection::default()).unwrap();
        assert_eq!(invocation.client.address, "api-us.devo.com");
        assert_eq!(invocation.client.retry.max_attempts, 5);
        assert_eq!(invocation.spec.response, ResponseFormat::Csv);
        assert!(!invocation.spec.stream);
        assert_eq!(
            invocation.spec.query.as_deref(),
            Some("from demo.ecommerce.data select *")
        );
    }

    #[test]
    fn query_without_credentials_is_a_config_error() {
        let args = QueryArgs {
            query: Some("from x select *".to_string()),
            ..QueryArgs::default()
        };
        assert!(matches!(
            args.resolve(&ApiSection::default()),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn file_values_fill_missing_flags() {
        let file = ApiSection {
            token: Some("t".to_string()),
            response: Some("tsv".to_string()),
            stream: Some(false),
            ..ApiSection::default()
        };
        let args = QueryArgs {
            query_id: Some("q1".to_string()),
            ..QueryArgs::default()
        };
        let invocation = args.resolve(&file).unwrap();
        assert_eq!(invocation.client.credentials, Credentials::token("t"));
        assert_eq!(invocation.spec.response, ResponseFormat::Tsv);
        assert!(!invocation.spec.stream);
    }

    #[test]
    fn host_port_addresses_are_split() {
        assert_eq!(split_host_port("collector.local:1514"), ("collector.local", Some("1514")));
        assert_eq!(split_host_port("collector.local"), ("collector.local", None));
    }

    #[test]
    fn sender_without_certificates_is_plain_tcp() {
        let args = SenderArgs {
            address: Some("127.0.0.1:1514".to_string()),
            buffer: Some(1024),
            ..SenderArgs::default()
        };
        let (config, options) = args.resolve(&SenderSection::default()).unwrap();
        assert_eq!(
            config,
            SenderConfig::Tcp(SenderTcpConfig::new(Address::new("127.0.0.1", 1514)))
        );
        assert_eq!(options.buffer.threshold, 1024);
    }

    #[test]
    fn no_verify_certificates_relaxes_tls() {
        let args = SenderArgs {
            address: Some("collector.local".to_string()),
            key: Some(PathBuf::from("client.key")),
            cert: Some(PathBuf::from("client.crt")),
            no_verify_certificates: true,
            ..SenderArgs::default()
        };
        let (config, _) = args.resolve(&SenderSection::default()).unwrap();
        let SenderConfig::Tls(tls) = config else {
            panic!("expected TLS");
        };
        assert_eq!(tls.address.port, DEFAULT_SENDER_PORT);
        assert_eq!(tls.verify_mode, VerifyMode::None);
        assert!(!tls.check_hostname);
    }

    #[test]
    fn half_a_certificate_pair_is_rejected() {
        let args = SenderArgs {
            address: Some("collector.local".to_string()),
            key: Some(PathBuf::from("client.key")),
            ..SenderArgs::default()
        };
        assert!(args.resolve(&SenderSection::default()).is_err());
    }

    #[test]
    fn send_requires_input() {
        let Command::Send(args) = parse(&["send", "--address", "127.0.0.1:1514"]).command else {
            panic!("expected send");
        };
        assert!(matches!(
            args.resolve(&SenderSection::default()),
            Err(ConfigError::Invalid(msg)) if msg.contains("--line")
        ));
    }

    #[test]
    fn lookup_flags_resolve() {
        let Command::Lookup(args) = parse(&[
            "lookup",
            "--address",
            "127.0.0.1:1514",
            "--name",
            "colors",
            "--action",
            "inc",
            "--file",
            "colors.csv",
            "--lkey",
            "id",
            "--dkey",
            "deleted",
            "--delimiter",
            ";",
            "--eq",
        ])
        .command
        else {
            panic!("expected lookup");
        };

        let invocation = args
            .resolve(&SenderSection::default(), &LookupSection::default())
            .unwrap();
        assert_eq!(invocation.name, "colors");
        assert_eq!(invocation.action, LookupAction::Inc);
        assert_eq!(invocation.csv.delimiter, b';');
        assert_eq!(invocation.csv.key.as_deref(), Some("id"));
        assert_eq!(invocation.csv.delete_column.as_deref(), Some("deleted"));
        assert!(invocation.escape_quotes);
        assert_eq!(invocation.delay, Duration::from_secs(5));
    }

    #[test]
    fn lookup_requires_a_name() {
        let args = LookupArgs {
            file: Some(PathBuf::from("colors.csv")),
            ..LookupArgs::default()
        };
        assert!(matches!(
            args.resolve(&SenderSection::default(), &LookupSection::default()),
            Err(ConfigError::Invalid(msg)) if msg.contains("--name")
        ));
    }

    #[test]
    fn compression_level_accepts_minus_one() {
        let Command::Send(args) = parse(&["send", "--line", "x", "--compression_level", "-1"]).command
        else {
            panic!("expected send");
        };
        assert_eq!(args.connection.compression_level, Some(-1));
    }
}
