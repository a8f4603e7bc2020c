//! rtp-decoder - offline SRTP/SRTCP decoder
//!
//! Reads a packet capture, unprotects the SRTP or SRTCP payload of each frame
//! with a user-supplied master key and writes the plaintext to stdout in a
//! format `text2pcap` can turn back into a capture.

mod capture;
mod config;
mod decoder;
mod error;
mod logging;
mod srtp;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

use capture::{CaptureReader, Filter};
use config::Config;
use decoder::{Decoder, Mode, DEFAULT_RTP_OFFSET};
use error::ConfigError;
use srtp::key::{self, KeyEncoding, MasterKey};
use srtp::suite::{self, Selection};
use srtp::{policy, Policy, SsrcSelector, SuiteError};

#[derive(Parser, Debug)]
#[command(name = "rtp-decoder")]
#[command(about = "Decrypt SRTP/SRTCP packets from a capture file", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the SRTP master key/salt given in hexadecimal
    #[arg(short = 'k', value_name = "key")]
    hex_key: Option<String>,

    /// Set the SRTP master key/salt given in base64
    #[arg(short = 'b', value_name = "key")]
    base64_key: Option<String>,

    /// Set the master key index in hexadecimal
    #[arg(short = 'i', value_name = "mki")]
    mki: Option<String>,

    /// Use encryption with this key size (128, 192 or 256)
    #[arg(short = 'e', value_name = "key size", action = clap::ArgAction::Append)]
    key_size: Vec<u32>,

    /// Tag size in bytes (4 or 10, in GCM mode 8 or 16)
    #[arg(short = 't', value_name = "tag size", action = clap::ArgAction::Append)]
    tag_size: Vec<usize>,

    /// Use AES-GCM mode
    #[arg(short = 'g')]
    gcm: bool,

    /// Use message authentication
    #[arg(short = 'a')]
    auth: bool,

    /// Set key and tag size from an RFC 4568 crypto suite name
    #[arg(short = 'c', value_name = "srtp-crypto-suite", action = clap::ArgAction::Append)]
    suite: Vec<String>,

    /// Decoding mode
    #[arg(short = 'm', value_enum, ignore_case = true)]
    mode: Option<Mode>,

    /// Capture filter, e.g. "udp port 5004"
    #[arg(short = 'f', value_name = "filter")]
    filter: Option<String>,

    /// Capture file, `-` for stdin
    #[arg(short = 'p', value_name = "pcap file", default_value = "-")]
    pcap_file: PathBuf,

    /// Byte offset of the RTP packet in each frame [default: 42]
    #[arg(short = 'o', value_name = "offset")]
    rtp_offset: Option<usize>,

    /// Only decrypt this SSRC (decimal, 0x hex or 0-prefixed octal)
    #[arg(short = 's', value_name = "ssrc")]
    ssrc: Option<String>,

    /// Initial rollover counter, requires -s
    #[arg(short = 'r', value_name = "roc", default_value_t = 0)]
    roc: u32,

    /// Turn on debug logging for a module (repeatable)
    #[arg(short = 'd', value_name = "debug", action = clap::ArgAction::Append)]
    debug: Vec<String>,

    /// List debug modules and exit
    #[arg(short = 'l')]
    list_modules: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Defaults file (TOML)
    #[arg(long, value_name = "file")]
    config: Option<PathBuf>,
}

/// Parsed command line plus the order-sensitive parts clap does not keep.
struct Options {
    cli: Cli,
    /// Suite-affecting flags in command-line order.
    selections: Vec<Selection>,
    /// The later of `-k` and `-b`.
    key: Option<(String, KeyEncoding)>,
}

impl Options {
    fn from_matches(matches: &ArgMatches) -> Result<Self, clap::Error> {
        let cli = Cli::from_arg_matches(matches)?;

        let mut ordered: Vec<(usize, Selection)> = Vec::new();
        let positions = |id: &str| -> Vec<usize> {
            matches
                .indices_of(id)
                .map(|indices| indices.collect())
                .unwrap_or_default()
        };
        for (index, bits) in positions("key_size").into_iter().zip(&cli.key_size) {
            ordered.push((index, Selection::KeySize(*bits)));
        }
        for (index, bytes) in positions("tag_size").into_iter().zip(&cli.tag_size) {
            ordered.push((index, Selection::TagSize(*bytes)));
        }
        for (index, name) in positions("suite").into_iter().zip(&cli.suite) {
            ordered.push((index, Selection::Suite(name.clone())));
        }
        if let (true, Some(index)) = (cli.gcm, matches.index_of("gcm")) {
            ordered.push((index, Selection::Gcm));
        }
        if let (true, Some(index)) = (cli.auth, matches.index_of("auth")) {
            ordered.push((index, Selection::Auth));
        }
        ordered.sort_by_key(|(index, _)| *index);
        let selections = ordered.into_iter().map(|(_, s)| s).collect();

        let hex = cli
            .hex_key
            .clone()
            .map(|k| (matches.index_of("hex_key"), k, KeyEncoding::Hex));
        let b64 = cli
            .base64_key
            .clone()
            .map(|k| (matches.index_of("base64_key"), k, KeyEncoding::Base64));
        let key = match (hex, b64) {
            (Some(h), Some(b)) => Some(if b.0 > h.0 { b } else { h }),
            (h, b) => h.or(b),
        }
        .map(|(_, text, encoding)| (text, encoding));

        Ok(Options {
            cli,
            selections,
            key,
        })
    }

    #[cfg(test)]
    fn parse_from<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Cli::command().try_get_matches_from(args).unwrap();
        Self::from_matches(&matches).unwrap()
    }
}

/// Everything needed to run the decode loop.
struct Session {
    decoder: Decoder,
    reader: CaptureReader,
    filter: Filter,
}

/// Parse `-s` the way `strtol(.., 0)` does: `0x` hex, leading-zero octal,
/// otherwise decimal.
fn parse_ssrc(text: &str) -> Result<u32, ConfigError> {
    let trimmed = text.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        u32::from_str_radix(&trimmed[1..], 8)
    } else {
        trimmed.parse()
    };
    parsed.map_err(|_| ConfigError::InvalidSsrc(text.to_string()))
}

/// Validate the options and open everything. Nothing is decoded here.
fn setup(options: &Options, config: &Config) -> Result<Session, ConfigError> {
    let cli = &options.cli;

    let (suite, services) = suite::resolve(&options.selections)?;
    if let Some(name) = suite.name {
        tracing::debug!("using crypto suite {}", name);
    }

    // A key is required exactly when some service was requested.
    match (&options.key, services.is_empty()) {
        (None, false) => return Err(ConfigError::KeyNotProvided),
        (Some(_), true) => return Err(ConfigError::UnexpectedKey),
        _ => {}
    }
    tracing::info!("security services: {}", services);

    let policies = policy::build(services, &suite)?;

    let (text, encoding) = options.key.as_ref().ok_or(ConfigError::KeyNotProvided)?;
    let material = key::decode_key_material(text, *encoding, policies.rtp.cipher_key_len)?;
    let mki = cli.mki.as_deref().map(key::decode_mki).transpose()?;
    let master_key = MasterKey::split(&material, policies.rtp.master_key_len(), mki);
    tracing::info!(
        "set master key/salt to {}/{}",
        key::to_hex(&master_key.key),
        key::to_hex(&master_key.salt)
    );
    if let Some(mki) = &master_key.mki {
        tracing::info!("set mki to {}", key::to_hex(mki));
    }

    let ssrc = match &cli.ssrc {
        Some(text) => SsrcSelector::Specific(parse_ssrc(text)?),
        None => SsrcSelector::AnyInbound,
    };
    if cli.roc != 0 && ssrc == SsrcSelector::AnyInbound {
        return Err(ConfigError::RocWithoutSsrc);
    }

    let reader = CaptureReader::open(&cli.pcap_file)?;

    let filter_text = cli
        .filter
        .as_deref()
        .or(config.filter.as_deref())
        .unwrap_or_default();
    if !filter_text.is_empty() {
        tracing::info!("Setting filter as {}", filter_text);
    }
    let filter = Filter::compile(filter_text)?;
    if let Some(link_type) = reader.link_type() {
        filter.check_link_type(link_type)?;
    }

    let mode = cli.mode.or(config.mode).unwrap_or_default();
    let rtp_offset = cli
        .rtp_offset
        .or(config.rtp_offset)
        .unwrap_or(DEFAULT_RTP_OFFSET);

    tracing::info!("Starting decoder");
    let policy = Policy::new(policies, master_key, ssrc);
    let decoder: Decoder = Decoder::init(policy, mode, rtp_offset, cli.roc)?;
    tracing::debug!("rtp policy {:?}", decoder.policy().rtp);
    tracing::debug!("rtcp policy {:?}", decoder.policy().rtcp);

    Ok(Session {
        decoder,
        reader,
        filter,
    })
}

fn run(options: &Options) -> Result<()> {
    let config = Config::load(options.cli.config.as_deref())?;
    let Session {
        mut decoder,
        mut reader,
        filter,
    } = setup(options, &config)?;

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    loop {
        let frame = match reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("stopping after frame {}: {}", reader.frame_count(), e);
                break;
            }
        };
        if !filter.matches(&frame).map_err(ConfigError::from)? {
            continue;
        }
        decoder
            .handle(&frame, &mut out)
            .context("Failed to write decoded packet")?;
    }
    out.flush().context("Failed to flush output")?;
    tracing::debug!(
        "{} frames read, decoder {:?}",
        reader.frame_count(),
        decoder.state()
    );

    eprintln!("{}", decoder.report());
    decoder.deinit();
    Ok(())
}

/// `-l`: the suite flags are still validated before the list is printed.
fn list_debug_modules<W: Write>(options: &Options, out: &mut W) -> Result<()> {
    suite::resolve(&options.selections).map_err(ConfigError::from)?;
    logging::list_modules(out).context("list of debug modules failed")?;
    Ok(())
}

fn main() {
    let matches = match Cli::command().try_get_matches() {
        Ok(matches) => matches,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            process::exit(1);
        }
        Err(e) => e.exit(),
    };
    let options = match Options::from_matches(&matches) {
        Ok(options) => options,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    if let Err(e) = logging::init(options.cli.verbose, &options.cli.debug) {
        eprintln!("error: {}", e);
        process::exit(e.exit_code());
    }

    let result = if options.cli.list_modules {
        list_debug_modules(&options, &mut io::stdout())
    } else {
        run(&options)
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        let code = match e.downcast_ref::<ConfigError>() {
            Some(config_error) => {
                if let ConfigError::Suite(SuiteError::UnknownSuite(_)) = config_error {
                    let names: Vec<_> = suite::suite_names().collect();
                    eprintln!("supported crypto suites: {}", names.join(", "));
                }
                eprintln!("{}", Cli::command().render_usage());
                config_error.exit_code()
            }
            None => 1,
        };
        process::exit(code);
    }
}
