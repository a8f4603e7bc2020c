//! tracing-subscriber setup and the `-d`/`-l` debug module registry.

use tracing_subscriber::filter::Directive;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::ConfigError;

/// Modules that `-d` can switch to debug level, with a short description.
pub const DEBUG_MODULES: &[(&str, &str)] = &[
    ("srtp", "key derivation, streams and rollover counters"),
    ("srtp::key", "master key and MKI decoding"),
    ("srtp::policy", "cipher and tag selection"),
    ("srtp::session", "per-packet unprotect results"),
    ("capture", "capture format detection"),
    ("capture::filter", "filter compilation and matching"),
    ("decoder", "frame classification and decode errors"),
    ("config", "defaults file loading"),
];

/// Write the module list printed by `-l`.
pub fn list_modules<W: std::io::Write>(out: &mut W) -> std::io::Result<()> {
    writeln!(out, "debug modules loaded:")?;
    for (name, description) in DEBUG_MODULES {
        writeln!(out, "  {:<16} {}", name, description)?;
    }
    Ok(())
}

/// Map `-d` module names to filter directives.
pub fn module_directives(modules: &[String]) -> Result<Vec<Directive>, ConfigError> {
    modules
        .iter()
        .map(|module| {
            if !DEBUG_MODULES.iter().any(|(name, _)| name == module) {
                return Err(ConfigError::UnknownDebugModule(module.clone()));
            }
            format!("rtp_decoder::{}=debug", module)
                .parse()
                .map_err(|_| ConfigError::UnknownDebugModule(module.clone()))
        })
        .collect()
}

/// Install the global subscriber. Output goes to stderr so that stdout
/// carries only the hex dump. `RUST_LOG` replaces the `-v` default level.
pub fn init(verbose: bool, modules: &[String]) -> Result<(), ConfigError> {
    let directives = module_directives(modules)?;

    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    for directive in directives {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_directives() {
        let directives =
            module_directives(&["srtp::session".to_string(), "decoder".to_string()]).unwrap();
        assert_eq!(directives.len(), 2);
        assert!(directives[0]
            .to_string()
            .starts_with("rtp_decoder::srtp::session="));
    }

    #[test]
    fn test_unknown_module() {
        let err = module_directives(&["srtp".to_string(), "bogus".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDebugModule(ref m) if m == "bogus"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_list_modules() {
        let mut out = Vec::new();
        list_modules(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("debug modules loaded:\n"));
        assert_eq!(text.lines().count(), DEBUG_MODULES.len() + 1);
        assert!(text.contains("  srtp::session"));
    }
}
