//! Configuration file loader.
//!
//! Mirrors the reference server's config reader: a line-based directive
//! file, first token is the directive name, the remainder its arguments.
//! Unrecognized directives are logged and skipped rather than treated as
//! fatal. A process started with no config file runs with the defaults
//! below — the same "zero-config" posture the reference CLI defaults to.

use crate::persistence::{FsyncMode, SaveRule};
use crate::storage::EvictionPolicy;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub save_rules: Vec<SaveRule>,
    pub dbfilename: String,
    pub appendfilename: String,
    pub appendfsync: FsyncMode,
    pub appendonly: bool,
    pub dir: PathBuf,
    pub requirepass: Option<String>,
    pub maxmemory: usize,
    pub maxmemory_policy: EvictionPolicy,
    pub maxmemory_samples: usize,
    /// Path the config was loaded from, if any — surfaced verbatim in INFO.
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            save_rules: Vec::new(),
            dbfilename: "dump.rdb".to_string(),
            appendfilename: "appendonly.aof".to_string(),
            appendfsync: FsyncMode::EverySec,
            appendonly: false,
            dir: PathBuf::from("."),
            requirepass: None,
            maxmemory: 0,
            maxmemory_policy: EvictionPolicy::NoEviction,
            maxmemory_samples: 5,
            config_file: None,
        }
    }
}

impl Config {
    pub fn rdb_path(&self) -> PathBuf {
        self.dir.join(&self.dbfilename)
    }

    pub fn aof_path(&self) -> PathBuf {
        self.dir.join(&self.appendfilename)
    }

    /// Loads directives from `path`, layered on top of [`Config::default`].
    /// Creates `dir` eagerly so later file opens never need to.
    pub fn load(path: &Path) -> std::io::Result<Config> {
        let contents = fs::read_to_string(path)?;
        let mut config = Config {
            config_file: Some(path.to_path_buf()),
            ..Config::default()
        };

        for (lineno, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let directive = match parts.next() {
                Some(d) => d,
                None => continue,
            };
            let args: Vec<&str> = parts.collect();

            if let Err(e) = apply_directive(&mut config, directive, &args) {
                warn!(line = lineno + 1, directive, error = %e, "skipping unrecognized or malformed config directive");
            }
        }

        fs::create_dir_all(&config.dir)?;
        Ok(config)
    }
}

fn apply_directive(config: &mut Config, directive: &str, args: &[&str]) -> Result<(), String> {
    match directive {
        "save" => {
            if args.len() != 2 {
                return Err("expected 'save <seconds> <threshold>'".to_string());
            }
            let secs: u64 = args[0].parse().map_err(|_| "non-numeric seconds".to_string())?;
            let threshold: u64 = args[1].parse().map_err(|_| "non-numeric threshold".to_string())?;
            config.save_rules.push(SaveRule::new(secs, threshold));
            Ok(())
        }
        "dbfilename" => {
            config.dbfilename = single_arg(args)?.to_string();
            Ok(())
        }
        "appendfilename" => {
            config.appendfilename = single_arg(args)?.to_string();
            Ok(())
        }
        "appendfsync" => {
            config.appendfsync = FsyncMode::from_str(single_arg(args)?)?;
            Ok(())
        }
        "appendonly" => {
            config.appendonly = parse_yes_no(single_arg(args)?)?;
            Ok(())
        }
        "dir" => {
            config.dir = PathBuf::from(single_arg(args)?);
            Ok(())
        }
        "requirepass" => {
            config.requirepass = Some(single_arg(args)?.to_string());
            Ok(())
        }
        "maxmemory" => {
            config.maxmemory = parse_memory(single_arg(args)?)?;
            Ok(())
        }
        "maxmemory-policy" => {
            config.maxmemory_policy = EvictionPolicy::from_str(single_arg(args)?)?;
            Ok(())
        }
        "maxmemory-samples" => {
            config.maxmemory_samples = single_arg(args)?
                .parse()
                .map_err(|_| "non-numeric sample count".to_string())?;
            Ok(())
        }
        other => Err(format!("unknown directive '{other}'")),
    }
}

fn single_arg<'a>(args: &[&'a str]) -> Result<&'a str, String> {
    match args {
        [value] => Ok(value),
        _ => Err("expected exactly one argument".to_string()),
    }
}

fn parse_yes_no(s: &str) -> Result<bool, String> {
    match s {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(format!("expected yes/no, got '{other}'")),
    }
}

/// Parses a memory size with an optional `b`/`kb`/`mb`/`gb` suffix
/// (case-insensitive), e.g. `512mb`, `0`, `128`.
fn parse_memory(s: &str) -> Result<usize, String> {
    let lower = s.to_lowercase();
    let (digits, multiplier) = if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1)
    } else {
        (lower.as_str(), 1)
    };

    digits
        .trim()
        .parse::<usize>()
        .map(|n| n * multiplier)
        .map_err(|_| format!("invalid memory size '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_zero_config() {
        let config = Config::default();
        assert_eq!(config.port, 6379);
        assert!(!config.appendonly);
        assert!(config.requirepass.is_none());
        assert_eq!(config.maxmemory, 0);
    }

    #[test]
    fn parses_memory_suffixes() {
        assert_eq!(parse_memory("0").unwrap(), 0);
        assert_eq!(parse_memory("128").unwrap(), 128);
        assert_eq!(parse_memory("1kb").unwrap(), 1024);
        assert_eq!(parse_memory("2mb").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_memory("1gb").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn loads_a_full_directive_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("flashkv.conf");
        let data_dir = dir.path().join("data");

        let mut file = fs::File::create(&config_path).unwrap();
        writeln!(file, "# a comment").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "save 900 1").unwrap();
        writeln!(file, "save 300 10").unwrap();
        writeln!(file, "appendonly yes").unwrap();
        writeln!(file, "appendfsync always").unwrap();
        writeln!(file, "dir {}", data_dir.display()).unwrap();
        writeln!(file, "requirepass s3cret").unwrap();
        writeln!(file, "maxmemory 1mb").unwrap();
        writeln!(file, "maxmemory-policy allkeys-lru").unwrap();
        writeln!(file, "maxmemory-samples 10").unwrap();
        writeln!(file, "bogus-directive ignored").unwrap();
        drop(file);

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.save_rules.len(), 2);
        assert!(config.appendonly);
        assert_eq!(config.appendfsync, FsyncMode::Always);
        assert!(data_dir.exists());
        assert_eq!(config.requirepass.as_deref(), Some("s3cret"));
        assert_eq!(config.maxmemory, 1024 * 1024);
        assert_eq!(config.maxmemory_policy, EvictionPolicy::AllKeysLru);
        assert_eq!(config.maxmemory_samples, 10);
    }
}
