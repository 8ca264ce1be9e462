use anyhow::{Context, Result, bail};
use std::path::PathBuf;

/// Command line options for the demo.
#[derive(Debug, Clone)]
pub struct Options {
    /// Skip the runtime session and only bake
    pub bake_only: bool,
    /// Cancel the bake once this many tasks have finished
    pub cancel_after: Option<usize>,
    /// Length of the runtime session, in seconds
    pub seconds: f32,
    pub save_path: PathBuf,
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bake_only: false,
            cancel_after: None,
            seconds: 2.0,
            save_path: std::env::temp_dir().join("petalsonic-demo-bake.json"),
            verbose: false,
        }
    }
}

pub const USAGE: &str = "\
usage: petalsonic-bridge-demo [options]

  --bake-only           skip the runtime session
  --cancel-after <n>    cancel the bake after n finished tasks
  --seconds <s>         runtime session length (default 2)
  --out <path>          where to write bake results
  -v, --verbose         debug logging
  -h, --help            print this message";

/// Parses `args` (without the program name). Returns `None` when help was
/// requested.
pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Option<Options>> {
    let mut options = Options::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bake-only" => options.bake_only = true,
            "--cancel-after" => {
                let value = args.next().context("--cancel-after needs a value")?;
                options.cancel_after = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid task count '{}'", value))?,
                );
            }
            "--seconds" => {
                let value = args.next().context("--seconds needs a value")?;
                options.seconds = value
                    .parse()
                    .with_context(|| format!("invalid duration '{}'", value))?;
                if options.seconds.is_nan() || options.seconds < 0.0 {
                    bail!("duration must not be negative");
                }
            }
            "--out" => {
                options.save_path = args.next().context("--out needs a path")?.into();
            }
            "-v" | "--verbose" => options.verbose = true,
            "-h" | "--help" => return Ok(None),
            other => bail!("unknown argument '{}'\n\n{}", other, USAGE),
        }
    }

    Ok(Some(options))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let options = parse(args(&[])).unwrap().unwrap();
        assert!(!options.bake_only);
        assert_eq!(options.cancel_after, None);
        assert_eq!(options.seconds, 2.0);
    }

    #[test]
    fn test_flags_with_values() {
        let options = parse(args(&["--bake-only", "--cancel-after", "2", "--seconds", "0.5"]))
            .unwrap()
            .unwrap();
        assert!(options.bake_only);
        assert_eq!(options.cancel_after, Some(2));
        assert_eq!(options.seconds, 0.5);
    }

    #[test]
    fn test_missing_value_is_an_error() {
        assert!(parse(args(&["--cancel-after"])).is_err());
        assert!(parse(args(&["--seconds", "fast"])).is_err());
    }

    #[test]
    fn test_help_returns_none() {
        assert!(parse(args(&["--help"])).unwrap().is_none());
    }

    #[test]
    fn test_unknown_argument_is_rejected() {
        assert!(parse(args(&["--gui"])).is_err());
    }
}
