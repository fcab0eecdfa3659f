//! Command-line parsing for the `raidz-verify` binary.
//!
//! Short options only, getopt style: flags may be bundled (`-vvS`) and values
//! attached (`-a12`) or given as the next argument (`-a 12`). Out-of-range
//! values are clamped rather than rejected.

use crate::options::{MAX_BLOCK_SHIFT, MIN_BLOCK_SHIFT, TestOptions, Verbosity};
use anyhow::{Context, Result, bail};
use rzv_error::{EXIT_FAILURE, RzvError};
use serde::Serialize;
use std::time::Duration;

/// Option letters that take a value.
const WITH_VALUE: &str = "arodst";

const MAX_ASHIFT_ARG: u64 = 13;
const MAX_OFFSET_SHIFT: u64 = 12;
const MAX_DATA_COLS: u64 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Verify,
    Sweep,
    Benchmark,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub test: TestOptions,
    pub mode: Mode,
    pub sweep_timeout: Option<Duration>,
    pub attach_debugger: bool,
    pub json: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            test: TestOptions::default(),
            mode: Mode::Verify,
            sweep_timeout: None,
            attach_debugger: false,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(CliOptions),
    Help,
}

/// Parse an unsigned integer the way `strtoull(s, NULL, 0)` does: `0x`
/// prefix for hex, leading `0` for octal, decimal otherwise. Parsing stops at
/// the first character that is not a digit of the radix, so `12x` reads as 12
/// and a bare `0x` as 0.
///
/// # Errors
///
/// If `raw` has no leading digits at all or the value overflows `u64`.
pub fn parse_u64(raw: &str) -> Result<u64> {
    let s = raw.trim_start();
    let (body, radix, prefixed) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16, true)
    } else if let Some(oct) = s.strip_prefix('0') {
        (oct, 8, true)
    } else {
        (s, 10, false)
    };
    let end = body.find(|c: char| !c.is_digit(radix)).unwrap_or(body.len());
    if end == 0 {
        if prefixed {
            return Ok(0);
        }
        bail!("invalid number: {raw:?}");
    }
    u64::from_str_radix(&body[..end], radix).with_context(|| format!("invalid number: {raw:?}"))
}

fn apply_value(opts: &mut CliOptions, flag: char, raw: &str) -> Result<()> {
    let value = parse_u64(raw).with_context(|| format!("option -{flag}"))?;
    match flag {
        'a' => {
            opts.test.ashift = u32::try_from(value.clamp(u64::from(MIN_BLOCK_SHIFT), MAX_ASHIFT_ARG))?;
        }
        'o' => opts.test.offset = ((1_u64 << value.min(MAX_OFFSET_SHIFT)) >> 9) << 9,
        'r' => opts.test.expand_offset = value,
        'd' => opts.test.data_cols = usize::try_from(value.clamp(1, MAX_DATA_COLS))?,
        's' => {
            let shift = value.clamp(u64::from(MIN_BLOCK_SHIFT), u64::from(MAX_BLOCK_SHIFT));
            opts.test.size = 1 << shift;
        }
        't' => opts.sweep_timeout = (value > 0).then(|| Duration::from_secs(value)),
        _ => bail!("option -{flag} takes no value"),
    }
    Ok(())
}

/// Parse the arguments after the program name.
///
/// # Errors
///
/// Unknown options, missing or malformed values and stray positional
/// arguments.
pub fn parse_args<I, S>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<S> = args.into_iter().collect();
    let mut opts = CliOptions::default();
    let mut verbosity = 0_usize;
    let mut sweep = false;
    let mut bench = false;

    let mut index = 0;
    while index < args.len() {
        let arg = args[index].as_ref();
        index += 1;
        let Some(bundle) = arg.strip_prefix('-').filter(|b| !b.is_empty()) else {
            bail!("unexpected argument: {arg}");
        };

        for (pos, flag) in bundle.char_indices() {
            if WITH_VALUE.contains(flag) {
                let attached = &bundle[pos + flag.len_utf8()..];
                let raw = if attached.is_empty() {
                    let next = args
                        .get(index)
                        .with_context(|| format!("option -{flag} requires a value"))?;
                    index += 1;
                    next.as_ref()
                } else {
                    attached
                };
                apply_value(&mut opts, flag, raw)?;
                break;
            }
            match flag {
                'h' => return Ok(Command::Help),
                'v' => verbosity += 1,
                'e' => opts.test.expand = true,
                'T' => opts.test.sanity = true,
                'S' => sweep = true,
                'B' => bench = true,
                'D' => opts.attach_debugger = true,
                'j' => opts.json = true,
                other => bail!("unknown option: -{other}"),
            }
        }
    }

    opts.test.verbosity = Verbosity::from_count(verbosity);
    opts.mode = if bench {
        Mode::Benchmark
    } else if sweep {
        Mode::Sweep
    } else {
        Mode::Verify
    };
    Ok(Command::Run(opts))
}

/// Exit code for a run that stopped with `err`: the engine's own code when an
/// [`RzvError`] is anywhere in the chain, [`EXIT_FAILURE`] otherwise.
#[must_use]
pub fn error_exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RzvError>())
        .map_or(EXIT_FAILURE, RzvError::exit_code)
}

#[must_use]
pub fn usage() -> String {
    let d = TestOptions::default();
    format!(
        "Usage: raidz-verify [-TDBSvhej] [-a ashift] [-o zio_off_shift] [-d raidz_data_disks]\n\
         \x20                   [-s zio_size_shift] [-r reflow_offset] [-t timeout]\n\
         \n\
         \x20   -a ashift          (default: {ashift}) zio ashift, clamped to 9..=13\n\
         \x20   -o zio_off_shift   (default offset: {offset}) zio offset = 2^shift, sector aligned\n\
         \x20   -d raidz_data_disks (default: {dcols}) clamped to 1..=255\n\
         \x20   -s zio_size_shift  (default: {size}) payload = 2^shift, clamped to 9..=24\n\
         \x20   -r reflow_offset   (default: {reflow:x}) expansion reflow offset\n\
         \x20   -t timeout         (default: none) sweep timeout in seconds\n\
         \x20   -e                 use the expanded (multi-row) layout\n\
         \x20   -S                 sweep over geometries\n\
         \x20   -B                 benchmark every backend\n\
         \x20   -v                 more output, repeatable\n\
         \x20   -T                 sanity mode: skip the real math so failures must be caught\n\
         \x20   -D                 attach gdb when the harness panics\n\
         \x20   -j                 print the report as JSON\n\
         \x20   -h                 this help\n",
        ashift = d.ashift,
        offset = d.offset,
        dcols = d.data_cols,
        size = d.size.ilog2(),
        reflow = d.expand_offset,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> CliOptions {
        match parse_args(args).expect("parses") {
            Command::Run(opts) => opts,
            Command::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn no_arguments_gives_defaults() {
        assert_eq!(run(&[]), CliOptions::default());
    }

    #[test]
    fn values_attached_or_separate() {
        let a = run(&["-a12", "-d", "5"]);
        assert_eq!(a.test.ashift, 12);
        assert_eq!(a.test.data_cols, 5);
    }

    #[test]
    fn values_are_clamped() {
        let opts = run(&["-a", "20", "-d", "0", "-s", "40", "-o", "99"]);
        assert_eq!(opts.test.ashift, 13);
        assert_eq!(opts.test.data_cols, 1);
        assert_eq!(opts.test.size, 1 << 24);
        assert_eq!(opts.test.offset, 1 << 12);

        let low = run(&["-a3", "-s1", "-d999", "-o3"]);
        assert_eq!(low.test.ashift, 9);
        assert_eq!(low.test.size, 512);
        assert_eq!(low.test.data_cols, 255);
        // 2^3 rounded down to a 512-byte sector.
        assert_eq!(low.test.offset, 0);
    }

    #[test]
    fn bundled_flags() {
        let opts = run(&["-vvSe", "-T"]);
        assert_eq!(opts.test.verbosity, Verbosity::Debug);
        assert_eq!(opts.mode, Mode::Sweep);
        assert!(opts.test.expand);
        assert!(opts.test.sanity);
    }

    #[test]
    fn flag_bundle_may_end_with_value() {
        let opts = run(&["-vd", "4"]);
        assert_eq!(opts.test.verbosity, Verbosity::Info);
        assert_eq!(opts.test.data_cols, 4);
    }

    #[test]
    fn benchmark_wins_over_sweep() {
        assert_eq!(run(&["-S", "-B"]).mode, Mode::Benchmark);
    }

    #[test]
    fn reflow_offset_accepts_radix_prefixes() {
        assert_eq!(run(&["-r", "0x1000"]).test.expand_offset, 0x1000);
        assert_eq!(run(&["-r", "010"]).test.expand_offset, 8);
        assert_eq!(run(&["-r0"]).test.expand_offset, 0);
    }

    #[test]
    fn numbers_stop_at_first_non_digit() {
        assert_eq!(parse_u64("12x").expect("leading digits"), 12);
        assert_eq!(parse_u64("0x1fz").expect("hex prefix"), 0x1f);
        assert_eq!(parse_u64("0x").expect("bare prefix"), 0);
        assert_eq!(parse_u64("08").expect("octal stops at 8"), 0);
        assert!(parse_u64("x12").is_err());
        assert!(parse_u64("99999999999999999999").is_err());

        let opts = run(&["-a", "12x", "-d", "5cols"]);
        assert_eq!(opts.test.ashift, 12);
        assert_eq!(opts.test.data_cols, 5);
    }

    #[test]
    fn timeout_zero_means_none() {
        assert_eq!(run(&["-t", "0"]).sweep_timeout, None);
        assert_eq!(run(&["-t", "30"]).sweep_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn engine_error_exit_code_survives_context() {
        let engine = RzvError::GoldenMismatch { parity: 3, mismatches: 1 };
        let expected = engine.exit_code();
        let err = anyhow::Error::from(engine).context("verification could not run");
        assert!(err.chain().any(|c| c.downcast_ref::<RzvError>().is_some()));
        assert_eq!(error_exit_code(&err), expected);

        let usage = parse_args(["-x"]).unwrap_err();
        assert_eq!(error_exit_code(&usage), EXIT_FAILURE);
    }

    #[test]
    fn help_and_errors() {
        assert_eq!(parse_args(["-vh"]).expect("parses"), Command::Help);
        assert!(parse_args(["-x"]).is_err());
        assert!(parse_args(["-a"]).is_err());
        assert!(parse_args(["-a", "twelve"]).is_err());
        assert!(parse_args(["stray"]).is_err());
        assert!(usage().contains("-S"));
    }
}
