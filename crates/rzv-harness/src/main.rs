#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use rzv_engine::MathEngine;
use rzv_error::EXIT_FAILURE;
use rzv_harness::bench::{BenchConfig, run_bench};
use rzv_harness::cli::{CliOptions, Command, Mode, error_exit_code, parse_args, usage};
use rzv_harness::crash::install_debugger_hook;
use rzv_harness::options::MAX_BLOCK_SIZE;
use rzv_harness::random::seed_from_clock;
use rzv_harness::{CancelToken, RandomPool, SweepConfig, Verbosity, run_sweep, run_test};
use std::env;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(error_exit_code(&err));
        }
    }
}

fn run() -> Result<i32> {
    let opts = match parse_args(env::args().skip(1)) {
        Ok(Command::Run(opts)) => opts,
        Ok(Command::Help) => {
            print!("{}", usage());
            return Ok(0);
        }
        Err(err) => {
            eprint!("{}", usage());
            return Err(err);
        }
    };
    if opts.attach_debugger {
        install_debugger_hook();
    }

    let seed = seed_from_clock();
    let pool_len = usize::try_from(MAX_BLOCK_SIZE).context("random buffer size")?;
    let pool = RandomPool::generate(seed, pool_len);
    opts.test.log(Verbosity::Info, format!("random seed: {seed:#x}"));

    match opts.mode {
        Mode::Benchmark => bench(&opts, &pool),
        Mode::Sweep => sweep(&opts, &pool, seed),
        Mode::Verify => verify(&opts, &pool),
    }
}

fn verify(opts: &CliOptions, pool: &RandomPool) -> Result<i32> {
    opts.test.log(Verbosity::Info, opts.test.render(false));
    let mut engine = MathEngine::new();
    let report = run_test(&mut engine, &opts.test, pool, CancelToken::new())
        .context("verification could not run")?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    let failures = report.failures();
    if failures == 0 {
        opts.test.log(Verbosity::All, "All tests passed.");
        Ok(0)
    } else {
        let note = if opts.test.sanity { " (sanity mode)" } else { "" };
        println!("{failures} test(s) failed{note}.");
        Ok(EXIT_FAILURE)
    }
}

fn sweep(opts: &CliOptions, pool: &RandomPool, seed: u64) -> Result<i32> {
    opts.test.log(Verbosity::Info, opts.test.render(true));
    let config = SweepConfig {
        timeout: opts.sweep_timeout,
        sanity: opts.test.sanity,
        seed,
        base: opts.test.clone(),
        ..SweepConfig::default()
    };
    let report = run_sweep(&config, pool, MathEngine::new);
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report.exit_code())
}

fn bench(opts: &CliOptions, pool: &RandomPool) -> Result<i32> {
    let mut engine = MathEngine::new();
    let report = run_bench(&mut engine, &BenchConfig::default(), pool, &opts.test)
        .context("benchmark could not run")?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_table());
    }
    Ok(0)
}
