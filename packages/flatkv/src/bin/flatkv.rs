//! `flatkv` command-line front end.
//!
//! Log output goes to stderr; stdout carries only command results.

use std::collections::HashMap;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Child, Command as Process, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flatkv::telemetry::{self, LogFormat};
use flatkv::workload::{self, StressPlan, STRESS_KEYS};
use flatkv::{
    AccessError, AccessLock, AccessorConfig, LockMode, ReadGuard, SyncAccessor, WriteGuard,
};
use flatkv_core::Value;

/// Flat-file key-value store with bounded readers and exclusive writers.
#[derive(Parser)]
#[command(name = "flatkv")]
#[command(version)]
struct Cli {
    /// Store file
    #[arg(long, env = "FLATKV_PATH")]
    path: PathBuf,

    /// Concurrent readers allowed
    #[arg(long, env = "FLATKV_MAX_READERS", default_value_t = flatkv::config::DEFAULT_MAX_READERS)]
    max_readers: usize,

    /// `threads` or `processes`
    #[arg(long, env = "FLATKV_MODE", default_value = "processes")]
    mode: LockMode,

    /// Lock directory (default: `<store file>.locks` next to the store)
    #[arg(long, env = "FLATKV_LOCK_DIR")]
    lock_dir: Option<PathBuf>,

    /// Give up on any lock wait after this many milliseconds
    #[arg(long, env = "FLATKV_LOCK_TIMEOUT_MS")]
    lock_timeout_ms: Option<u64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the store, overwriting any existing file
    Init {
        /// Initial entry as KEY=VALUE; repeatable
        #[arg(long = "entry", value_parser = parse_entry)]
        entries: Vec<(String, Value)>,
        /// Also add keys 0..N
        #[arg(long)]
        range: Option<usize>,
        /// Value for the keys added by --range
        #[arg(long, default_value = "false")]
        fill: String,
    },
    /// Print the value of KEY, or `<absent>`
    Get { key: String },
    /// Set KEY to VALUE
    Set { key: String, value: String },
    /// Remove KEY and print its value
    Delete { key: String },
    /// Print every entry as KEY=VALUE, sorted by key
    Dump,
    /// Report whether every reader slot is taken
    Probe,
    /// Read KEY repeatedly
    Reader {
        #[arg(long)]
        key: String,
        #[arg(long, default_value_t = 10)]
        loops: usize,
        /// Upper bound of the random pause between reads
        #[arg(long, default_value_t = 0)]
        pause_ms: u64,
    },
    /// Write VALUE to KEY repeatedly
    Writer {
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
        #[arg(long, default_value_t = 10)]
        loops: usize,
        #[arg(long, default_value_t = 0)]
        pause_ms: u64,
    },
    /// Seed 20 keys, run concurrent readers and writers, print the result
    Stress {
        #[arg(long, default_value_t = 10)]
        readers: usize,
        #[arg(long, default_value_t = 18)]
        writers: usize,
        #[arg(long, default_value_t = 10)]
        loops: usize,
        #[arg(long, default_value_t = 0)]
        pause_ms: u64,
    },
    /// Take the writer lock (or one reader slot), print `held`, and keep it
    /// until the process is killed
    #[command(hide = true)]
    Hold {
        #[arg(long)]
        reader: bool,
    },
}

fn parse_entry(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    Ok((key.to_string(), Value::parse_literal(value)))
}

impl Cli {
    fn config(&self) -> AccessorConfig {
        let mut config = AccessorConfig::new(self.path.clone())
            .with_max_readers(self.max_readers)
            .with_mode(self.mode);
        if let Some(dir) = &self.lock_dir {
            config = config.with_lock_dir(dir);
        }
        if let Some(ms) = self.lock_timeout_ms {
            config = config.with_lock_timeout(Duration::from_millis(ms));
        }
        config
    }

    /// Global options for a child process that must share this one's store
    /// and locks.
    fn child_args(&self, config: &AccessorConfig) -> Vec<String> {
        let mut args = vec![
            "--path".to_string(),
            config.path.display().to_string(),
            "--max-readers".to_string(),
            config.max_readers.to_string(),
            "--mode".to_string(),
            config.mode.to_string(),
            "--lock-dir".to_string(),
            config.lock_dir().display().to_string(),
            "--log-format".to_string(),
            match self.log_format {
                LogFormat::Text => "text",
                LogFormat::Json => "json",
            }
            .to_string(),
        ];
        if let Some(ms) = self.lock_timeout_ms {
            args.push("--lock-timeout-ms".to_string());
            args.push(ms.to_string());
        }
        args
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format)?;
    let config = cli.config();

    match &cli.command {
        Command::Init {
            entries,
            range,
            fill,
        } => {
            let mut initial: HashMap<String, Value> = HashMap::new();
            if let Some(n) = range {
                let fill = Value::parse_literal(fill);
                initial.extend((0..*n).map(|k| (k.to_string(), fill.clone())));
            }
            initial.extend(entries.iter().cloned());
            let count = initial.len();
            open_store(&config, Some(initial))?;
            println!("created {} with {count} entries", config.path.display());
        }
        Command::Get { key } => match open_store(&config, None)?.get(key)? {
            Some(value) => println!("{value}"),
            None => println!("<absent>"),
        },
        Command::Set { key, value } => {
            let persisted = open_store(&config, None)?.set(key.clone(), Value::parse_literal(value))?;
            println!("{}", if persisted { "ok" } else { "not persisted" });
        }
        Command::Delete { key } => {
            let removed = open_store(&config, None)?
                .delete(key)
                .with_context(|| format!("deleting {key:?}"))?;
            println!("{removed}");
        }
        Command::Dump => print_snapshot(&open_store(&config, None)?.snapshot()?),
        Command::Probe => {
            let exhausted = open_store(&config, None)?.is_reader_capacity_exhausted()?;
            println!("{}", if exhausted { "exhausted" } else { "available" });
        }
        Command::Reader {
            key,
            loops,
            pause_ms,
        } => {
            let accessor = open_store(&config, None)?;
            workload::run_reader(&accessor, key, *loops, Duration::from_millis(*pause_ms))?;
        }
        Command::Writer {
            key,
            value,
            loops,
            pause_ms,
        } => {
            let accessor = open_store(&config, None)?;
            let value = Value::parse_literal(value);
            workload::run_writer(&accessor, key, &value, *loops, Duration::from_millis(*pause_ms))?;
        }
        Command::Stress {
            readers,
            writers,
            loops,
            pause_ms,
        } => {
            let plan = StressPlan {
                readers: *readers,
                writers: *writers,
                loops: *loops,
                pause: Duration::from_millis(*pause_ms),
            };
            run_stress(&cli, &config, plan)?;
        }
        Command::Hold { reader } => {
            let accessor = open_store(&config, None)?;
            let deadline = config.lock_timeout.map(|timeout| Instant::now() + timeout);
            hold(accessor.shared_lock().as_ref(), *reader, deadline)?;
        }
    }
    Ok(())
}

fn open_store(
    config: &AccessorConfig,
    initial: Option<HashMap<String, Value>>,
) -> Result<SyncAccessor<String, Value>, AccessError> {
    match initial {
        Some(initial) => SyncAccessor::create(config, initial),
        None => SyncAccessor::open(config),
    }
}

fn hold(lock: &dyn AccessLock, reader: bool, deadline: Option<Instant>) -> Result<()> {
    if reader {
        let _slot = ReadGuard::acquire(lock, deadline)?;
        park()
    } else {
        let _exclusive = WriteGuard::acquire(lock, deadline)?;
        park()
    }
}

fn park() -> Result<()> {
    println!("held");
    io::stdout().flush().context("flushing stdout")?;
    tracing::info!(pid = std::process::id(), "holding lock until killed");
    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}

fn print_snapshot(snapshot: &HashMap<String, Value>) {
    let mut entries: Vec<_> = snapshot.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in entries {
        println!("{key}={value}");
    }
}

fn run_stress(cli: &Cli, config: &AccessorConfig, plan: StressPlan) -> Result<()> {
    let accessor = open_store(config, Some(workload::seed_snapshot(STRESS_KEYS)))?;

    match config.mode {
        LockMode::Threads => workload::run_thread_stress(&accessor, plan)?,
        LockMode::Processes => run_process_stress(cli, config, plan)?,
    }

    let snapshot = accessor.snapshot()?;
    print_snapshot(&snapshot);

    let problems = workload::verify_stress_snapshot(&snapshot, plan.writers);
    if !problems.is_empty() {
        bail!("stress run left an inconsistent store: {}", problems.join("; "));
    }
    Ok(())
}

/// Worker processes of one stress run. Any still running when the set is
/// dropped are killed and reaped.
#[derive(Default)]
struct Workers {
    children: Vec<Child>,
}

impl Workers {
    fn spawn(&mut self, command: &mut Process) -> io::Result<()> {
        self.children.push(command.spawn()?);
        Ok(())
    }

    /// Waits for every worker and returns how many exited unsuccessfully.
    fn wait_all(&mut self) -> Result<usize> {
        let mut failed = 0;
        while let Some(child) = self.children.first_mut() {
            let status = child.wait().context("waiting for worker")?;
            let child = self.children.remove(0);
            if !status.success() {
                tracing::error!(pid = child.id(), %status, "worker failed");
                failed += 1;
            }
        }
        Ok(failed)
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        for mut child in self.children.drain(..) {
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(err) = child.kill() {
                    tracing::warn!(pid = child.id(), error = %err, "failed to kill worker");
                }
            }
            if let Err(err) = child.wait() {
                tracing::warn!(pid = child.id(), error = %err, "failed to reap worker");
            }
        }
    }
}

/// Re-invokes this binary once per worker, all sharing the lock directory.
fn run_process_stress(cli: &Cli, config: &AccessorConfig, plan: StressPlan) -> Result<()> {
    let exe = env::current_exe().context("locating the flatkv executable")?;
    let common = cli.child_args(config);
    let loops = plan.loops.to_string();
    let pause_ms = plan.pause.as_millis().to_string();

    let mut workers = Workers::default();
    let mut spawn = |role_args: Vec<String>| -> Result<()> {
        workers
            .spawn(
                Process::new(&exe)
                    .args(&common)
                    .args(&role_args)
                    .stdout(Stdio::null()),
            )
            .with_context(|| format!("spawning worker {role_args:?}"))
    };

    for index in 0..plan.readers {
        spawn(vec![
            "reader".to_string(),
            "--key".to_string(),
            workload::reader_key(index),
            "--loops".to_string(),
            loops.clone(),
            "--pause-ms".to_string(),
            pause_ms.clone(),
        ])?;
    }
    for number in workload::writer_numbers(plan.writers) {
        let (key, value) = workload::writer_assignment(number);
        spawn(vec![
            "writer".to_string(),
            "--key".to_string(),
            key,
            "--value".to_string(),
            value.to_string(),
            "--loops".to_string(),
            loops.clone(),
            "--pause-ms".to_string(),
            pause_ms.clone(),
        ])?;
    }

    let failed = workers.wait_all()?;
    tracing::info!(
        readers = plan.readers,
        writers = plan.writers,
        loops = plan.loops,
        failed,
        "process stress run finished"
    );
    if failed > 0 {
        bail!("{failed} worker process(es) failed");
    }
    Ok(())
}
