//! Separate `flatkv` processes sharing one store file and lock directory.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Output, Stdio};

const BIN: &str = env!("CARGO_BIN_EXE_flatkv");

/// `flatkv` with the shared global options and `extra` ahead of `args`.
fn command(store: &Path, extra: &[&str], args: &[&str]) -> Command {
    let mut command = Command::new(BIN);
    command
        .arg("--path")
        .arg(store)
        .args(["--mode", "processes", "--max-readers", "10"])
        .args(extra)
        .args(args)
        .env("RUST_LOG", "warn");
    command
}

fn flatkv(store: &Path, args: &[&str]) -> Output {
    command(store, &[], args).output().unwrap()
}

fn flatkv_with_timeout(store: &Path, timeout_ms: &str, args: &[&str]) -> Output {
    command(store, &["--lock-timeout-ms", timeout_ms], args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "flatkv failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn write_in_one_process_is_read_by_another() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.bin");

    stdout(&flatkv(&store, &["init", "--range", "20", "--fill", "false"]));
    assert_eq!(stdout(&flatkv(&store, &["set", "5", "x"])).trim(), "ok");
    assert_eq!(stdout(&flatkv(&store, &["get", "5"])).trim(), "x");
    assert_eq!(stdout(&flatkv(&store, &["get", "6"])).trim(), "false");
    assert_eq!(stdout(&flatkv(&store, &["get", "missing"])).trim(), "<absent>");
}

#[test]
fn delete_of_missing_key_fails_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.bin");

    stdout(&flatkv(&store, &["init", "--entry", "a=1"]));
    assert_eq!(stdout(&flatkv(&store, &["delete", "a"])).trim(), "1");

    let second = flatkv(&store, &["delete", "a"]);
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("not found"));
}

#[test]
fn dump_sorts_and_capacity_is_free() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.bin");

    stdout(&flatkv(
        &store,
        &["init", "--entry", "b=2", "--entry", "a=hello", "--entry", "c=true"],
    ));
    assert_eq!(stdout(&flatkv(&store, &["dump"])), "a=hello\nb=2\nc=true\n");
    assert_eq!(stdout(&flatkv(&store, &["probe"])).trim(), "available");
}

#[test]
fn killed_holder_releases_its_locks() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.bin");
    stdout(&flatkv(&store, &["init", "--range", "3"]));

    let mut holder = command(&store, &[], &["hold"])
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let mut line = String::new();
    BufReader::new(holder.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    assert_eq!(line.trim(), "held");

    let blocked = flatkv_with_timeout(&store, "200", &["get", "0"]);
    assert!(!blocked.status.success());
    assert!(String::from_utf8_lossy(&blocked.stderr).contains("timed out"));

    holder.kill().unwrap();
    holder.wait().unwrap();

    assert_eq!(stdout(&flatkv_with_timeout(&store, "500", &["probe"])).trim(), "available");
    assert_eq!(stdout(&flatkv_with_timeout(&store, "500", &["set", "k", "v"])).trim(), "ok");
    assert_eq!(stdout(&flatkv(&store, &["get", "k"])).trim(), "v");
}

#[test]
fn killed_reader_frees_its_slot() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.bin");
    stdout(&flatkv(&store, &["init"]));

    let mut holders: Vec<_> = (0..10)
        .map(|_| {
            let mut holder = command(&store, &[], &["hold", "--reader"])
                .stdout(Stdio::piped())
                .spawn()
                .unwrap();
            let mut line = String::new();
            BufReader::new(holder.stdout.take().unwrap())
                .read_line(&mut line)
                .unwrap();
            assert_eq!(line.trim(), "held");
            holder
        })
        .collect();
    assert_eq!(stdout(&flatkv(&store, &["probe"])).trim(), "exhausted");

    let mut killed = holders.pop().unwrap();
    killed.kill().unwrap();
    killed.wait().unwrap();
    assert_eq!(stdout(&flatkv(&store, &["probe"])).trim(), "available");

    for mut holder in holders {
        holder.kill().unwrap();
        holder.wait().unwrap();
    }
    assert_eq!(stdout(&flatkv_with_timeout(&store, "500", &["set", "k", "1"])).trim(), "ok");
}

#[test]
fn concurrent_writer_processes_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.bin");
    stdout(&flatkv(&store, &["init"]));

    let children: Vec<_> = (0..6)
        .map(|n| {
            Command::new(BIN)
                .arg("--path")
                .arg(&store)
                .args(["--mode", "processes", "--max-readers", "10", "writer"])
                .args(["--key", &format!("k{n}"), "--value", &n.to_string()])
                .args(["--loops", "3"])
                .env("RUST_LOG", "warn")
                .spawn()
                .unwrap()
        })
        .collect();
    for mut child in children {
        assert!(child.wait().unwrap().success());
    }

    let dump = stdout(&flatkv(&store, &["dump"]));
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines, ["k0=0", "k1=1", "k2=2", "k3=3", "k4=4", "k5=5"]);
}

#[test]
fn process_stress_keeps_layout() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.bin");

    let out = stdout(&flatkv(
        &store,
        &["stress", "--readers", "4", "--writers", "6", "--loops", "3", "--pause-ms", "2"],
    ));
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 20);
    for k in 0..10 {
        assert!(lines.contains(&format!("{k}=false").as_str()), "{out}");
    }
}
