use crate::podfs_cli::{execute, parse_args, CliOptions, Command, DEFAULT_OWNER};
use podfs_lib::{Compression, PodPath};
use std::path::Path;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn args(store: &Path, rest: &[&str]) -> Vec<String> {
    let mut out = vec![store.display().to_string()];
    out.extend(rest.iter().map(|s| s.to_string()));
    out
}

fn run(runtime: &Runtime, store: &Path, rest: &[&str]) -> Vec<u8> {
    let options = parse_args(&args(store, rest)).expect("parse args");
    runtime.block_on(execute(&options)).expect("execute")
}

fn run_text(runtime: &Runtime, store: &Path, rest: &[&str]) -> String {
    String::from_utf8(run(runtime, store, rest)).expect("utf8 output")
}

#[test]
fn test_parse_global_options() {
    let parsed = parse_args(&args(
        Path::new("/tmp/store"),
        &["--owner", "0xabc", "--pod", "photos", "ls", "/album"],
    ))
    .expect("parse");
    assert_eq!(parsed.owner, "0xabc");
    assert_eq!(parsed.pod_name, "photos");
    assert_eq!(parsed.config_path, Path::new("/tmp/store/podfs.json"));
    assert_eq!(
        parsed.command,
        Command::Ls {
            path: PodPath::new("/album")
        }
    );

    let parsed = parse_args(&args(Path::new("/tmp/store"), &["ls"])).expect("parse");
    assert_eq!(parsed.owner, DEFAULT_OWNER);
    assert_eq!(
        parsed.command,
        Command::Ls {
            path: PodPath::root()
        }
    );
}

#[test]
fn test_parse_command_flags() {
    let parsed = parse_args(&args(
        Path::new("/s"),
        &[
            "put",
            "local.bin",
            "/docs/a.bin",
            "--block-size",
            "4096",
            "--compression",
            "gzip",
        ],
    ))
    .expect("parse put");
    assert_eq!(
        parsed.command,
        Command::Put {
            local: "local.bin".into(),
            path: PodPath::new("/docs/a.bin"),
            block_size: 4096,
            compression: Some(Compression::from_name("gzip")),
        }
    );

    let parsed = parse_args(&args(Path::new("/s"), &["chmod", "0755", "/docs"])).expect("chmod");
    assert_eq!(
        parsed.command,
        Command::Chmod {
            path: PodPath::new("/docs"),
            mode: 0o755,
        }
    );

    let parsed = parse_args(&args(
        Path::new("/s"),
        &["write-at", "/a.txt", "12", "patch.txt", "--truncate"],
    ))
    .expect("write-at");
    assert_eq!(
        parsed.command,
        Command::WriteAt {
            path: PodPath::new("/a.txt"),
            offset: 12,
            local: "patch.txt".into(),
            truncate: true,
        }
    );
}

#[test]
fn test_parse_errors() {
    assert!(parse_args(&[]).is_err());
    assert!(parse_args(&["--help".to_string()]).is_err());
    assert!(parse_args(&args(Path::new("/s"), &[])).is_err());
    assert!(parse_args(&args(Path::new("/s"), &["frobnicate"])).is_err());
    assert!(parse_args(&args(Path::new("/s"), &["mv", "/a"])).is_err());
    assert!(parse_args(&args(Path::new("/s"), &["chmod", "9z", "/a"])).is_err());
    assert!(parse_args(&args(Path::new("/s"), &["--owner"])).is_err());
    assert!(parse_args(&args(Path::new("/s"), &["ls", "--bogus"])).is_err());

    let err = parse_args(&args(Path::new("/s"), &["put", "--block-size", "many", "a", "/a"]))
        .expect_err("bad block size");
    assert!(err.contains("block size"));
}

#[test]
fn test_commands_against_local_store() {
    let tmp = TempDir::new().expect("create temp dir");
    let runtime = Runtime::new().expect("create runtime");
    let store = tmp.path().join("store");
    let local = tmp.path().join("hello.txt");
    let patch = tmp.path().join("patch.txt");
    std::fs::write(&local, b"hello world").expect("write local file");
    std::fs::write(&patch, b"WORLD").expect("write patch file");
    let local = local.display().to_string();
    let patch = patch.display().to_string();

    let out = run_text(&runtime, &store, &["init"]);
    assert!(out.starts_with("initialized default"));

    run(&runtime, &store, &["mkdir", "/docs"]);
    let out = run_text(&runtime, &store, &["put", &local, "/docs/hello.txt", "--block-size", "4"]);
    assert!(out.contains("11 bytes"));

    let listing = run_text(&runtime, &store, &["ls", "/docs"]);
    assert!(listing.contains("hello.txt 11"));
    let listing = run_text(&runtime, &store, &["ls"]);
    assert!(listing.contains("docs/"));

    run(&runtime, &store, &["write-at", "/docs/hello.txt", "6", &patch]);
    assert_eq!(
        run(&runtime, &store, &["cat", "/docs/hello.txt"]),
        b"hello WORLD".to_vec()
    );

    run(&runtime, &store, &["chmod", "600", "/docs/hello.txt"]);
    let stat = run_text(&runtime, &store, &["stat", "/docs/hello.txt"]);
    let value: serde_json::Value = serde_json::from_str(&stat).expect("stat json");
    assert_eq!(value["meta"]["file_size"], 11);
    assert_eq!(value["meta"]["mode"].as_u64().map(|m| m & 0o777), Some(0o600));

    run(&runtime, &store, &["mv", "/docs", "/papers"]);
    assert_eq!(
        run(&runtime, &store, &["cat", "/papers/hello.txt"]),
        b"hello WORLD".to_vec()
    );
    let missing = parse_args(&args(&store, &["cat", "/docs/hello.txt"])).expect("parse");
    assert!(runtime.block_on(execute(&missing)).is_err());

    let rmdir: CliOptions = parse_args(&args(&store, &["rmdir", "/papers"])).expect("parse");
    assert!(runtime.block_on(execute(&rmdir)).is_err());
    run(&runtime, &store, &["rm", "/papers/hello.txt"]);
    run(&runtime, &store, &["rmdir", "/papers"]);
    assert_eq!(run_text(&runtime, &store, &["ls"]), "");
}

#[test]
fn test_init_twice_fails() {
    let tmp = TempDir::new().expect("create temp dir");
    let runtime = Runtime::new().expect("create runtime");
    run(&runtime, tmp.path(), &["init"]);
    let again = parse_args(&args(tmp.path(), &["init"])).expect("parse");
    assert!(runtime.block_on(execute(&again)).is_err());
}
