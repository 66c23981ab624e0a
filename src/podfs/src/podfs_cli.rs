use dir_engine::{Namespace, NodeStat};
use log::info;
use pod_store::LocalStore;
use podfs_lib::{Compression, PodFsConfig, PodFsError, PodFsResult, PodPath};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::runtime::Runtime;

pub const DEFAULT_OWNER: &str = "0x0000000000000000000000000000000000000000";
pub const DEFAULT_POD_NAME: &str = "default";
pub const DEFAULT_CONFIG_FILE: &str = "podfs.json";

pub fn usage() -> String {
    format!(
        "usage: podfs <store-dir> [--config <path>] [--owner <addr>] [--pod <name>] <command> [args]\n\
         commands:\n\
         init\n\
         mkdir <path> [--mode <octal>]\n\
         put <local-file> <path> [--block-size <n>] [--compression <gzip|snappy>]\n\
         cat <path>\n\
         ls [path]\n\
         stat <path>\n\
         rm <path>\n\
         rmdir <path>\n\
         mv <from> <to>\n\
         chmod <octal-mode> <path>\n\
         write-at <path> <offset> <local-file> [--truncate]\n\
         defaults:\n\
         --config <store-dir>/{}\n\
         --owner {}\n\
         --pod {}",
        DEFAULT_CONFIG_FILE, DEFAULT_OWNER, DEFAULT_POD_NAME
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Init,
    Mkdir {
        path: PodPath,
        mode: u32,
    },
    Put {
        local: PathBuf,
        path: PodPath,
        block_size: u64,
        compression: Option<Compression>,
    },
    Cat {
        path: PodPath,
    },
    Ls {
        path: PodPath,
    },
    Stat {
        path: PodPath,
    },
    Rm {
        path: PodPath,
    },
    Rmdir {
        path: PodPath,
    },
    Mv {
        from: PodPath,
        to: PodPath,
    },
    Chmod {
        path: PodPath,
        mode: u32,
    },
    WriteAt {
        path: PodPath,
        offset: u64,
        local: PathBuf,
        truncate: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliOptions {
    pub store_dir: PathBuf,
    pub config_path: PathBuf,
    pub owner: String,
    pub pod_name: String,
    pub command: Command,
}

fn parse_mode(value: &str) -> Result<u32, String> {
    u32::from_str_radix(value.trim_start_matches("0o"), 8)
        .map_err(|e| format!("invalid octal mode {}: {}", value, e))
}

fn parse_number(value: &str, what: &str) -> Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|e| format!("invalid {} {}: {}", what, value, e))
}

fn positional<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("missing {}\n{}", what, usage()))
}

fn flag_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("missing value for {}", flag))
}

pub fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    if args.is_empty() || args[0] == "-h" || args[0] == "--help" {
        return Err(usage());
    }

    let store_dir = PathBuf::from(args[0].clone());
    let mut config_path = store_dir.join(DEFAULT_CONFIG_FILE);
    let mut owner = DEFAULT_OWNER.to_string();
    let mut pod_name = DEFAULT_POD_NAME.to_string();

    // global options come before the command, the rest is split into
    // positionals and command flags
    let mut i = 1usize;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => config_path = PathBuf::from(flag_value(args, &mut i, "--config")?),
            "--owner" => owner = flag_value(args, &mut i, "--owner")?.to_string(),
            "--pod" => pod_name = flag_value(args, &mut i, "--pod")?.to_string(),
            _ => break,
        }
        i += 1;
    }

    let command_name = positional(args, i, "command")?;
    let mut rest = Vec::new();
    let mut mode = None;
    let mut block_size = 0u64;
    let mut compression = None;
    let mut truncate = false;
    i += 1;
    while i < args.len() {
        match args[i].as_str() {
            "--mode" => mode = Some(parse_mode(flag_value(args, &mut i, "--mode")?)?),
            "--block-size" => {
                block_size = parse_number(flag_value(args, &mut i, "--block-size")?, "block size")?
            }
            "--compression" => {
                compression = Some(Compression::from_name(flag_value(
                    args,
                    &mut i,
                    "--compression",
                )?))
            }
            "--truncate" => truncate = true,
            other if other.starts_with("--") => {
                return Err(format!("unknown argument: {}\n{}", other, usage()));
            }
            other => rest.push(other.to_string()),
        }
        i += 1;
    }

    let path_at = |index: usize, what: &str| positional(&rest, index, what).map(PodPath::new);
    let command = match command_name {
        "init" => Command::Init,
        "mkdir" => Command::Mkdir {
            path: path_at(0, "path")?,
            mode: mode.unwrap_or(0),
        },
        "put" => Command::Put {
            local: PathBuf::from(positional(&rest, 0, "local file")?),
            path: path_at(1, "path")?,
            block_size,
            compression,
        },
        "cat" => Command::Cat {
            path: path_at(0, "path")?,
        },
        "ls" => Command::Ls {
            path: rest.first().map(PodPath::new).unwrap_or_else(PodPath::root),
        },
        "stat" => Command::Stat {
            path: path_at(0, "path")?,
        },
        "rm" => Command::Rm {
            path: path_at(0, "path")?,
        },
        "rmdir" => Command::Rmdir {
            path: path_at(0, "path")?,
        },
        "mv" => Command::Mv {
            from: path_at(0, "source")?,
            to: path_at(1, "destination")?,
        },
        "chmod" => Command::Chmod {
            mode: parse_mode(positional(&rest, 0, "mode")?)?,
            path: path_at(1, "path")?,
        },
        "write-at" => Command::WriteAt {
            path: path_at(0, "path")?,
            offset: parse_number(positional(&rest, 1, "offset")?, "offset")?,
            local: PathBuf::from(positional(&rest, 2, "local file")?),
            truncate,
        },
        other => return Err(format!("unknown command: {}\n{}", other, usage())),
    };

    Ok(CliOptions {
        store_dir,
        config_path,
        owner,
        pod_name,
        command,
    })
}

async fn open_namespace(options: &CliOptions) -> PodFsResult<Namespace> {
    let config = PodFsConfig::load(&options.config_path).await?;
    let store = Arc::new(LocalStore::open(options.store_dir.clone()).await?);
    if options.command == Command::Init {
        Namespace::create(
            &options.pod_name,
            &options.owner,
            store.clone(),
            store,
            config,
        )
        .await
    } else {
        Namespace::open(
            &options.pod_name,
            &options.owner,
            store.clone(),
            store,
            config,
        )
        .await
    }
}

async fn open_local(path: &PathBuf) -> PodFsResult<(tokio::fs::File, u64)> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        PodFsError::IoError(format!("open {} failed: {}", path.display(), e))
    })?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}

fn encode_json<T: serde::Serialize>(value: &T) -> PodFsResult<Vec<u8>> {
    let mut out = serde_json::to_vec_pretty(value)
        .map_err(|e| PodFsError::Internal(format!("encode output failed: {}", e)))?;
    out.push(b'\n');
    Ok(out)
}

/// Run one command and return what it prints.
pub async fn execute(options: &CliOptions) -> PodFsResult<Vec<u8>> {
    let ns = open_namespace(options).await?;
    let out = match &options.command {
        Command::Init => format!("initialized {} for {}\n", ns.name(), options.owner).into_bytes(),
        Command::Mkdir { path, mode } => {
            ns.mkdir(path, *mode).await?;
            Vec::new()
        }
        Command::Put {
            local,
            path,
            block_size,
            compression,
        } => {
            let (file, size) = open_local(local).await?;
            let meta = ns
                .upload(file, path, size, *block_size, compression.clone())
                .await?;
            format!("{} {} bytes {}\n", path, meta.file_size, meta.content_type).into_bytes()
        }
        Command::Cat { path } => {
            let (mut reader, size) = ns.download(path).await?;
            let mut out = Vec::with_capacity(size as usize);
            reader.read_to_end(&mut out).await?;
            out
        }
        Command::Ls { path } => {
            let listing = ns.list(path).await?;
            let mut out = String::new();
            for dir in listing.dirs.iter() {
                out.push_str(&format!("d {:o} {}/\n", dir.meta.mode & 0o7777, dir.meta.name));
            }
            for meta in ns.files().list_files(&listing.files).await? {
                out.push_str(&format!(
                    "f {:o} {} {}\n",
                    meta.mode & 0o7777,
                    meta.file_name,
                    meta.file_size
                ));
            }
            out.into_bytes()
        }
        Command::Stat { path } => match ns.stat(path).await? {
            NodeStat::File(stats) => encode_json(&stats)?,
            NodeStat::Dir(stats) => encode_json(&stats)?,
        },
        Command::Rm { path } => {
            ns.rm_file(path).await?;
            Vec::new()
        }
        Command::Rmdir { path } => {
            ns.rmdir(path).await?;
            Vec::new()
        }
        Command::Mv { from, to } => {
            ns.rename(from, to).await?;
            Vec::new()
        }
        Command::Chmod { path, mode } => {
            ns.chmod(path, *mode).await?;
            Vec::new()
        }
        Command::WriteAt {
            path,
            offset,
            local,
            truncate,
        } => {
            let (file, _) = open_local(local).await?;
            let written = ns.write_at(path, file, *offset, *truncate).await?;
            format!("{} bytes written to {}\n", written, path).into_bytes()
        }
    };
    info!("{:?} done", options.command);
    Ok(out)
}

pub fn run_podfs(options: CliOptions) -> PodFsResult<()> {
    let runtime = Runtime::new()?;
    let out = runtime.block_on(execute(&options))?;
    use std::io::Write;
    let mut stdout = std::io::stdout();
    stdout.write_all(&out)?;
    stdout.flush()?;
    Ok(())
}
