use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use mcsm_protocol::utils::Encoding;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

pub struct ProcessStartInfo {
    pub target: String,
    pub args: Vec<String>,
    pub envs: HashMap<OsString, OsString>,
    pub working_dir: PathBuf,
    pub java_path: String,
}

/// Spawns the server with all three standard streams piped.
pub fn spawn_process(start_info: ProcessStartInfo) -> std::io::Result<Child> {
    let mut cmd = Command::new(&start_info.target);
    cmd.args(&start_info.args)
        .current_dir(&start_info.working_dir)
        .env_clear()
        .envs(&start_info.envs)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // the java binary's directory goes first on PATH
    let java_dir = Path::new(&start_info.java_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.is_empty());
    if let Some(java_dir) = java_dir {
        let origin_path = start_info
            .envs
            .get(&OsString::from("PATH"))
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        cmd.env(
            "PATH",
            if cfg!(windows) {
                format!("{};{}", java_dir, origin_path)
            } else {
                format!("{}:{}", java_dir, origin_path)
            },
        );
    }

    cmd.spawn()
}

/// Reads `reader` line by line, decoding with `encoding`, until EOF or a read error.
pub async fn read_lines<R, F>(reader: R, encoding: Encoding, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                on_line(encoding.decode(&buf));
            }
        }
    }
}
