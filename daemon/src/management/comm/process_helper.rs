use log::debug;
use std::io;
#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(windows)]
use winapi::shared::minwindef::{DWORD, FALSE};
#[cfg(windows)]
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
#[cfg(windows)]
use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
#[cfg(windows)]
use winapi::um::tlhelp32::{
    CreateToolhelp32Snapshot, Process32First, Process32Next, PROCESSENTRY32, TH32CS_SNAPPROCESS,
};
#[cfg(windows)]
use winapi::um::winnt::PROCESS_TERMINATE;

pub struct ProcessHelper;

/// Toolhelp snapshot handle, closed on drop.
#[cfg(windows)]
struct Snapshot(winapi::um::winnt::HANDLE);

#[cfg(windows)]
impl Snapshot {
    fn processes() -> io::Result<Self> {
        let handle = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(handle))
    }
}

#[cfg(windows)]
impl Drop for Snapshot {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

impl ProcessHelper {
    /// Forcefully kills the process: SIGKILL on Unix, TerminateProcess on Windows.
    pub fn kill(pid: u32) -> io::Result<()> {
        #[cfg(unix)]
        {
            kill(Pid::from_raw(pid as i32), Signal::SIGKILL).map_err(io::Error::other)
        }
        #[cfg(windows)]
        {
            let handle = unsafe { OpenProcess(PROCESS_TERMINATE, FALSE, pid) };
            if handle.is_null() || handle == INVALID_HANDLE_VALUE {
                return Err(io::Error::last_os_error());
            }
            let result = unsafe { TerminateProcess(handle, 1) };
            unsafe { CloseHandle(handle) };
            if result == 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }

    /// Kills the direct children of `pid` (a launcher script's java process), then `pid`.
    pub fn kill_tree(pid: u32) -> io::Result<()> {
        match Self::child_id(pid) {
            Ok(children) => {
                for child in children {
                    if let Err(err) = Self::kill(child) {
                        debug!("could not kill child process {} of {}: {}", child, pid, err);
                    }
                }
            }
            Err(err) => debug!("could not list children of {}: {}", pid, err),
        }
        Self::kill(pid)
    }

    /// Direct children of `parent_pid`, from a toolhelp process snapshot.
    #[cfg(windows)]
    pub fn child_id(parent_pid: u32) -> io::Result<Vec<u32>> {
        let snapshot = Snapshot::processes()?;
        let mut entry: PROCESSENTRY32 = unsafe { std::mem::zeroed() };
        entry.dwSize = std::mem::size_of::<PROCESSENTRY32>() as DWORD;

        let mut children = vec![];
        let mut found = unsafe { Process32First(snapshot.0, &mut entry) } != 0;
        while found {
            if entry.th32ParentProcessID == parent_pid {
                children.push(entry.th32ProcessID);
            }
            found = unsafe { Process32Next(snapshot.0, &mut entry) } != 0;
        }
        Ok(children)
    }

    /// Direct children of `parent_pid`, found by scanning `/proc/<pid>/stat`.
    #[cfg(unix)]
    pub fn child_id(parent_pid: u32) -> io::Result<Vec<u32>> {
        use std::fs;
        let mut result = Vec::new();

        for entry in fs::read_dir("/proc")? {
            let entry = entry?;
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) else {
                continue;
            };
            // the command name may contain spaces; fields after it are fixed
            let Some((_, rest)) = stat.rsplit_once(')') else {
                continue;
            };
            let ppid = rest.split_whitespace().nth(1).and_then(|p| p.parse::<u32>().ok());
            if ppid == Some(parent_pid) {
                result.push(pid);
            }
        }
        Ok(result)
    }
}
