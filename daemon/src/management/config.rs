use crate::management::comm::ProcessStartInfo;
use crate::management::error::InstanceError;
use lazy_static::lazy_static;
use log::warn;
use mcsm_protocol::management::instance::{FlagsPreset, InstanceConfig};
use mcsm_protocol::utils::PlaceHolderRender;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

/// File name of the runnable artifact inside the working directory.
pub const SERVER_JAR: &str = "server.jar";

lazy_static! {
    static ref STRING_ENVS: HashMap<String, String> = {
        std::env::vars_os()
            .map(|(var, value)| {
                (
                    var.to_string_lossy().to_string(),
                    value.to_string_lossy().to_string(),
                )
            })
            .collect()
    };
}

const AIKAR_FLAGS: &[&str] = &[
    "-XX:+UseG1GC",
    "-XX:+ParallelRefProcEnabled",
    "-XX:MaxGCPauseMillis=200",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+DisableExplicitGC",
    "-XX:+AlwaysPreTouch",
    "-XX:G1NewSizePercent=30",
    "-XX:G1MaxNewSizePercent=40",
    "-XX:G1HeapRegionSize=8M",
    "-XX:G1ReservePercent=20",
    "-XX:G1HeapWastePercentage=5",
    "-XX:G1MixedGCCountTarget=4",
    "-XX:InitiatingHeapOccupancyPercent=15",
    "-XX:G1MixedGCLiveThresholdPercent=90",
    "-XX:G1RSetUpdatingPauseTimePercent=5",
    "-XX:SurvivorRatio=32",
    "-XX:+PerfDisableSharedMem",
    "-XX:MaxTenuringThreshold=1",
    "-Dusing.aikars.flags=https://mcflags.emc.gs",
    "-Daikars.new.flags=true",
];

const ZGC_FLAGS: &[&str] = &["-XX:+UseZGC", "-XX:+ZGenerational", "-XX:+AlwaysPreTouch"];

const PERFORMANCE_FLAGS: &[&str] = &[
    "-XX:+AlwaysPreTouch",
    "-XX:+DisableExplicitGC",
    "-XX:+PerfDisableSharedMem",
    "-XX:+UseStringDeduplication",
];

pub trait InstanceConfigExt {
    fn jar_path(&self) -> PathBuf;
    fn jvm_flags(&self) -> Vec<String>;
    fn launch_vars(&self) -> HashMap<String, String>;

    /// Program and arguments, from the explicit launch command or the memory/flags form.
    fn get_launch_script(&self) -> Result<(String, Vec<String>), InstanceError>;
    fn get_start_info(&self) -> Result<ProcessStartInfo, InstanceError>;

    /// Keys kept in sync in `server.properties` before every start.
    fn managed_properties(&self) -> Vec<(&'static str, String)>;
}

impl InstanceConfigExt for InstanceConfig {
    fn jar_path(&self) -> PathBuf {
        self.working_dir.join(SERVER_JAR)
    }

    fn jvm_flags(&self) -> Vec<String> {
        let preset: &[&str] = match self.flags_preset {
            FlagsPreset::None => &[],
            FlagsPreset::Aikar => AIKAR_FLAGS,
            FlagsPreset::Zgc => ZGC_FLAGS,
        };
        let mut flags: Vec<String> = preset.iter().map(|f| f.to_string()).collect();
        if self.performance_mode {
            for flag in PERFORMANCE_FLAGS {
                if !flags.iter().any(|f| f == flag) {
                    flags.push(flag.to_string());
                }
            }
        }
        flags
    }

    fn launch_vars(&self) -> HashMap<String, String> {
        HashMap::from([
            ("java".to_string(), self.java_path.clone()),
            ("min_memory".to_string(), self.min_memory.to_string()),
            ("max_memory".to_string(), self.max_memory.to_string()),
            ("jar".to_string(), SERVER_JAR.to_string()),
            ("port".to_string(), self.port.to_string()),
            ("flags".to_string(), self.jvm_flags().join(" ")),
        ])
    }

    fn get_launch_script(&self) -> Result<(String, Vec<String>), InstanceError> {
        if let Some(command) = self.launch_command.as_deref().filter(|c| !c.trim().is_empty()) {
            let rendered = command
                .render(&self.launch_vars())
                .map_err(|e| InstanceError::Launch(format!("bad launch command: {}", e)))?;
            let mut parts = split_command(&rendered).into_iter();
            let target = parts
                .next()
                .ok_or_else(|| InstanceError::Launch("launch command is empty".into()))?;
            return Ok((target, parts.collect()));
        }

        let jar = self.jar_path();
        if !jar.is_file() {
            return Err(InstanceError::Launch(format!(
                "runnable artifact {} is missing",
                jar.display()
            )));
        }

        let mut args = vec![
            format!("-Xms{}M", self.min_memory),
            format!("-Xmx{}M", self.max_memory),
        ];
        args.extend(self.jvm_flags());
        args.push("-jar".into());
        args.push(SERVER_JAR.into());
        args.push("nogui".into());
        Ok((self.java_path.clone(), args))
    }

    fn get_start_info(&self) -> Result<ProcessStartInfo, InstanceError> {
        let mut envs: HashMap<OsString, OsString> = std::env::vars_os().collect();
        for (key, value) in &self.env {
            let rendered = match value.render(&STRING_ENVS) {
                Ok(rendered) => rendered,
                Err(e) => {
                    warn!(
                        "Failed to render environment variable {}: {}, used verbatim",
                        key, e
                    );
                    value.clone()
                }
            };
            envs.insert(OsString::from(key), OsString::from(rendered));
        }
        let (target, args) = self.get_launch_script()?;
        Ok(ProcessStartInfo {
            target,
            args,
            envs,
            working_dir: self.working_dir.clone(),
            java_path: self.java_path.clone(),
        })
    }

    fn managed_properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("server-port", self.port.to_string()),
            ("max-players", self.max_players.to_string()),
        ]
    }
}

/// Splits a command line on whitespace, honouring single and double quotes.
pub fn split_command(command: &str) -> Vec<String> {
    let mut parts = vec![];
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    parts.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        parts.push(current);
    }
    parts
}
