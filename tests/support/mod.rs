//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use gammapipe::provision::{CommandOutput, CommandRunner, CommandSpec, Downloader, ProvisionError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

pub fn gammapipe_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.join("gammapipe")
}

/// Copies every regular file of a fixture directory into `dest`.
pub fn copy_fixture(name: &str, dest: &Path) {
    std::fs::create_dir_all(dest).unwrap();
    for entry in std::fs::read_dir(fixtures_dir().join(name)).unwrap() {
        let entry = entry.unwrap();
        if entry.file_type().unwrap().is_file() {
            std::fs::copy(entry.path(), dest.join(entry.file_name())).unwrap();
        }
    }
}

/// Writes fake installer bytes, or fails like an unreachable host.
pub struct FakeDownloader {
    pub fail: bool,
    pub urls: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn ok() -> Self {
        Self {
            fail: false,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail: true,
            urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, ProvisionError> {
        self.urls.lock().unwrap().push(url.to_string());
        let body = b"#!/bin/bash\necho installer\n";
        // Leave a partial file behind like an interrupted transfer would.
        std::fs::write(dest, &body[..8]).unwrap();
        if self.fail {
            return Err(ProvisionError::Network {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        std::fs::write(dest, body).unwrap();
        Ok(body.len() as u64)
    }
}

pub const HOOK_OUTPUT: &str = "# >>> conda initialize >>>\n\
export CONDA_EXE='/t/bin/conda'\n\
\n\
__conda_setup=\"$('/t/bin/conda' 'shell.bash' 'hook')\"\n\
# <<< conda initialize <<<\n";

/// Pretends to be the installer and the environment manager.
///
/// The install step populates the target like a real batch install does.
#[derive(Default)]
pub struct FakeRunner {
    pub fail_env_create: bool,
    pub calls: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn failing_env_create() -> Self {
        Self {
            fail_env_create: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        if spec.program == Path::new("bash") {
            let target = PathBuf::from(&spec.args[3]);
            std::fs::create_dir_all(target.join("bin"))?;
            std::fs::write(target.join("bin").join("conda"), "")?;
            return Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            });
        }

        match spec.args.first().map(String::as_str) {
            Some("env") if self.fail_env_create => Ok(CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "PackagesNotFoundError: fermitools>=2.2\n".to_string(),
            }),
            Some("shell.bash") => Ok(CommandOutput {
                code: Some(0),
                stdout: HOOK_OUTPUT.to_string(),
                stderr: String::new(),
            }),
            _ => Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            }),
        }
    }
}
