//! Client side of the process-tree traversal service.
//!
//! The service is a kernel module. Loading it with `insmod` runs the first
//! traversal; later requests are written to its character device as
//! `"<pid> <option>"` followed by a NUL byte. Results go to the kernel log.

use crate::command::ExitCode;
use crate::executor::run_program;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalOrder {
    #[default]
    DepthFirst,
    BreadthFirst,
}

impl TraversalOrder {
    /// Option word understood by the module.
    pub fn flag(self) -> &'static str {
        match self {
            TraversalOrder::DepthFirst => "-d",
            TraversalOrder::BreadthFirst => "-b",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalRequest {
    pub pid: u32,
    pub order: TraversalOrder,
}

impl TraversalRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = format!("{} {}", self.pid, self.order.flag()).into_bytes();
        bytes.push(0);
        bytes
    }
}

/// Write one request to the device.
pub fn send(device: &Path, request: &TraversalRequest) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .with_context(|| format!("pstraverse: can't open {}", device.display()))?;
    file.write_all(&request.encode())
        .with_context(|| format!("pstraverse: can't write to {}", device.display()))?;
    info!(pid = request.pid, order = request.order.flag(), "sent traversal request");
    Ok(())
}

/// Insert the module; its parameters describe the first traversal.
pub fn load_module(module: &Path, request: &TraversalRequest) -> Result<ExitCode> {
    let module = module.to_string_lossy();
    let pid = format!("pid={}", request.pid);
    let option = format!("option={}", request.order.flag());
    run_program("sudo", &["insmod", &*module, pid.as_str(), option.as_str()])
}

pub fn unload_module(module: &Path) -> Result<ExitCode> {
    run_program("sudo", &["rmmod", &*module.to_string_lossy()])
}
