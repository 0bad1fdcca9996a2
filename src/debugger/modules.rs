//! Per-tracee view of loaded images: module name → load base, read from
//! `/proc/<pid>/maps`. Resolution of `(module, offset)` pairs is lazy
//! and re-tried after `exec` replaces the image.

use itertools::Itertools;
use log::debug;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::Path;

use crate::debugger::error::Error;

#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    /// Full mapping pathname → lowest mapped address of that file.
    bases: HashMap<String, u64>,
}

impl ModuleMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot the tracee's currently loaded images.
    pub fn inspect(pid: Pid) -> Result<Self, Error> {
        let ranges = proc_maps::get_process_maps(pid.as_raw()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NoSuchProcess(pid)
            } else {
                Error::IO(e)
            }
        })?;

        let map = Self::from_entries(ranges.iter().filter_map(|range| {
            let path = range.filename()?;
            Some((path.to_string_lossy().into_owned(), range.start() as u64))
        }));
        debug!(target: "debugger", "module map for {pid}: {} images", map.bases.len());
        Ok(map)
    }

    fn from_entries(entries: impl IntoIterator<Item = (String, u64)>) -> Self {
        let bases = entries
            .into_iter()
            .into_group_map()
            .into_iter()
            .filter_map(|(name, starts)| Some((name, starts.into_iter().min()?)))
            .collect();
        Self { bases }
    }

    /// Load base of `module`, matched by full pathname or by file name.
    pub fn base_of(&self, module: &str) -> Option<u64> {
        if let Some(base) = self.bases.get(module) {
            return Some(*base);
        }
        self.bases
            .iter()
            .find(|(name, _)| {
                Path::new(name)
                    .file_name()
                    .map(|f| f == Path::new(module).as_os_str() || f.to_string_lossy() == module)
                    .unwrap_or(false)
            })
            .map(|(_, base)| *base)
    }

    /// Absolute address of `module + offset` in this tracee.
    pub fn resolve(&self, module: &str, offset: u64) -> Result<u64, Error> {
        self.base_of(module)
            .map(|base| base + offset)
            .ok_or_else(|| Error::Unresolved(module.to_string()))
    }
}
