use crate::utils::errors::ExperimentError;
use sysinfo::System;
use users::{Users, UsersCache};

pub fn resolve_username(uid: u32, users_cache: &UsersCache) -> String {
    users_cache
        .get_user_by_uid(uid)
        .map(|user| user.name().to_string_lossy().to_string())
        .unwrap_or_else(|| uid.to_string())
}

/// Name of the effective user, falling back to the numeric uid.
pub fn effective_username() -> String {
    let users_cache = UsersCache::new();
    resolve_username(users::get_effective_uid(), &users_cache)
}

/// True when the process runs with an effective uid of 0.
pub fn is_privileged() -> bool {
    users::get_effective_uid() == 0
}

/// Number of logical CPUs seen by the OS.
pub fn logical_cpu_count() -> usize {
    let mut system = System::new();
    system.refresh_cpu_all();
    system.cpus().len()
}

/// Average current frequency across logical CPUs, in MHz. `None` if the OS does not report it.
pub fn current_frequency_mhz() -> Option<u32> {
    let mut system = System::new();
    system.refresh_cpu_all();
    let freqs: Vec<u64> = system
        .cpus()
        .iter()
        .map(|cpu| cpu.frequency())
        .filter(|&f| f > 0)
        .collect();
    if freqs.is_empty() {
        return None;
    }
    Some((freqs.iter().sum::<u64>() / freqs.len() as u64) as u32)
}

/// Parses a kernel cpulist such as `0`, `0-3` or `0-1,8-9`.
pub fn parse_cpu_list(cpulist: &str) -> Result<Vec<u32>, ExperimentError> {
    let trimmed = cpulist.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut cpus = Vec::new();
    for item in trimmed.split(',') {
        let bounds = item
            .split('-')
            .map(|s| s.trim().parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|e| ExperimentError::PowerControlUnavailable(format!("invalid cpu list '{trimmed}': {e}")))?;

        match *bounds.as_slice() {
            [start, end] if start <= end => cpus.extend(start..=end),
            [n] => cpus.push(n),
            _ => {
                return Err(ExperimentError::PowerControlUnavailable(format!(
                    "invalid cpu list item '{item}'"
                )));
            }
        }
    }
    Ok(cpus)
}
