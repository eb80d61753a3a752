// See https://www.kernel.org/doc/html/latest/power/powercap/powercap.html
// for the layout of the powercap sysfs tree.

use crate::collectors::{ChannelReading, CounterProbe, EnergyCounterSource};
use crate::utils::errors::ExperimentError;
use log::debug;
use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

pub const POWERCAP_RAPL_PATH: &str = "/sys/devices/virtual/powercap/intel-rapl";
const ZONE_PREFIX: &str = "intel-rapl:";
const MICROJOULES_PER_JOULE: f64 = 1_000_000.0;

/// An `energy_uj` file kept open for repeated reads.
struct OpenedZone {
    name: String,
    file: File,
}

impl OpenedZone {
    fn open(zone_dir: &Path, name: String) -> Result<Self, ExperimentError> {
        let energy_path = zone_dir.join("energy_uj");
        let file = File::open(&energy_path).map_err(|e| {
            ExperimentError::MeterUnavailable(format!("could not open {}: {e}", energy_path.display()))
        })?;
        Ok(Self { name, file })
    }

    fn read_joules(&mut self, buf: &mut Vec<u8>) -> Result<f64, ExperimentError> {
        buf.clear();
        self.file
            .rewind()
            .and_then(|_| self.file.read_to_end(buf))
            .map_err(|e| ExperimentError::MeterUnavailable(format!("failed to read {} counter: {e}", self.name)))?;
        let content = std::str::from_utf8(buf)
            .map_err(|e| ExperimentError::MeterUnavailable(format!("{} counter is not utf-8: {e}", self.name)))?;
        let microjoules: u64 = content.trim_end().parse().map_err(|e| {
            ExperimentError::MeterUnavailable(format!("failed to parse {} counter '{content}': {e}", self.name))
        })?;
        Ok(microjoules as f64 / MICROJOULES_PER_JOULE)
    }
}

/// Zones of one package. `aux` is DRAM when present, uncore otherwise.
struct SocketZones {
    package: OpenedZone,
    core: Option<OpenedZone>,
    aux: Option<OpenedZone>,
}

/// Hardware binding over the Linux powercap RAPL tree.
pub struct PowercapSource {
    rapl_path: PathBuf,
    sockets: Vec<SocketZones>,
    reading_buf: Vec<u8>,
}

impl PowercapSource {
    pub fn new(rapl_path: impl Into<PathBuf>) -> Self {
        Self {
            rapl_path: rapl_path.into(),
            sockets: Vec::new(),
            // energy_uj never exceeds max_energy_range_uj, which fits in 16 bytes
            reading_buf: Vec::with_capacity(16),
        }
    }

    pub fn is_available(rapl_path: &Path) -> bool {
        rapl_path.is_dir()
    }

    /// Opens every package zone and its sub-zones. Returns the wraparound modulus in joules.
    fn discover(&mut self) -> Result<f64, ExperimentError> {
        let mut packages: Vec<(u32, PathBuf)> = Vec::new();
        for entry in read_dir(&self.rapl_path)? {
            if !is_zone_dir(&entry) {
                continue;
            }
            let name = read_trimmed(&entry.join("name"))?;
            match name.strip_prefix("package-") {
                Some(id) => {
                    let socket: u32 = id.parse().map_err(|e| {
                        ExperimentError::MeterUnavailable(format!("failed to extract package id from '{name}': {e}"))
                    })?;
                    packages.push((socket, entry));
                }
                None => debug!("Skipping top-level powercap zone {name} at {}", entry.display()),
            }
        }

        if packages.is_empty() {
            return Err(ExperimentError::MeterUnavailable(format!(
                "no package zone under {}",
                self.rapl_path.display()
            )));
        }
        packages.sort_by_key(|(socket, _)| *socket);

        let max_path = packages[0].1.join("max_energy_range_uj");
        let max_uj: u64 = read_trimmed(&max_path)?.parse().map_err(|e| {
            ExperimentError::MeterUnavailable(format!("failed to parse {}: {e}", max_path.display()))
        })?;

        let mut sockets = Vec::with_capacity(packages.len());
        for (socket, package_dir) in packages {
            let mut core = None;
            let mut uncore = None;
            let mut dram = None;
            for child in read_dir(&package_dir)? {
                if !is_zone_dir(&child) {
                    continue;
                }
                let name = read_trimmed(&child.join("name"))?;
                match name.as_str() {
                    "core" => core = Some(OpenedZone::open(&child, name)?),
                    "uncore" => uncore = Some(OpenedZone::open(&child, name)?),
                    "dram" => dram = Some(OpenedZone::open(&child, name)?),
                    _ => debug!("Skipping powercap sub-zone {name} of socket {socket}"),
                }
            }
            sockets.push(SocketZones {
                package: OpenedZone::open(&package_dir, format!("package-{socket}"))?,
                core,
                aux: dram.or(uncore),
            });
        }

        self.sockets = sockets;
        Ok(max_uj as f64 / MICROJOULES_PER_JOULE)
    }
}

impl Default for PowercapSource {
    fn default() -> Self {
        Self::new(POWERCAP_RAPL_PATH)
    }
}

impl EnergyCounterSource for PowercapSource {
    fn name(&self) -> &str {
        "powercap-rapl"
    }

    fn probe(&mut self) -> CounterProbe {
        match self.discover() {
            Ok(counter_max) => CounterProbe::available(self.sockets.len(), counter_max),
            Err(e) => {
                self.sockets.clear();
                CounterProbe::unavailable(e.to_string())
            }
        }
    }

    fn read_raw(&mut self, socket: usize) -> Result<ChannelReading, ExperimentError> {
        let Self {
            sockets, reading_buf, ..
        } = self;
        let zones = sockets
            .get_mut(socket)
            .ok_or_else(|| ExperimentError::MeterUnavailable(format!("socket {socket} is not monitored")))?;

        let package = zones.package.read_joules(reading_buf)?;
        let core = match zones.core.as_mut() {
            Some(zone) => zone.read_joules(reading_buf)?,
            None => 0.0,
        };
        let uncore_or_dram = match zones.aux.as_mut() {
            Some(zone) => zone.read_joules(reading_buf)?,
            None => 0.0,
        };
        Ok(ChannelReading::new(uncore_or_dram, core, package))
    }
}

fn is_zone_dir(path: &Path) -> bool {
    path.is_dir()
        && path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(ZONE_PREFIX))
            .unwrap_or(false)
}

fn read_dir(path: &Path) -> Result<Vec<PathBuf>, ExperimentError> {
    let entries = fs::read_dir(path)
        .map_err(|e| ExperimentError::MeterUnavailable(format!("could not list {}: {e}", path.display())))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| ExperimentError::MeterUnavailable(format!("could not list {}: {e}", path.display())))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn read_trimmed(path: &Path) -> Result<String, ExperimentError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_owned())
        .map_err(|e| ExperimentError::MeterUnavailable(format!("could not read {}: {e}", path.display())))
}
