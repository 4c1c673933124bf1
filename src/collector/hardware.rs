//! Hardware and OS inventory collector.

use crate::collector::traits::Collector;
use crate::collector::{gather_vecs, info_vec};
use crate::config::HardwareConfig;
use crate::error::{ExporterError, Result};
use prometheus::proto::MetricFamily;
use prometheus::GaugeVec;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use sysinfo::System;

const SUBSYSTEM: &str = "hardware";

/// Inventory collector using sysinfo, /proc and sysfs.
///
/// Every series is an info metric with value 1; the facts live in the labels.
/// Values that cannot be read, for example DMI serials without root, are
/// reported as empty labels.
pub struct HardwareCollector {
    system: Mutex<System>,
    sys_root: PathBuf,
    node: GaugeVec,
    os: GaugeVec,
    kernel: GaugeVec,
    product: GaugeVec,
    board: GaugeVec,
    chassis: GaugeVec,
    bios: GaugeVec,
    cpu: GaugeVec,
    memory: GaugeVec,
    storage: GaugeVec,
    network: GaugeVec,
}

/// Processor topology as listed in /proc/cpuinfo.
#[derive(Debug, Default, PartialEq)]
struct CpuTopology {
    /// Physical packages
    packages: usize,
    /// Physical cores over all packages, `None` when not listed
    cores: Option<usize>,
    /// Cache size in KB
    cache_kb: u64,
    architecture: Option<String>,
}

/// First populated memory device of the SMBIOS table.
#[derive(Debug, PartialEq)]
struct MemoryDevice {
    kind: &'static str,
    /// Speed in MT/s
    speed: u16,
}

#[derive(Debug, PartialEq)]
struct BlockDevice {
    name: String,
    driver: String,
    vendor: String,
    model: String,
    serial: String,
    /// Size in GB
    size: u64,
}

#[derive(Debug, PartialEq)]
struct Interface {
    name: String,
    driver: String,
    mac_address: String,
    /// Link speed in Mbit/s, 0 when down or unknown
    speed: u64,
}

impl HardwareCollector {
    /// Create a new hardware collector instance.
    pub fn new(namespace: &str, config: &HardwareConfig) -> Result<Self> {
        let system = System::new_all();
        if system.cpus().is_empty() {
            return Err(ExporterError::collector_error(
                SUBSYSTEM,
                "no CPU information available",
            ));
        }

        let vec = |name: &str, help: &str, labels: &[&str]| {
            info_vec(namespace, SUBSYSTEM, name, help, labels)
        };

        Ok(Self {
            system: Mutex::new(system),
            sys_root: config.sysfs_path.clone(),
            node: vec("node", "Node information", &["hostname", "machineid"])?,
            os: vec(
                "os",
                "OS information",
                &["name", "vendor", "version", "release", "architecture"],
            )?,
            kernel: vec(
                "kernel",
                "Kernel information",
                &["release", "version", "architecture"],
            )?,
            product: vec(
                "product",
                "Product information",
                &["name", "vendor", "version", "serial"],
            )?,
            board: vec(
                "board",
                "Board information",
                &["name", "vendor", "version", "serial", "assettag"],
            )?,
            chassis: vec(
                "chassis",
                "Chassis information",
                &["type", "vendor", "version", "serial", "assettag"],
            )?,
            bios: vec("bios", "BIOS information", &["vendor", "version", "date"])?,
            cpu: vec(
                "cpu",
                "CPU information",
                &["vendor", "model", "speed", "cache", "cpus", "cores", "threads"],
            )?,
            memory: vec("memory", "Memory information", &["type", "speed", "size"])?,
            storage: vec(
                "storage",
                "Storage information",
                &["name", "driver", "vendor", "model", "serial", "size"],
            )?,
            network: vec(
                "network",
                "Network interface information",
                &["name", "driver", "macaddress", "port", "speed"],
            )?,
        })
    }

    fn dmi(&self, field: &str) -> String {
        read_trimmed(&self.sys_root.join("class/dmi/id").join(field))
    }

    fn record_system(&self, system: &System, topology: &CpuTopology) {
        let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());
        let machine_id = read_trimmed(Path::new("/etc/machine-id"));
        self.node.with_label_values(&[&hostname, &machine_id]).set(1.0);

        let architecture = topology
            .architecture
            .clone()
            .unwrap_or_else(|| std::env::consts::ARCH.to_string());
        let name = System::name().unwrap_or_default();
        let version = System::long_os_version().unwrap_or_default();
        let release = System::os_version().unwrap_or_default();
        self.os
            .with_label_values(&[
                &name,
                &System::distribution_id(),
                &version,
                &release,
                &architecture,
            ])
            .set(1.0);

        let kernel_release = System::kernel_version().unwrap_or_default();
        let kernel_version = read_trimmed(Path::new("/proc/sys/kernel/version"));
        self.kernel
            .with_label_values(&[&kernel_release, &kernel_version, &architecture])
            .set(1.0);

        let cpus = system.cpus();
        if let Some(first) = cpus.first() {
            let threads = cpus.len();
            self.cpu
                .with_label_values(&[
                    first.vendor_id(),
                    first.brand(),
                    &first.frequency().to_string(),
                    &topology.cache_kb.to_string(),
                    &topology.packages.to_string(),
                    &topology.cores.unwrap_or(threads).to_string(),
                    &threads.to_string(),
                ])
                .set(1.0);
        }

        let device = read_memory_device(&self.sys_root.join("firmware/dmi/tables/DMI"));
        let (kind, speed) = device.map_or(("", 0), |device| (device.kind, device.speed));
        let size_mb = system.total_memory() / 1024 / 1024;
        self.memory
            .with_label_values(&[kind, &speed.to_string(), &size_mb.to_string()])
            .set(1.0);
    }

    fn record_dmi(&self) {
        self.product
            .with_label_values(&[
                &self.dmi("product_name"),
                &self.dmi("sys_vendor"),
                &self.dmi("product_version"),
                &self.dmi("product_serial"),
            ])
            .set(1.0);
        self.board
            .with_label_values(&[
                &self.dmi("board_name"),
                &self.dmi("board_vendor"),
                &self.dmi("board_version"),
                &self.dmi("board_serial"),
                &self.dmi("board_asset_tag"),
            ])
            .set(1.0);
        self.chassis
            .with_label_values(&[
                &self.dmi("chassis_type"),
                &self.dmi("chassis_vendor"),
                &self.dmi("chassis_version"),
                &self.dmi("chassis_serial"),
                &self.dmi("chassis_asset_tag"),
            ])
            .set(1.0);
        self.bios
            .with_label_values(&[
                &self.dmi("bios_vendor"),
                &self.dmi("bios_version"),
                &self.dmi("bios_date"),
            ])
            .set(1.0);
    }

    fn record_storage(&self) {
        for device in read_block_devices(&self.sys_root) {
            self.storage
                .with_label_values(&[
                    &device.name,
                    &device.driver,
                    &device.vendor,
                    &device.model,
                    &device.serial,
                    &device.size.to_string(),
                ])
                .set(1.0);
        }
    }

    fn record_network(&self) {
        // The connector type is only exposed through ethtool, not sysfs.
        for interface in read_interfaces(&self.sys_root) {
            self.network
                .with_label_values(&[
                    &interface.name,
                    &interface.driver,
                    &interface.mac_address,
                    "",
                    &interface.speed.to_string(),
                ])
                .set(1.0);
        }
    }

    fn vecs(&self) -> [&GaugeVec; 11] {
        [
            &self.node,
            &self.os,
            &self.kernel,
            &self.product,
            &self.board,
            &self.chassis,
            &self.bios,
            &self.cpu,
            &self.memory,
            &self.storage,
            &self.network,
        ]
    }
}

impl Collector for HardwareCollector {
    fn subsystem(&self) -> &'static str {
        SUBSYSTEM
    }

    fn update(&self) -> Result<Vec<MetricFamily>> {
        let system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        let topology = fs::read_to_string("/proc/cpuinfo")
            .map(|cpuinfo| parse_cpuinfo(&cpuinfo))
            .unwrap_or_default();

        let vecs = self.vecs();
        for vec in vecs {
            vec.reset();
        }

        self.record_system(&system, &topology);
        self.record_dmi();
        self.record_storage();
        self.record_network();

        Ok(gather_vecs(&vecs))
    }
}

/// File contents without surrounding whitespace, empty when unreadable.
fn read_trimmed(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// Last path component of a symlink target, e.g. the driver name of a device.
fn read_link_name(path: &Path) -> String {
    fs::read_link(path)
        .ok()
        .and_then(|target| {
            target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_default()
}

fn parse_cpuinfo(cpuinfo: &str) -> CpuTopology {
    let mut packages = BTreeSet::new();
    let mut cores = BTreeSet::new();
    let mut physical_id = None;
    let mut topology = CpuTopology::default();

    for line in cpuinfo.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "processor" => physical_id = None,
            "physical id" => {
                packages.insert(value.to_string());
                physical_id = Some(value.to_string());
            }
            "core id" => {
                cores.insert((physical_id.clone().unwrap_or_default(), value.to_string()));
            }
            "cache size" if topology.cache_kb == 0 => {
                topology.cache_kb = value
                    .trim_end_matches("KB")
                    .trim()
                    .parse()
                    .unwrap_or_default();
            }
            "architecture" if topology.architecture.is_none() => {
                topology.architecture = Some(value.to_string());
            }
            _ => {}
        }
    }

    topology.packages = packages.len().max(1);
    topology.cores = (!cores.is_empty()).then_some(cores.len());
    topology
}

fn read_memory_device(path: &Path) -> Option<MemoryDevice> {
    parse_smbios_memory(&fs::read(path).ok()?)
}

/// Find the first installed SMBIOS type 17 (memory device) structure.
fn parse_smbios_memory(table: &[u8]) -> Option<MemoryDevice> {
    const MEMORY_DEVICE: u8 = 17;
    const END_OF_TABLE: u8 = 127;

    let mut offset = 0;
    while offset + 4 <= table.len() {
        let kind = table[offset];
        let length = usize::from(table[offset + 1]);
        if kind == END_OF_TABLE || length < 4 || offset + length > table.len() {
            return None;
        }

        let formatted = &table[offset..offset + length];
        if kind == MEMORY_DEVICE && length >= 0x17 {
            let size = u16::from_le_bytes([formatted[0x0C], formatted[0x0D]]);
            if size != 0 {
                return Some(MemoryDevice {
                    kind: memory_type_name(formatted[0x12]),
                    speed: u16::from_le_bytes([formatted[0x15], formatted[0x16]]),
                });
            }
        }

        // The string set after the formatted area ends with two NULs.
        let strings = &table[offset + length..];
        let end = strings
            .windows(2)
            .position(|pair| pair[0] == 0 && pair[1] == 0)?;
        offset += length + end + 2;
    }
    None
}

fn memory_type_name(code: u8) -> &'static str {
    match code {
        0x03 => "DRAM",
        0x07 => "RAM",
        0x0F => "SDRAM",
        0x12 => "DDR",
        0x13 => "DDR2",
        0x14 => "DDR2 FB-DIMM",
        0x18 => "DDR3",
        0x1A => "DDR4",
        0x1B => "LPDDR",
        0x1C => "LPDDR2",
        0x1D => "LPDDR3",
        0x1E => "LPDDR4",
        0x22 => "DDR5",
        0x23 => "LPDDR5",
        _ => "",
    }
}

/// Physical block devices under `<sys>/block`. Devices without a backing
/// `device` (loop, ram, device-mapper) are skipped.
fn read_block_devices(sys_root: &Path) -> Vec<BlockDevice> {
    let Ok(entries) = fs::read_dir(sys_root.join("block")) else {
        return Vec::new();
    };

    let mut devices: Vec<BlockDevice> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let device = path.join("device");
            if !device.exists() {
                return None;
            }

            let mut driver = read_link_name(&device.join("driver"));
            if driver.is_empty() {
                // NVMe namespaces hang off the controller.
                driver = read_link_name(&device.join("device/driver"));
            }
            let sectors: u64 = read_trimmed(&path.join("size")).parse().unwrap_or_default();

            Some(BlockDevice {
                name: entry.file_name().to_string_lossy().into_owned(),
                driver,
                vendor: read_trimmed(&device.join("vendor")),
                model: read_trimmed(&device.join("model")),
                serial: read_trimmed(&device.join("serial")),
                size: sectors * 512 / 1_000_000_000,
            })
        })
        .collect();
    devices.sort_by(|a, b| a.name.cmp(&b.name));
    devices
}

/// Physical network interfaces under `<sys>/class/net`.
fn read_interfaces(sys_root: &Path) -> Vec<Interface> {
    let Ok(entries) = fs::read_dir(sys_root.join("class/net")) else {
        return Vec::new();
    };

    let mut interfaces: Vec<Interface> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let device = path.join("device");
            if !device.exists() {
                return None;
            }

            // Reading the speed of a link that is down fails or yields -1.
            let speed = read_trimmed(&path.join("speed"))
                .parse::<i64>()
                .ok()
                .and_then(|speed| u64::try_from(speed).ok())
                .unwrap_or_default();

            Some(Interface {
                name: entry.file_name().to_string_lossy().into_owned(),
                driver: read_link_name(&device.join("driver")),
                mac_address: read_trimmed(&path.join("address")),
                speed,
            })
        })
        .collect();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    interfaces
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::os::unix::fs::symlink;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn link(root: &Path, relative: &str, target: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        symlink(target, path).unwrap();
    }

    fn fake_sysfs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        write(root, "class/dmi/id/product_name", "PowerEdge R640\n");
        write(root, "class/dmi/id/sys_vendor", "Dell Inc.\n");
        write(root, "class/dmi/id/chassis_type", "23\n");
        write(root, "class/dmi/id/bios_vendor", "Dell Inc.\n");
        write(root, "class/dmi/id/bios_version", "2.12.2\n");
        write(root, "class/dmi/id/bios_date", "07/09/2021\n");

        write(root, "block/sda/size", "1953525168\n");
        write(root, "block/sda/device/vendor", "ATA     \n");
        write(root, "block/sda/device/model", "Samsung SSD 860\n");
        link(root, "block/sda/device/driver", "../../../bus/scsi/drivers/sd");
        write(root, "block/loop0/size", "0\n");

        write(root, "class/net/eth0/address", "aa:bb:cc:dd:ee:ff\n");
        write(root, "class/net/eth0/speed", "1000\n");
        link(root, "class/net/eth0/device/driver", "../../../bus/pci/drivers/e1000e");
        write(root, "class/net/lo/address", "00:00:00:00:00:00\n");

        dir
    }

    fn series(families: &[MetricFamily], name: &str) -> Vec<BTreeMap<String, String>> {
        families
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().iter())
            .map(|metric| {
                metric
                    .get_label()
                    .iter()
                    .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_hardware_collector_creation() {
        let collector = HardwareCollector::new("test", &HardwareConfig::default());
        assert!(collector.is_ok());
    }

    #[test]
    fn test_update_reports_every_family() {
        let sysfs = fake_sysfs();
        let config = HardwareConfig {
            sysfs_path: sysfs.path().to_path_buf(),
            ..Default::default()
        };
        let collector = HardwareCollector::new("test", &config).unwrap();
        let families = collector.update().unwrap();

        for name in [
            "node", "os", "kernel", "product", "board", "chassis", "bios", "cpu", "memory",
            "storage", "network",
        ] {
            assert_eq!(
                series(&families, &format!("test_hardware_{name}")).len(),
                1,
                "{name}"
            );
        }

        let product = &series(&families, "test_hardware_product")[0];
        assert_eq!(product["name"], "PowerEdge R640");
        assert_eq!(product["vendor"], "Dell Inc.");
        assert_eq!(product["serial"], "");
        assert_eq!(series(&families, "test_hardware_chassis")[0]["type"], "23");

        let storage = &series(&families, "test_hardware_storage")[0];
        assert_eq!(storage["name"], "sda");
        assert_eq!(storage["driver"], "sd");
        assert_eq!(storage["vendor"], "ATA");
        assert_eq!(storage["size"], "1000");

        let network = &series(&families, "test_hardware_network")[0];
        assert_eq!(network["name"], "eth0");
        assert_eq!(network["driver"], "e1000e");
        assert_eq!(network["speed"], "1000");

        let cpu = &series(&families, "test_hardware_cpu")[0];
        assert!(cpu["threads"].parse::<usize>().unwrap() >= 1);
    }

    #[test]
    fn test_parse_cpuinfo_dual_socket() {
        let mut cpuinfo = String::new();
        for (processor, (package, core)) in [(0, 0), (0, 1), (1, 0), (1, 1)].iter().enumerate() {
            cpuinfo.push_str(&format!(
                "processor\t: {processor}\nphysical id\t: {package}\ncore id\t\t: {core}\ncache size\t: 512 KB\n\n"
            ));
        }

        let topology = parse_cpuinfo(&cpuinfo);
        assert_eq!(topology.packages, 2);
        assert_eq!(topology.cores, Some(4));
        assert_eq!(topology.cache_kb, 512);
    }

    #[test]
    fn test_parse_cpuinfo_without_topology() {
        let topology = parse_cpuinfo("processor\t: 0\nBogoMIPS\t: 48.00\n");
        assert_eq!(topology.packages, 1);
        assert_eq!(topology.cores, None);
        assert_eq!(topology.cache_kb, 0);
    }

    #[test]
    fn test_parse_smbios_memory_device() {
        let mut table = Vec::new();
        // Type 16, physical memory array, no strings.
        table.extend([16, 4, 0, 0, 0, 0]);

        // Type 17 with 16 GB installed, DDR4 at 3200 MT/s.
        let mut device = vec![0u8; 0x17];
        device[0] = 17;
        device[1] = 0x17;
        device[0x0C..0x0E].copy_from_slice(&16384u16.to_le_bytes());
        device[0x12] = 0x1A;
        device[0x15..0x17].copy_from_slice(&3200u16.to_le_bytes());
        table.extend(device);
        table.extend(b"DIMM 0\0\0");

        table.extend([127, 4, 0, 0, 0, 0]);

        assert_eq!(
            parse_smbios_memory(&table),
            Some(MemoryDevice {
                kind: "DDR4",
                speed: 3200
            })
        );
    }

    #[test]
    fn test_parse_smbios_skips_empty_slots() {
        let mut empty = vec![0u8; 0x17];
        empty[0] = 17;
        empty[1] = 0x17;
        let mut table = empty;
        table.extend([0, 0]);
        table.extend([127, 4, 0, 0, 0, 0]);

        assert_eq!(parse_smbios_memory(&table), None);
        assert_eq!(parse_smbios_memory(&[]), None);
    }
}
