use serde::Serialize;
use sysinfo::System;

/// Static facts about the host, attached to diagnostic exports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub host_name: Option<String>,
    pub arch: &'static str,
    pub cpu_count: usize,
    pub total_memory_mb: f64,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let mut system = System::new();
        system.refresh_memory();

        Self {
            os_name: System::name(),
            os_version: System::os_version(),
            kernel_version: System::kernel_version(),
            host_name: System::host_name(),
            arch: std::env::consts::ARCH,
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            total_memory_mb: system.total_memory() as f64 / 1024.0 / 1024.0,
        }
    }
}
