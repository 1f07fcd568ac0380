//! CPU/memory sampling for worker processes.

use sysinfo::{Pid, System};

/// Samples one process's cpu and memory usage from the process table.
pub struct ProcessSampler {
    system: System,
    pid: Option<Pid>,
}

impl ProcessSampler {
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            system: System::new(),
            pid: pid.map(Pid::from_u32),
        }
    }

    /// Returns `(cpu_percent, mem_bytes)` for the tracked process, or
    /// `None` once it is gone. CPU usage needs two refreshes to produce a
    /// meaningful delta, so early samples may read as zero.
    pub fn sample(&mut self) -> Option<(f32, u64)> {
        let pid = self.pid?;
        self.system.refresh_process(pid);
        let process = self.system.process(pid)?;
        Some((process.cpu_usage(), process.memory()))
    }
}
