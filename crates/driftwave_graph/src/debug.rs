use driftwave_core::Device;
use std::fmt;

/// Read-only view of the scheduler for a host debug panel.
///
/// Rebuilt under the mutation fence and stored behind its own lock, so
/// taking a snapshot never touches the worker coordination.
#[derive(Debug, Clone, Default)]
pub struct SchedulerSnapshot {
    /// Registered modules, stale ones included.
    pub pipeline: usize,
    pub stale: usize,
    pub present: usize,
    pub compute: usize,
    /// One entry per executor: device tag and the ordered block names.
    pub graphs: Vec<(Device, Vec<String>)>,
}

impl fmt::Display for SchedulerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<18}{} modules", "pipeline:", self.pipeline)?;
        writeln!(f, "{:<18}{} modules", "stale:", self.stale)?;
        writeln!(f, "{:<18}{} modules", "present:", self.present)?;
        writeln!(f, "{:<18}{} modules", "compute:", self.compute)?;
        write!(f, "{:<18}", "graphs:")?;
        if self.graphs.is_empty() {
            write!(f, "none")?;
        }
        for (index, (device, blocks)) in self.graphs.iter().enumerate() {
            if index > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{} [{}]", device, blocks.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_five_labeled_rows() {
        let snapshot = SchedulerSnapshot {
            pipeline: 3,
            stale: 1,
            present: 1,
            compute: 2,
            graphs: vec![
                (Device::Cpu, vec!["fft".into(), "filter".into()]),
                (Device::Vulkan, vec!["waterfall".into()]),
            ],
        };
        let rendered = snapshot.to_string();
        assert_eq!(rendered.lines().count(), 5);
        assert!(rendered.contains("cpu [fft, filter]"));
        assert!(rendered.contains("vulkan [waterfall]"));
    }
}
