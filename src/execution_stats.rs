// Loss of precision is allowable in this module's use cases.
#![allow(clippy::cast_precision_loss)]

use std::time::{Duration, Instant};

use bytesize::ByteSize;
use humantime::format_duration;
use log::{debug, error, info};
use serde_derive::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// How frequently we update the max memory used value.
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Summary statistics for one call to `Context::execute`. If no plans were executed the per
/// plan wall time is zero.
#[derive(Serialize, Debug, Clone)]
pub struct ExecutionStatistics {
    pub max_memory_usage: u64,
    pub cpu_time: Duration,
    pub wall_time: Duration,

    pub plans_executed: usize,
    pub events_raised: usize,
    pub wall_time_per_plan: Duration,
}

pub(crate) struct ExecutionProfilingCollector {
    /// Used to compute elapsed wall time for the execution
    start_time: Instant,
    /// Lets the event loop call `refresh` on every iteration without polling every time.
    last_refresh: Instant,
    /// The accumulated CPU time of the process in CPU-milliseconds at execution start
    start_cpu_time: u64,
    /// The maximum resident memory of the process as reported by `sysinfo`, polled during
    /// execution.
    max_memory_usage: u64,
    system: System,
    /// `None` on platforms where the current process cannot be inspected
    process_id: Option<Pid>,
}

impl ExecutionProfilingCollector {
    pub fn new() -> ExecutionProfilingCollector {
        let process_id = sysinfo::get_current_pid().ok();
        let now = Instant::now();

        let mut collector = ExecutionProfilingCollector {
            start_time: now,
            last_refresh: now,
            start_cpu_time: 0,
            max_memory_usage: 0,
            system: System::new(),
            process_id,
        };
        if let Some(process_id) = process_id {
            debug!("Process ID: {}", process_id);
            collector.update_system_info(ProcessRefreshKind::nothing().with_cpu().with_memory());
            if let Some(process) = collector.system.process(process_id) {
                collector.max_memory_usage = process.memory();
                collector.start_cpu_time = process.accumulated_cpu_time();
            }
        }

        collector
    }

    /// Polls memory usage if at least `REFRESH_INTERVAL` has passed since the previous poll.
    #[inline]
    pub fn refresh(&mut self) {
        if self.last_refresh.elapsed() >= REFRESH_INTERVAL {
            self.poll_memory();
            self.last_refresh = Instant::now();
        }
    }

    fn poll_memory(&mut self) {
        if let Some(pid) = self.process_id {
            self.update_system_info(ProcessRefreshKind::nothing().with_memory());
            if let Some(process) = self.system.process(pid) {
                self.max_memory_usage = self.max_memory_usage.max(process.memory());
            }
        }
    }

    /// Accumulated CPU time of the process in CPU-milliseconds since the collector was created.
    pub fn cpu_time(&mut self) -> u64 {
        let Some(pid) = self.process_id else {
            return 0;
        };
        self.update_system_info(ProcessRefreshKind::nothing().with_cpu());
        self.system.process(pid).map_or(0, |process| {
            process
                .accumulated_cpu_time()
                .saturating_sub(self.start_cpu_time)
        })
    }

    #[inline]
    fn update_system_info(&mut self, process_refresh_kind: ProcessRefreshKind) {
        if let Some(pid) = self.process_id {
            if self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                process_refresh_kind,
            ) < 1
            {
                error!("could not refresh process statistics");
            }
        }
    }

    pub fn compute_final_statistics(
        &mut self,
        plans_executed: usize,
        events_raised: usize,
    ) -> ExecutionStatistics {
        self.poll_memory();
        let cpu_time = Duration::from_millis(self.cpu_time());
        let wall_time = self.start_time.elapsed();

        let wall_time_per_plan = if plans_executed > 0 {
            Duration::from_secs_f64(wall_time.as_secs_f64() / plans_executed as f64)
        } else {
            Duration::ZERO
        };

        ExecutionStatistics {
            max_memory_usage: self.max_memory_usage,
            cpu_time,
            wall_time,
            plans_executed,
            events_raised,
            wall_time_per_plan,
        }
    }
}

/// Logs execution statistics with the logging system.
pub fn log_execution_statistics(stats: &ExecutionStatistics) {
    info!("Execution complete.");
    if stats.max_memory_usage == 0 {
        info!("Memory and CPU statistics are not available on your platform.");
    } else {
        info!("Max memory usage: {}", ByteSize::b(stats.max_memory_usage));
        info!("CPU time: {}", format_duration(stats.cpu_time));
    }
    info!("Wall time: {}", format_duration(stats.wall_time));
    info!("Plans executed: {}", stats.plans_executed);
    info!("Events raised: {}", stats.events_raised);
    if stats.plans_executed > 0 {
        info!(
            "Wall time per plan: {}",
            format_duration(stats.wall_time_per_plan)
        );
    }
}
