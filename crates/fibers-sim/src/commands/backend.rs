use clap::ValueEnum;
use fibers_exp::{LsfScheduler, Scheduler, SlurmScheduler};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerArg {
    Lsf,
    Slurm,
    Local,
}

/// Cluster backend able to answer status and cancel queries for handles it issued.
///
/// Local handles only live inside the submitting process, so there is none for them.
pub fn remote(name: &str) -> Option<Box<dyn Scheduler>> {
    match name {
        "lsf" => Some(Box::new(LsfScheduler::new())),
        "slurm" => Some(Box::new(SlurmScheduler::new())),
        _ => None,
    }
}

impl SchedulerArg {
    pub fn name(self) -> &'static str {
        match self {
            SchedulerArg::Lsf => "lsf",
            SchedulerArg::Slurm => "slurm",
            SchedulerArg::Local => "local",
        }
    }
}
