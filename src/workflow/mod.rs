/*!
 * Workflow
 *
 * Task graph composition: series run tasks one after another, parallels
 * join several series, and both are tasks themselves.
 */

mod parallel;
mod series;
mod subtask;

pub use parallel::{ParallelCallback, ParallelWork};
pub use series::{Series, SeriesCallback, SeriesWork};
pub use subtask::{subtask_done, BoxTask, SubTask};

/// Entry points for building and starting task graphs
pub struct Workflow;

impl Workflow {
    /// Build a series around `first` without starting it
    pub fn create_series_work(first: BoxTask, callback: Option<SeriesCallback>) -> Series {
        SeriesWork::new(first, callback)
    }

    pub fn start_series_work(first: BoxTask, callback: Option<SeriesCallback>) -> Series {
        SeriesWork::start_with(first, callback)
    }

    pub fn create_parallel_work(callback: Option<ParallelCallback>) -> Box<ParallelWork> {
        ParallelWork::new(callback)
    }

    pub fn create_parallel_work_from(branches: Vec<Series>, callback: Option<ParallelCallback>) -> Box<ParallelWork> {
        ParallelWork::from_series(branches, callback)
    }

    /// Run a parallel work as the only task of a new series
    pub fn start_parallel_work(parallel: Box<ParallelWork>, callback: Option<SeriesCallback>) -> Series {
        SeriesWork::start_with(parallel, callback)
    }
}
