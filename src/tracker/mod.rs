//! Everything the stopwatch reports into: tasks that accrue time, the session history and the
//! daily goal measured against it.

pub mod accrual;
pub mod goal;
pub mod sessions;
pub mod tasks;
