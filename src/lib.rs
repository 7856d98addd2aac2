//! Assigns tutors to the tutorials, exercise sessions and grading slots of a
//! two-week course calendar with a staged mixed-integer program, and keeps
//! the resulting plans editable.

pub mod calendar;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod plan;
pub mod planner;
pub mod server;
pub mod snapshot;
pub mod solver;
pub mod stages;
pub mod store;
pub mod working;
pub mod workspace;
