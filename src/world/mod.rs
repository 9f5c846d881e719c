//! Static world content: reference data catalog and balance tuning.

pub mod balance;
pub mod catalog;

pub use balance::Balance;
pub use catalog::{AchievementDef, Course, CoursePlan, MajorAssignment, MajorInfo, WorldCatalog};
