pub mod areas;
pub mod core;
pub mod grades;
pub mod records;
pub mod reports;
pub mod school;
pub mod sections;
pub mod setup;
pub mod students;
pub mod years;
