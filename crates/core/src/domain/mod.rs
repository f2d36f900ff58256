pub mod guideline;
pub mod journey;
pub mod relationships;
pub mod session;
