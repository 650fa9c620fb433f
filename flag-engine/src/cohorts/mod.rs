pub mod cohort_manager;
pub mod cohort_models;
