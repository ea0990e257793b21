mod common;
mod cycle_detection;
mod property_tests;
