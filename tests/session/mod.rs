mod event_tests;
mod experiment_tests;
mod project_tests;
