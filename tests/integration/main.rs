mod event_pipeline;
mod parallel_execution;
