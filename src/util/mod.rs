pub mod buf;
pub mod profiler;
