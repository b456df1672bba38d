pub mod analyzer;
pub mod sync;
pub mod tsp;

pub use analyzer::{
    calculate_fft, calculate_frequency_response_with_smoothing, DEFAULT_SMOOTHING_SIGMA,
};
pub use sync::{
    process_recorded_buffer, recording_stats, synchronous_average, RecordingLayout,
    RecordingStats,
};
pub use tsp::{build_excitation, deconvolve, generate_tsp, Channel, SignalBundle};
