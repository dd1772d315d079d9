pub mod bloom_processor;
pub mod compute_blur;
pub mod context;
pub mod deferred_passes;
pub mod mesh;
pub mod pipeline;
pub mod readback;
pub mod targets;
pub mod uniform_buffer;
