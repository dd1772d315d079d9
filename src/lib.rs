pub mod bloom;
pub mod camera;
pub mod config;
pub mod error;
pub mod gaussian;
pub mod gpu;
pub mod lighting;
pub mod pass_state;
pub mod ping_pong;
pub mod render_graph;
pub mod scene;
pub mod shader_defines;
pub mod structured_buffer;

// Demo orchestration
pub mod deferred_shading;
pub mod post_processing;

pub mod cli;
