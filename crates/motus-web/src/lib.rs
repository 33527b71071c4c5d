//! Motus Web - Browser host for the motion viewer and messaging panels
//!
//! Runs the Bevy app in a canvas, implements the scene pipeline's renderer and
//! mount point on Bevy assets, and talks to the portal backend over REST and a
//! WebSocket.

mod app;
mod network;
mod render;
mod storage;
mod ui;
mod viewer;

use wasm_bindgen::prelude::*;

/// Entry point for WASM module
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();

    // Keep wgpu noise out of the console
    tracing_wasm::set_as_global_default_with_config(
        tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::WARN)
            .build(),
    );

    app::run();
}
