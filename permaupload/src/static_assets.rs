//! Embedded browser client served at `/`.

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "static/"]
pub struct Assets;

pub const INDEX: &str = "index.html";
