use std::path::Path;

use winvmi::os::windows::Offsets;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .init();
}

/// Loads the structure offsets from a JSON file, or falls back to the
/// Windows 10 20H1 preset.
pub fn load_offsets(path: Option<&Path>) -> Result<Offsets, Box<dyn std::error::Error>> {
    let Some(path) = path
    else {
        return Ok(Offsets::WINDOWS_10_19041);
    };

    tracing::debug!(path = %path.display(), "loading offsets");
    let offsets = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok(offsets)
}
