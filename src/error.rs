//! Error types shared by the pipeline stages.

/// Failure to turn source bytes into a raster image.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Empty image data")]
    Empty,

    #[error("Malformed data URL: {0}")]
    DataUrl(String),

    #[error("Unsupported or corrupt image: {0}")]
    Codec(String),

    #[error("RGBA buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Failure to decode a heightmap from its base64 transport form.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Heightmap payload holds {actual} bytes, expected {expected} for {width}x{height}")]
    Length {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Failure to export a relief as STL.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Heightmap/print settings mismatch: {0}")]
    SizeMismatch(String),

    #[error("Heightmap is empty")]
    EmptyHeightmap,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while building or writing a filament swap plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Layer height must be positive, got {0}")]
    InvalidLayerHeight(f64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main result type for the crate
pub type Result<T> = std::result::Result<T, Error>;
