use thiserror::Error;

/// Universal error type for the `cleave` crate
#[derive(Error, Debug)]
pub enum Error {
    /// Meshing requires at least two material fields
    #[error("at least two material fields are required")]
    TooFewMaterials,

    /// Material sets are stored as a 64-bit mask
    #[error("more than 64 materials are not supported")]
    TooManyMaterials,

    /// A volume or field was constructed with a zero-sized dimension
    #[error("volume dimensions must be nonzero")]
    EmptyVolume,

    /// Fields grouped into a volume must share the same dimensions
    #[error("field dimensions do not match volume dimensions")]
    FieldSizeMismatch,

    /// The sample buffer handed to a field does not match its dimensions
    #[error("sample count does not match field dimensions")]
    BadSampleCount,

    /// The mesher produced no output tetrahedra
    #[error("meshing produced an empty mesh")]
    EmptyMesh,

    /// Error during file IO
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
