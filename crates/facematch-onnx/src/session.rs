use ort::session::Session;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("model file not found: {} — download from insightface and place it in the model directory", .0.display())]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    FaceOutOfBounds,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Open an ONNX model for CPU inference.
pub(crate) fn load_session(model_path: &Path, kind: &str) -> Result<Session, OnnxError> {
    if !model_path.exists() {
        return Err(OnnxError::ModelNotFound(model_path.to_path_buf()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = %model_path.display(),
        model = kind,
        inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );

    Ok(session)
}
