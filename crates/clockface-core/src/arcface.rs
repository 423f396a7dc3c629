//! ArcFace embedding model via ONNX Runtime.
//!
//! Takes an already aligned face crop (any size, any format the `image`
//! crate decodes), resizes it to 112x112 RGB and returns the L2-normalised
//! 512-dimensional embedding of the w600k_r50 model.

use crate::provider::ProviderError;
use crate::types::Embedding;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum ArcFaceError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ArcFaceError> for ProviderError {
    fn from(err: ArcFaceError) -> Self {
        match err {
            ArcFaceError::Decode(e) => ProviderError::Decode(e.to_string()),
            ArcFaceError::ModelNotFound(_) => ProviderError::Unavailable,
            other => ProviderError::Inference(other.to_string()),
        }
    }
}

pub struct ArcFaceModel {
    session: Session,
}

impl ArcFaceModel {
    pub fn load(model_path: &str) -> Result<Self, ArcFaceError> {
        if !Path::new(model_path).exists() {
            return Err(ArcFaceError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Decode an encoded face crop and embed it.
    pub fn embed(&mut self, encoded: &[u8]) -> Result<Embedding, ArcFaceError> {
        let decoded = image::load_from_memory(encoded)?.to_rgb8();
        let crop = image::imageops::resize(
            &decoded,
            ARCFACE_INPUT_SIZE,
            ARCFACE_INPUT_SIZE,
            FilterType::Triangle,
        );
        let input = Self::preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ArcFaceError::InferenceFailed(format!("embedding extraction: {e}")))?;
        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ArcFaceError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    /// 112x112 RGB crop into a normalised NCHW tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in crop.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (f32::from(pixel.0[c]) - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

/// Zero vectors are passed through untouched; the matcher rejects them.
fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
