use std::{collections::HashMap, path::Path, sync::Mutex};

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, imageops::FilterType};
use ort::{session::Session, value::Tensor};

pub const CLIP_IMAGE_SIZE: u32 = 224;
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_1];

/// Vision tower of an exported CLIP model. Vectors are L2-normalized and live
/// in the same space as the matching CLIP text tower.
pub struct ClipImageEncoder {
    model_path: String,
    session: Mutex<Session>,
}

impl ClipImageEncoder {
    pub fn open(model_path: &str) -> Result<Self> {
        let path = Path::new(model_path);
        if !path.exists() {
            return Err(anyhow!("image model not found at {}", path.display()));
        }
        let session = Session::builder()
            .context("failed to create ONNX session builder")?
            .commit_from_file(path)
            .with_context(|| format!("failed to load image model {}", path.display()))?;
        Ok(Self {
            model_path: model_path.to_string(),
            session: Mutex::new(session),
        })
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn embed_file(&self, image_path: &Path) -> Result<Vec<f32>> {
        let image = image::open(image_path)
            .with_context(|| format!("failed reading image: {}", image_path.display()))?;
        self.embed_image(&image)
    }

    pub fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let side = i64::from(CLIP_IMAGE_SIZE);
        let pixels = Tensor::<f32>::from_array((vec![1, 3, side, side], pixel_values(image)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("image session lock poisoned"))?;
        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| anyhow!("image model declares no inputs"))?;
        let mut model_inputs = HashMap::new();
        model_inputs.insert(input_name, pixels.upcast());

        let mut outputs = session.run(model_inputs)?;
        let key = outputs
            .keys()
            .find(|name| *name == "image_embeds")
            .or_else(|| outputs.keys().next())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("image model returned no outputs"))?;
        let output = outputs
            .remove(key)
            .ok_or_else(|| anyhow!("image model output extraction failed"))?;
        let (shape, values) = output
            .try_extract_tensor::<f32>()
            .map_err(|err| anyhow!("image output decode failed: {err}"))?;

        // [1, dim] is already projected; [1, tokens, dim] keeps the class token.
        let dim = shape
            .last()
            .and_then(|d| usize::try_from(*d).ok())
            .filter(|d| *d > 0 && values.len() >= *d)
            .ok_or_else(|| anyhow!("image output shape {shape:?} is unsupported"))?;
        let mut vector = values[..dim].to_vec();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// CLIP preprocessing: scale the short side to 224, center crop, then
/// normalize each RGB channel. Output is channel-major `[3, 224, 224]`.
pub fn pixel_values(image: &DynamicImage) -> Vec<f32> {
    let side = CLIP_IMAGE_SIZE;
    let rgb = image
        .resize_to_fill(side, side, FilterType::CatmullRom)
        .to_rgb8();
    let plane = (side * side) as usize;
    let mut out = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = (y * side + x) as usize;
        for channel in 0..3 {
            let value = f32::from(pixel.0[channel]) / 255.0;
            out[channel * plane + offset] = (value - CLIP_MEAN[channel]) / CLIP_STD[channel];
        }
    }
    out
}
