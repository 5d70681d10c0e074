//! Inference engine boundary
//!
//! Every stage talks to its model through [`InferenceEngine`]: named input
//! tensors in, named output tensors out. [`crate::vision::OnnxSession`] is the
//! ONNX Runtime implementation; [`ClosureEngine`] wraps a plain function and
//! is handy for alternative runtimes and for tests.

use ndarray::{Array4, ArrayViewD, IxDyn};

use super::error::VisionError;

/// Owned row-major f32 tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking that `data` matches `shape`
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, VisionError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(VisionError::inference(
                "tensor",
                format!(
                    "shape {:?} needs {} elements, got {}",
                    shape,
                    expected,
                    data.len()
                ),
            ));
        }
        Ok(Self { shape, data })
    }

    /// Take ownership of an NCHW array
    pub fn from_array4(array: Array4<f32>) -> Self {
        let shape = array.shape().to_vec();
        let data = if array.is_standard_layout() {
            let (data, _offset) = array.into_raw_vec_and_offset();
            data
        } else {
            array.iter().copied().collect()
        };
        Self { shape, data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_parts(self) -> (Vec<usize>, Vec<f32>) {
        (self.shape, self.data)
    }

    /// Borrow as an n-dimensional view
    pub fn view(&self) -> Result<ArrayViewD<'_, f32>, VisionError> {
        ArrayViewD::from_shape(IxDyn(&self.shape), &self.data)
            .map_err(|e| VisionError::inference("tensor", e.to_string()))
    }
}

/// Named tensors passed to and returned from an engine
pub type NamedTensors = Vec<(String, Tensor)>;

/// An opaque model executor
pub trait InferenceEngine: Send {
    /// Execute the model once
    fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, VisionError>;

    /// Custom model metadata as key/value pairs, if the runtime exposes any
    fn custom_metadata(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, VisionError> {
        (**self).run(inputs)
    }

    fn custom_metadata(&self) -> Vec<(String, String)> {
        (**self).custom_metadata()
    }
}

/// Run a single-input model and return its first output
pub fn run_single(
    engine: &mut dyn InferenceEngine,
    stage: &'static str,
    input_name: &str,
    input: Tensor,
) -> Result<Tensor, VisionError> {
    let outputs = engine.run(vec![(input_name.to_string(), input)])?;
    outputs
        .into_iter()
        .next()
        .map(|(_, tensor)| tensor)
        .ok_or_else(|| VisionError::inference(stage, "model produced no outputs"))
}

/// Engine backed by a closure over the first input tensor
pub struct ClosureEngine<F> {
    output_name: String,
    metadata: Vec<(String, String)>,
    f: F,
}

impl<F> ClosureEngine<F>
where
    F: FnMut(&Tensor) -> Result<Tensor, VisionError> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            output_name: "output0".to_string(),
            metadata: Vec::new(),
            f,
        }
    }

    /// Attach custom metadata, as a model file would carry it
    pub fn with_metadata(mut self, metadata: Vec<(String, String)>) -> Self {
        self.metadata = metadata;
        self
    }
}

impl<F> InferenceEngine for ClosureEngine<F>
where
    F: FnMut(&Tensor) -> Result<Tensor, VisionError> + Send,
{
    fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, VisionError> {
        let (_, input) = inputs
            .first()
            .ok_or_else(|| VisionError::inference("engine", "no input tensors"))?;
        let output = (self.f)(input)?;
        Ok(vec![(self.output_name.clone(), output)])
    }

    fn custom_metadata(&self) -> Vec<(String, String)> {
        self.metadata.clone()
    }
}
