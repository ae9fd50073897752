/// Embedding-based log classification
///
/// Encodes a log message with a MiniLM-class BERT sentence encoder
/// (mean-pooled over the attention mask), then applies a linear
/// classification head trained offline. All computation is local; the model
/// directory is read once at startup and the classifier is immutable
/// afterwards, so it can be shared across concurrent requests.
///
/// Expected model directory layout:
///   config.json             BERT configuration
///   tokenizer.json          tokenizer
///   model.safetensors       encoder weights
///   classifier.safetensors  linear head (classifier.weight / classifier.bias)
///   labels.json             JSON array of class names, index-aligned
use std::path::Path;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use crate::error::ClassifyError;
use crate::orchestrator::UNCLASSIFIED_LABEL;
use crate::traits::VectorClassifier;

pub struct EmbeddingClassifier {
    bert: BertModel,
    classifier: Linear,
    tokenizer: Tokenizer,
    labels: Vec<String>,
    device: Device,
}

impl EmbeddingClassifier {
    /// Load all model artifacts from `model_dir`. Any missing or corrupt
    /// artifact is a fatal startup error.
    pub fn load(model_dir: &str) -> Result<Self, ClassifyError> {
        let dir = Path::new(model_dir);
        let load_err = |reason: String| ClassifyError::ModelLoad {
            path: dir.to_path_buf(),
            reason,
        };

        let device = Device::Cpu;

        let config_str = std::fs::read_to_string(dir.join("config.json"))
            .map_err(|e| load_err(format!("cannot read config.json: {e}")))?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| load_err(format!("cannot parse config.json: {e}")))?;

        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| load_err(format!("cannot load tokenizer.json: {e}")))?;

        let weights_path = dir.join("model.safetensors");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                .map_err(|e| load_err(format!("cannot load model.safetensors: {e}")))?
        };

        // sentence-transformers exports store the encoder unprefixed; plain
        // HF checkpoints prefix it with "bert".
        let bert = BertModel::load(vb.clone(), &config)
            .or_else(|_| BertModel::load(vb.pp("bert"), &config))
            .map_err(|e| load_err(format!("cannot load BERT weights: {e}")))?;

        let labels_str = std::fs::read_to_string(dir.join("labels.json"))
            .map_err(|e| load_err(format!("cannot read labels.json: {e}")))?;
        let labels: Vec<String> = serde_json::from_str(&labels_str)
            .map_err(|e| load_err(format!("cannot parse labels.json: {e}")))?;
        if labels.is_empty() {
            return Err(load_err("labels.json contains no classes".to_string()));
        }

        let head_path = dir.join("classifier.safetensors");
        let head_vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[head_path], DType::F32, &device)
                .map_err(|e| load_err(format!("cannot load classifier.safetensors: {e}")))?
        };
        let classifier =
            candle_nn::linear(config.hidden_size, labels.len(), head_vb.pp("classifier"))
                .map_err(|e| load_err(format!("cannot load classification head: {e}")))?;

        tracing::info!(
            "Embedding classifier loaded: {} classes, hidden size {}",
            labels.len(),
            config.hidden_size
        );

        Ok(Self {
            bert,
            classifier,
            tokenizer,
            labels,
            device,
        })
    }

    /// Encode a message and run the classification head.
    fn predict(&self, message: &str) -> Result<(String, f32)> {
        let encoding = self
            .tokenizer
            .encode(message, true)
            .map_err(anyhow::Error::msg)?;
        let token_ids = encoding.get_ids().to_vec();
        let mask = encoding.get_attention_mask().to_vec();

        let token_ids = Tensor::new(&token_ids[..], &self.device)?.unsqueeze(0)?;
        let token_type_ids = token_ids.zeros_like()?;
        let attention_mask = Tensor::new(&mask[..], &self.device)?.unsqueeze(0)?;

        let sequence_output =
            self.bert
                .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean pooling over real tokens (sentence-transformers convention)
        let mask_f32 = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = sequence_output.broadcast_mul(&mask_f32)?.sum(1)?;
        let counts = mask_f32.sum(1)?;
        let embedding = summed.broadcast_div(&counts)?;

        let logits = self.classifier.forward(&embedding)?;
        let probabilities = candle_nn::ops::softmax(&logits, 1)?.squeeze(0)?;
        let probabilities = probabilities.to_vec1::<f32>()?;

        let (predicted, &confidence) = probabilities
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or_else(|| anyhow::anyhow!("classifier produced no logits"))?;

        let label = self
            .labels
            .get(predicted)
            .ok_or_else(|| anyhow::anyhow!("predicted class {} has no label", predicted))?
            .clone();

        Ok((label, confidence))
    }
}

impl VectorClassifier for EmbeddingClassifier {
    fn classify(&self, message: &str) -> Result<(String, f32)> {
        // Empty input never reaches the model; it gets the default label at
        // zero confidence so the orchestrator falls through.
        if message.trim().is_empty() {
            return Ok((UNCLASSIFIED_LABEL.to_string(), 0.0));
        }
        self.predict(message)
    }

    fn name(&self) -> &str {
        "embedding"
    }
}
